//! Compiled code units and the global code index.
//!
//! Every PC handed to the unwinder is either an exact PC (a fault or a
//! suspension point) or a return address, which points one past the call
//! that produced it. Both are reduced to an *effective* address before they
//! are tested against half-open ranges:
//!
//! ```text
//!   call  foo          ; 0x1010..0x1015
//!   mov   rax, rbx     ; 0x1015   <- return address, is_ip_past = true
//!
//!   effective(0x1015, past)  = 0x1014   (inside the call)
//!   effective(0x1015, exact) = 0x1015
//! ```
//!
//! Code-unit resolution and handler matching both use [`effective_ip`], so a
//! call in the last instruction of a unit or of a protected range is
//! attributed to the range that contains the call.

mod index;
mod unit;

pub use index::{CodeIndexError, CodeUnitIndex};
pub use unit::{CatchFilter, CompiledUnit, HandlerRange, UnitStats};

/// Address to test against half-open code ranges.
#[inline]
pub const fn effective_ip(ip: usize, is_ip_past: bool) -> usize {
    if is_ip_past {
        ip.saturating_sub(1)
    } else {
        ip
    }
}
