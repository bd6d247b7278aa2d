//! Stack walking.
//!
//! A thread's stack interleaves managed frames (owned by a compiled unit)
//! with native code, each native stretch sitting above a transition frame:
//!
//! ```text
//!   newest ┌───────────────────────┐
//!          │ native code           │  iterator starts here (is_native)
//!          ├── transition frame B ─┤  crossed by the m2n rule
//!          │ managed M3            │  unwound by M3's code generator
//!          │ managed M2            │
//!          ├── transition frame A ─┤
//!          │ native entry          │
//!   oldest └───────────────────────┘  past end
//! ```
//!
//! Each step either unwinds one managed frame through its
//! [`CodeGenerator`](strata_jit::CodeGenerator) or crosses one transition
//! frame, then resolves the resulting IP against the code-unit index. A walk
//! from the top therefore takes exactly one step per managed frame plus one
//! per transition frame.

mod iterator;
mod trace;
mod unwind;

pub use iterator::StackIterator;
pub use trace::{FrameKind, StackTrace, TraceFrame};
