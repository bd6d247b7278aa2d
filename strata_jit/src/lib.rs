//! Compiled-code side of the Strata stack walker.
//!
//! - [`backend`]: logical registers, per-target descriptors, register
//!   contexts and snapshots
//! - [`code`]: compiled units, handler tables and the global code index
//! - [`codegen`]: the interface a code generator implements so its frames
//!   can be unwound, plus the baseline generator
//! - [`gc`]: stack maps describing live references at safepoints
//!
//! ```text
//!   CodeUnitIndex ──resolve(ip)──► CompiledUnit ──generator──► dyn CodeGenerator
//!                                       │                          │
//!                                  HandlerRange[]          unwind / roots / this
//! ```
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(not(target_pointer_width = "64"))]
compile_error!("strata_jit requires a 64-bit target");

pub mod backend;
pub mod code;
pub mod codegen;
pub mod gc;

pub use backend::{ArchDescriptor, Reg, RegLocation, RegisterContext, RegisterSnapshot};
pub use code::{effective_ip, CatchFilter, CodeUnitIndex, CompiledUnit, HandlerRange};
pub use codegen::{BaselineFrame, BaselineGenerator, CodeGenerator};
