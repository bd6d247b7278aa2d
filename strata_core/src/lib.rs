//! Strata core types.
//!
//! Shared vocabulary for the stack-walking and exception-propagation crates:
//!
//! - [`ObjectRef`]: an opaque, non-null reference to a heap object.
//! - [`Value`]: a constructor argument or register payload.
//! - [`Class`] and [`Method`]: the slice of the class model the unwinder needs
//!   (ancestor checks for handler filters, synchronization flags).
//! - [`VmError`] and [`AllocError`]: error types surfaced by the runtime.
//!
//! Object layout, allocation strategy and class loading live elsewhere; this
//! crate only names things.

#![warn(missing_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod class;
pub mod error;
pub mod object;
pub mod value;

pub use class::{Class, ClassId, Method, MethodFlags};
pub use error::{AllocError, VmError, VmResult};
pub use object::ObjectRef;
pub use value::{Args, Value};

/// Crate version, reported in diagnostics.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
