//! Strata GC root interfaces.
//!
//! The collector's mark and sweep phases live elsewhere. This crate defines
//! the narrow surface the stack walker uses to hand roots to them:
//!
//! - [`RootSlot`]: the address of a word that holds an object reference.
//! - [`RootSink`]: the callback the collector installs for one enumeration.
//! - [`LocalHandles`]: a chunked chain of handle slots owned by a native
//!   transition frame, so native code can keep objects alive across calls.
//!
//! # Safety
//!
//! Root slots are raw addresses into thread stacks and handle blocks. They
//! are only valid while the owning thread is parked for the enumeration.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod roots;

pub use roots::{LocalHandle, LocalHandles, RootCollector, RootSink, RootSlot};
