//! Strata VM stack walking and exception propagation.
//!
//! This crate walks a thread's stack across JIT-compiled managed frames and
//! native transition frames, propagates exceptions to their handlers, and
//! enumerates GC roots held by execution state.
//!
//! # Architecture
//!
//! ```text
//!   throw_exception ─┐                        RootWalker ─┐
//!                    ▼                                     ▼
//!          ExceptionPropagator ──► StackIterator ◄─────────┘
//!                    │                 │   │
//!                    │     CodeGenerator   NativeTransitionFrame
//!                    │     (strata_jit)    (frame)
//!                    ▼
//!          transfer_control ──► MachineContext ──► resume trampoline
//! ```
//!
//! - [`stack`]: the iterator, transition-frame crossing, stack traces.
//! - [`exception`]: handler search, lazy construction, the throw API.
//! - [`transfer`]: staging a register image and jumping to it.
//! - [`gc_roots`]: root enumeration over parked threads.
//! - [`thread`]: per-thread transition chains and pending exceptions.
//!
//! # Safety
//!
//! Walking reads raw stack memory. A thread's stack may only be walked by
//! the thread itself or while it is parked ([`ThreadState::is_parked`]).

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod exception;
pub mod frame;
pub mod gc_roots;
pub mod runtime;
pub mod signal;
pub mod stack;
pub mod thread;
pub mod transfer;

pub use config::VmConfig;
pub use exception::{
    raise_exception, rethrow_pending, throw_exception, throw_from_snapshot, Exception,
    ExceptionPropagator, HandlerSite, LazyException, PropagationOutcome,
};
pub use frame::{FrameType, NativeTransitionFrame};
pub use gc_roots::{RootWalkStats, RootWalker};
pub use runtime::{MonitorOps, ObjectModel, Runtime};
pub use stack::{FrameKind, StackIterator, StackTrace, TraceFrame};
pub use thread::{ThreadContext, ThreadRegistry, ThreadState, TransitionScope};
pub use transfer::{transfer_control, MachineContext};
