//! Code-generator interface used by the stack walker.
//!
//! The walker never decodes a managed frame itself. Every compiled unit
//! records the generator that produced it, and the walker asks that
//! generator to unwind the frame, report its roots, and prepare it for a
//! handler.

mod baseline;

pub use baseline::{BaselineFrame, BaselineGenerator};

use crate::backend::RegisterContext;
use crate::code::CompiledUnit;
use std::fmt;
use strata_gc::{RootSink, RootSlot};

/// Frame operations a code generator provides for the units it emits.
///
/// `ctx` always describes the frame executing `unit`.
pub trait CodeGenerator: Send + Sync + fmt::Debug {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Reposition `ctx` to the caller of this frame.
    ///
    /// Callee-saved registers must be pointed at their spill slots rather
    /// than copied, and the resulting IP is a return address, so
    /// implementations must leave `ctx.is_ip_past()` set.
    fn unwind(&self, unit: &CompiledUnit, ctx: &mut RegisterContext);

    /// Report every live reference of the frame to `sink`.
    fn enumerate_roots(&self, unit: &CompiledUnit, ctx: &mut RegisterContext, sink: &mut dyn RootSink);

    /// Adjust `ctx` so the frame can resume in one of its handlers.
    fn fix_handler_context(&self, unit: &CompiledUnit, ctx: &mut RegisterContext);

    /// Slot holding the receiver of an instance method, if the frame keeps
    /// one.
    fn address_of_this(&self, unit: &CompiledUnit, ctx: &RegisterContext) -> Option<RootSlot>;
}
