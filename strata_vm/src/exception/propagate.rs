//! Exception propagation.
//!
//! Propagation walks a [`StackIterator`] from the throw point towards older
//! frames and stops at the first handler that accepts the exception:
//!
//! ```text
//!   throw ──► [native]  step once
//!             [M3]      no matching range ─► release monitor? ─► step
//!             [M2]      handler matches    ─► fix context, set IP, stop
//!             ...
//!             [native]  nothing matched    ─► record pending, stop
//! ```
//!
//! The walk is destructive: frames it leaves behind are abandoned, and any
//! monitor held by a synchronized method it unwinds is released before the
//! step. [`ExceptionPropagator::find_handler`] runs the same search on a
//! duplicate iterator with no side effects.

use super::{Exception, LazyException};
use crate::runtime::Runtime;
use crate::stack::{StackIterator, StackTrace};
use log::{debug, trace, warn};
use std::sync::Arc;
use strata_core::{AllocError, Class, Method, ObjectRef};
use strata_jit::CompiledUnit;

// =============================================================================
// Outcome
// =============================================================================

/// Where propagation stopped.
#[derive(Debug, Clone)]
pub enum PropagationOutcome {
    /// A managed handler accepted the exception. The iterator is positioned
    /// at the handler entry with the exception as its resumption value.
    Caught {
        /// Handler entry address.
        handler_ip: usize,
        /// Method containing the handler.
        method: Arc<Method>,
        /// Delivered exception; `None` if the handler ignores it and it was
        /// never constructed.
        exception: Option<ObjectRef>,
        /// Lazy construction failed and the out-of-memory singleton was
        /// substituted.
        out_of_memory: bool,
        /// Managed frames abandoned before the handler's frame.
        frames_unwound: usize,
    },
    /// No handler before the next native boundary. The exception is now the
    /// thread's pending exception.
    Unhandled {
        /// The pending exception.
        exception: ObjectRef,
        /// Lazy construction failed and the out-of-memory singleton was
        /// substituted.
        out_of_memory: bool,
        /// Trace captured at the throw point.
        trace: Option<StackTrace>,
    },
}

impl PropagationOutcome {
    /// Check for a caught exception.
    #[inline]
    pub fn is_caught(&self) -> bool {
        matches!(self, PropagationOutcome::Caught { .. })
    }

    /// The exception object, if one exists.
    pub fn exception(&self) -> Option<ObjectRef> {
        match self {
            PropagationOutcome::Caught { exception, .. } => *exception,
            PropagationOutcome::Unhandled { exception, .. } => Some(*exception),
        }
    }

    /// True if the out-of-memory singleton replaced the thrown exception.
    pub fn out_of_memory(&self) -> bool {
        match self {
            PropagationOutcome::Caught { out_of_memory, .. }
            | PropagationOutcome::Unhandled { out_of_memory, .. } => *out_of_memory,
        }
    }
}

/// Result of the side-effect-free search pass.
#[derive(Debug, Clone)]
pub struct HandlerSite {
    /// Managed frames that would be abandoned.
    pub frames_unwound: usize,
    /// Method containing the handler.
    pub method: Arc<Method>,
    /// Handler entry address.
    pub handler_ip: usize,
}

// =============================================================================
// ExceptionPropagator
// =============================================================================

/// Finds handlers and unwinds to them.
#[derive(Debug, Clone, Copy)]
pub struct ExceptionPropagator<'r> {
    runtime: &'r Runtime,
}

impl<'r> ExceptionPropagator<'r> {
    /// Propagator using `runtime`'s object model and monitors.
    pub fn new(runtime: &'r Runtime) -> Self {
        Self { runtime }
    }

    /// Unwind `iter` to the handler for `exception`, or to the next native
    /// boundary if no managed frame catches it.
    pub fn propagate(&self, iter: &mut StackIterator<'_>, exception: Exception) -> PropagationOutcome {
        let config = self.runtime.config();
        let objects = self.runtime.objects();

        let mut exception = exception;
        let mut class = exception.class(objects);
        let mut out_of_memory = false;

        let trace = config
            .capture_stack_traces
            .then(|| StackTrace::capture(iter, config.max_trace_frames));

        if config.trace_exceptions {
            match self.find_handler(iter, &class) {
                Some(site) => debug!(
                    "throw {}: handler {}@{:#x} after {} frames",
                    class, site.method, site.handler_ip, site.frames_unwound
                ),
                None => debug!("throw {}: no managed handler", class),
            }
        }

        if iter.is_native() {
            iter.step();
        }

        let mut frames_unwound = 0;
        while let Some(unit) = iter.unit().cloned() {
            let handler = unit
                .find_handler(iter.ip(), iter.is_ip_past(), &class)
                .map(|h| (h.handler_ip, h.exception_unused));

            let Some((handler_ip, exception_unused)) = handler else {
                trace!("{} does not catch {}", unit.method(), class);
                unit.stats().record_unwind();
                self.release_monitor(&unit, iter);
                iter.step();
                frames_unwound += 1;
                continue;
            };

            let materialized = match &exception {
                Exception::Instance(obj) => Ok(Some(*obj)),
                Exception::Deferred(_) if exception_unused => Ok(None),
                Exception::Deferred(lazy) => self.materialize(lazy).map(Some),
            };
            let instance = match materialized {
                Ok(instance) => instance,
                Err(err) => {
                    // Retry this frame with the singleton; the handler may
                    // not accept it.
                    exception = Exception::Instance(self.substitute_out_of_memory(&class, err));
                    class = exception.class(objects);
                    out_of_memory = true;
                    continue;
                }
            };

            unit.generator().fix_handler_context(&unit, iter.context_mut());
            iter.set_ip(handler_ip);
            iter.set_resume_value(instance);
            unit.stats().record_catch();

            debug!(
                "caught {} in {} at {:#x} after {} frames",
                class,
                unit.method(),
                handler_ip,
                frames_unwound
            );
            return PropagationOutcome::Caught {
                handler_ip,
                method: Arc::clone(unit.method()),
                exception: instance,
                out_of_memory,
                frames_unwound,
            };
        }

        let pending = match exception {
            Exception::Instance(obj) => obj,
            Exception::Deferred(lazy) => self.materialize(&lazy).unwrap_or_else(|err| {
                out_of_memory = true;
                self.substitute_out_of_memory(&class, err)
            }),
        };
        iter.thread().set_pending_exception(Some(pending));
        iter.clear_resume_value();

        debug!(
            "unhandled {} reached native code after {} frames (thread {})",
            class,
            frames_unwound,
            iter.thread().name()
        );
        PropagationOutcome::Unhandled {
            exception: pending,
            out_of_memory,
            trace,
        }
    }

    /// Search for the handler `propagate` would stop at, without unwinding,
    /// releasing monitors or allocating.
    pub fn find_handler(&self, iter: &StackIterator<'_>, class: &Class) -> Option<HandlerSite> {
        let mut walker = iter.clone();
        if walker.is_native() {
            walker.step();
        }

        let mut frames_unwound = 0;
        while let Some(unit) = walker.unit().cloned() {
            if let Some(handler) = unit.find_handler(walker.ip(), walker.is_ip_past(), class) {
                return Some(HandlerSite {
                    frames_unwound,
                    method: Arc::clone(unit.method()),
                    handler_ip: handler.handler_ip,
                });
            }
            walker.step();
            frames_unwound += 1;
        }
        None
    }

    fn materialize(&self, lazy: &LazyException) -> Result<ObjectRef, AllocError> {
        self.runtime
            .objects()
            .instantiate(&lazy.class, lazy.constructor.as_deref(), &lazy.args)
    }

    fn substitute_out_of_memory(&self, class: &Class, err: AllocError) -> ObjectRef {
        warn!("constructing {} failed ({}); throwing out-of-memory instead", class, err);
        self.runtime.out_of_memory()
    }

    /// Release the monitor a synchronized method holds while its frame is
    /// abandoned.
    fn release_monitor(&self, unit: &CompiledUnit, iter: &StackIterator<'_>) {
        let method = unit.method();
        if !method.is_synchronized() {
            return;
        }

        let monitor = if method.is_static() {
            Some(self.runtime.objects().class_mirror(method.class()))
        } else {
            unit.generator()
                .address_of_this(unit, iter.context())
                // SAFETY: the receiver slot lies in the frame being unwound.
                .and_then(|slot| unsafe { slot.load() })
        };

        match monitor {
            Some(obj) => {
                debug!("releasing monitor {:?} held by {}", obj, method);
                self.runtime.monitors().monitor_exit(obj);
            }
            None => warn!("{} is synchronized but its receiver is unavailable", method),
        }
    }
}
