//! Throwing from native code and signal handlers.

use super::{Exception, ExceptionPropagator, PropagationOutcome};
use crate::runtime::Runtime;
use crate::stack::{StackIterator, StackTrace};
use crate::thread::ThreadContext;
use crate::transfer::transfer_control;
use log::debug;
use std::fmt::Write as _;
use strata_core::ObjectRef;
use strata_jit::backend::RegisterSnapshot;

/// Throw `exception` from native code running above `thread`'s newest
/// transition frame, and resume at the handler or at the native boundary
/// with the exception pending.
///
/// # Safety
///
/// `thread` must be the current thread. Every Rust frame above the resumed
/// frame is discarded without running destructors, so none of them may own
/// resources that must be dropped.
pub unsafe fn throw_exception(
    runtime: &Runtime,
    thread: &ThreadContext,
    exception: impl Into<Exception>,
) -> ! {
    debug_assert!(thread.is_current(), "throwing on a foreign thread");
    let mut iter = StackIterator::from_thread(runtime, thread);
    let outcome = ExceptionPropagator::new(runtime).propagate(&mut iter, exception.into());
    // SAFETY: the walk started on the current thread per the caller.
    unsafe { finish(runtime, iter, outcome) }
}

/// Throw `exception` from the managed code interrupted at `snapshot`,
/// typically a fault decoded in a signal handler.
///
/// # Safety
///
/// As [`throw_exception`]; additionally `snapshot` must describe a frame of
/// the current thread's stack.
pub unsafe fn throw_from_snapshot(
    runtime: &Runtime,
    thread: &ThreadContext,
    snapshot: &RegisterSnapshot,
    exception: impl Into<Exception>,
) -> ! {
    debug_assert!(thread.is_current(), "throwing on a foreign thread");
    let mut iter = StackIterator::from_snapshot(runtime, thread, snapshot);
    let outcome = ExceptionPropagator::new(runtime).propagate(&mut iter, exception.into());
    // SAFETY: the walk started on the current thread per the caller.
    unsafe { finish(runtime, iter, outcome) }
}

/// Report an exception that escaped every frame, then resume where `iter`
/// stopped.
///
/// # Safety
///
/// As [`transfer_control`].
unsafe fn finish(runtime: &Runtime, iter: StackIterator<'_>, outcome: PropagationOutcome) -> ! {
    if let PropagationOutcome::Unhandled {
        exception, trace, ..
    } = &outcome
    {
        if iter.is_past_end() && runtime.config().print_unhandled {
            report_unhandled(runtime, iter.thread(), *exception, trace.as_ref());
        }
    }
    // SAFETY: guaranteed by the caller.
    unsafe { transfer_control(iter) }
}

/// Record `exception` as pending for native callers without unwinding.
///
/// The native code is expected to return normally; the pending exception is
/// rethrown when control reaches managed code.
pub fn raise_exception(thread: &ThreadContext, exception: impl Into<Exception>) {
    let exception = exception.into();
    debug!("raise {:?} on thread {}", exception, thread.name());
    thread.set_pending(exception);
}

/// Throw the pending exception of `thread`, if any. Returns only when
/// nothing is pending.
///
/// # Safety
///
/// As [`throw_exception`].
pub unsafe fn rethrow_pending(runtime: &Runtime, thread: &ThreadContext) {
    if let Some(exception) = thread.take_pending() {
        // SAFETY: guaranteed by the caller.
        unsafe { throw_exception(runtime, thread, exception) }
    }
}

/// Render an unhandled exception the way a top-level default handler does.
pub fn format_unhandled(thread_name: &str, class_name: &str, trace: Option<&StackTrace>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Exception in thread \"{}\" {}", thread_name, class_name);
    if let Some(trace) = trace {
        let _ = write!(out, "{}", trace);
    }
    out
}

/// Print an unhandled exception to stderr.
pub fn report_unhandled(
    runtime: &Runtime,
    thread: &ThreadContext,
    exception: ObjectRef,
    trace: Option<&StackTrace>,
) {
    let class = runtime.objects().class_of(exception);
    eprint!("{}", format_unhandled(thread.name(), class.name(), trace));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_without_trace() {
        assert_eq!(
            format_unhandled("main", "java.lang.NullPointerException", None),
            "Exception in thread \"main\" java.lang.NullPointerException\n"
        );
    }

    #[test]
    fn test_format_with_empty_trace() {
        let trace = StackTrace::default();
        assert_eq!(
            format_unhandled("worker-1", "E", Some(&trace)),
            "Exception in thread \"worker-1\" E\n"
        );
    }
}
