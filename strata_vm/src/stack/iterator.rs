//! The stack iterator.

use super::unwind::cross_transition_frame;
use crate::frame::NativeTransitionFrame;
use crate::runtime::Runtime;
use crate::thread::ThreadContext;
use log::trace;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use strata_core::{Method, ObjectRef};
use strata_jit::backend::{ArchDescriptor, RegisterContext, RegisterSnapshot};
use strata_jit::CompiledUnit;

/// Cursor over the frames of one thread, newest first.
///
/// The iterator is either inside a managed unit, at a native boundary (the
/// code above `native_frame()`), or past the end. Cloning yields an
/// independent cursor; stepping the clone never affects the original.
#[derive(Clone)]
pub struct StackIterator<'a> {
    runtime: &'a Runtime,
    thread: &'a ThreadContext,
    ctx: RegisterContext,
    unit: Option<Arc<CompiledUnit>>,
    m2n: Option<NonNull<NativeTransitionFrame>>,
    resume_value: Option<ObjectRef>,
}

impl<'a> StackIterator<'a> {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Start at the native code above `thread`'s newest transition frame.
    ///
    /// The thread must be the current thread or parked.
    pub fn from_thread(runtime: &'a Runtime, thread: &'a ThreadContext) -> Self {
        debug_assert!(thread.is_walkable(), "walking a running foreign thread");
        Self {
            runtime,
            thread,
            ctx: RegisterContext::new(),
            unit: None,
            m2n: thread.top_transition(),
            resume_value: None,
        }
    }

    /// Start at the registers captured in `snapshot`, typically by a signal
    /// handler or when suspending `thread`.
    pub fn from_snapshot(
        runtime: &'a Runtime,
        thread: &'a ThreadContext,
        snapshot: &RegisterSnapshot,
    ) -> Self {
        Self::from_registers(runtime, thread, snapshot, thread.top_transition())
    }

    /// Start at `snapshot` with an explicit nearest transition frame.
    ///
    /// Together with [`StackIterator::to_snapshot`] and
    /// [`StackIterator::native_frame_ptr`] this reconstructs an equivalent
    /// iterator.
    pub fn from_registers(
        runtime: &'a Runtime,
        thread: &'a ThreadContext,
        snapshot: &RegisterSnapshot,
        m2n: Option<NonNull<NativeTransitionFrame>>,
    ) -> Self {
        debug_assert!(thread.is_walkable(), "walking a running foreign thread");
        let mut iter = Self {
            runtime,
            thread,
            ctx: RegisterContext::from_snapshot(snapshot),
            unit: None,
            m2n,
            resume_value: None,
        };
        iter.resolve();
        iter
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    /// Move to the caller of the current frame.
    ///
    /// Callers must not step an iterator that is past the end. Doing so is
    /// asserted in debug builds and ignored otherwise.
    pub fn step(&mut self) {
        debug_assert!(!self.is_past_end(), "stepped past the end of the stack");

        if let Some(unit) = self.unit.take() {
            unit.generator().unwind(&unit, &mut self.ctx);
            debug_assert!(
                self.ctx.is_ip_past(),
                "{} unwinder left an exact IP",
                unit.generator().name()
            );
        } else if let Some(frame) = self.m2n {
            // SAFETY: frames in the chain of a walkable thread stay live for
            // the duration of the walk.
            let frame = unsafe { frame.as_ref() };
            // SAFETY: as above.
            unsafe { cross_transition_frame(frame, self.runtime.arch(), &mut self.ctx) };
            self.m2n = frame.prev();
        } else {
            return;
        }

        self.resolve();
        trace!("step -> {:?}", self);
    }

    fn resolve(&mut self) {
        self.unit = self
            .runtime
            .code()
            .resolve(self.ctx.ip(), self.ctx.is_ip_past());
    }

    /// Number of steps until past the end.
    pub fn depth(&self) -> usize {
        let mut probe = self.clone();
        let mut depth = 0;
        while !probe.is_past_end() {
            probe.step();
            depth += 1;
        }
        depth
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current instruction pointer.
    #[inline]
    pub fn ip(&self) -> usize {
        self.ctx.ip()
    }

    /// Current stack pointer.
    #[inline]
    pub fn sp(&self) -> usize {
        self.ctx.sp()
    }

    /// Whether [`StackIterator::ip`] is a return address.
    #[inline]
    pub fn is_ip_past(&self) -> bool {
        self.ctx.is_ip_past()
    }

    /// True at a native boundary (not in a managed unit, not past the end).
    #[inline]
    pub fn is_native(&self) -> bool {
        self.unit.is_none() && self.m2n.is_some()
    }

    /// True once every frame has been visited.
    #[inline]
    pub fn is_past_end(&self) -> bool {
        self.unit.is_none() && self.m2n.is_none()
    }

    /// Managed unit owning the current frame.
    #[inline]
    pub fn unit(&self) -> Option<&Arc<CompiledUnit>> {
        self.unit.as_ref()
    }

    /// Method of the current frame: the unit's method, or the native method
    /// recorded in the transition frame.
    pub fn method(&self) -> Option<&Arc<Method>> {
        match &self.unit {
            Some(unit) => Some(unit.method()),
            None => self.native_frame()?.method(),
        }
    }

    /// Nearest transition frame at or below the current frame.
    #[inline]
    pub fn native_frame(&self) -> Option<&NativeTransitionFrame> {
        // SAFETY: see `step`.
        self.m2n.map(|frame| unsafe { &*frame.as_ptr() })
    }

    /// Raw pointer form of [`StackIterator::native_frame`].
    #[inline]
    pub fn native_frame_ptr(&self) -> Option<NonNull<NativeTransitionFrame>> {
        self.m2n
    }

    /// Thread being walked.
    #[inline]
    pub fn thread(&self) -> &'a ThreadContext {
        self.thread
    }

    /// Runtime services.
    #[inline]
    pub fn runtime(&self) -> &'a Runtime {
        self.runtime
    }

    /// Target description.
    #[inline]
    pub fn arch(&self) -> &'static ArchDescriptor {
        self.runtime.arch()
    }

    /// Register context of the current frame.
    #[inline]
    pub fn context(&self) -> &RegisterContext {
        &self.ctx
    }

    /// Mutable register context of the current frame.
    #[inline]
    pub fn context_mut(&mut self) -> &mut RegisterContext {
        &mut self.ctx
    }

    /// Value delivered in the result register on resumption.
    #[inline]
    pub fn resume_value(&self) -> Option<ObjectRef> {
        self.resume_value
    }

    /// Set the value delivered on resumption.
    #[inline]
    pub fn set_resume_value(&mut self, value: Option<ObjectRef>) {
        self.resume_value = value;
    }

    /// Clear the resumption value.
    #[inline]
    pub fn clear_resume_value(&mut self) {
        self.resume_value = None;
    }

    /// Redirect the current frame to the exact address `ip`.
    pub fn set_ip(&mut self, ip: usize) {
        debug_assert!(
            self.runtime.arch().can_set_ip,
            "{} cannot set the instruction pointer",
            self.runtime.arch().name
        );
        debug_assert!(
            self.unit.as_ref().is_none_or(|unit| unit.contains(ip, false)),
            "{ip:#x} is outside the current unit"
        );
        self.ctx.set_ip(ip);
        self.ctx.set_ip_past(false);
    }

    /// Flatten the register state.
    #[inline]
    pub fn to_snapshot(&self) -> RegisterSnapshot {
        self.ctx.to_snapshot()
    }
}

impl fmt::Debug for StackIterator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("StackIterator");
        s.field("ip", &format_args!("{:#x}", self.ip()))
            .field("sp", &format_args!("{:#x}", self.sp()))
            .field("past", &self.is_ip_past());
        if let Some(unit) = &self.unit {
            s.field("unit", &format_args!("{}", unit.method()));
        } else if let Some(frame) = self.m2n {
            s.field("native", &frame);
        } else {
            s.field("past_end", &true);
        }
        s.finish()
    }
}
