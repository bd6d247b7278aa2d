//! Per-thread walking state.
//!
//! Every mutator thread owns one [`ThreadContext`]: the head of its
//! transition-frame chain, its pending exception, and the state the
//! safepoint protocol leaves it in. Only the owning thread pushes and pops
//! transition frames; other threads read the chain only while the owner is
//! parked.

use crate::exception::{Exception, LazyException};
use crate::frame::NativeTransitionFrame;
use log::trace;
use parking_lot::{Mutex, RwLock};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use strata_core::ObjectRef;
use strata_gc::RootSlot;

// =============================================================================
// ThreadState
// =============================================================================

/// Where a mutator thread currently is with respect to the safepoint
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThreadState {
    /// Executing managed code.
    Running = 0,
    /// Executing native code below a transition frame.
    InNative = 1,
    /// Stopped for inspection.
    Suspended = 2,
    /// Parked at a GC safepoint.
    AtSafepoint = 3,
}

impl ThreadState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ThreadState::InNative,
            2 => ThreadState::Suspended,
            3 => ThreadState::AtSafepoint,
            _ => ThreadState::Running,
        }
    }

    /// True if the thread cannot mutate its own stack.
    #[inline]
    pub fn is_parked(self) -> bool {
        matches!(self, ThreadState::Suspended | ThreadState::AtSafepoint)
    }
}

// =============================================================================
// ThreadContext
// =============================================================================

/// Walking state owned by one mutator thread.
#[derive(Debug)]
pub struct ThreadContext {
    id: u64,
    name: String,
    owner: ThreadId,
    top: AtomicPtr<NativeTransitionFrame>,
    depth: AtomicUsize,
    state: AtomicU8,
    /// Raw bits of the concrete pending exception (0 = none).
    pending: AtomicUsize,
    pending_lazy: Mutex<Option<LazyException>>,
}

// Safety: the transition chain is only mutated by the owning thread and only
// read by others while the owner is parked.
unsafe impl Send for ThreadContext {}
unsafe impl Sync for ThreadContext {}

impl ThreadContext {
    /// Context owned by the calling OS thread.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner: std::thread::current().id(),
            top: AtomicPtr::new(ptr::null_mut()),
            depth: AtomicUsize::new(0),
            state: AtomicU8::new(ThreadState::Running as u8),
            pending: AtomicUsize::new(0),
            pending_lazy: Mutex::new(None),
        }
    }

    /// VM thread id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Thread name, as printed for unhandled exceptions.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from the owning OS thread.
    #[inline]
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.owner
    }

    /// Safepoint state.
    #[inline]
    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record a safepoint state transition.
    #[inline]
    pub fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// True if the stack may be walked from the calling thread.
    #[inline]
    pub fn is_walkable(&self) -> bool {
        self.is_current() || self.state().is_parked()
    }

    // -------------------------------------------------------------------------
    // Transition frames
    // -------------------------------------------------------------------------

    /// Newest transition frame.
    #[inline]
    pub fn top_transition(&self) -> Option<NonNull<NativeTransitionFrame>> {
        NonNull::new(self.top.load(Ordering::Acquire))
    }

    /// Number of pushed transition frames.
    #[inline]
    pub fn transition_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    /// Link `frame` on top of the chain.
    ///
    /// # Safety
    ///
    /// `frame` must stay valid and unmoved until it is popped, and must be
    /// popped before any frame pushed earlier.
    pub unsafe fn push_transition(&self, frame: NonNull<NativeTransitionFrame>) {
        debug_assert!(self.is_current(), "transition frames are thread-owned");
        let prev = self.top_transition();
        // SAFETY: guaranteed by the caller.
        unsafe { (*frame.as_ptr()).set_prev(prev) };
        self.top.store(frame.as_ptr(), Ordering::Release);
        self.depth.fetch_add(1, Ordering::Relaxed);
        trace!("thread {}: push transition {:p}", self.id, frame);
    }

    /// Unlink the newest transition frame. Only the owning thread may pop.
    pub fn pop_transition(&self) -> Option<NonNull<NativeTransitionFrame>> {
        debug_assert!(self.is_current(), "transition frames are thread-owned");
        let top = self.top_transition()?;
        // SAFETY: pushed frames stay valid until popped.
        let prev = unsafe { top.as_ref() }.prev();
        self.top.store(
            prev.map_or(ptr::null_mut(), NonNull::as_ptr),
            Ordering::Release,
        );
        self.depth.fetch_sub(1, Ordering::Relaxed);
        trace!("thread {}: pop transition {:p}", self.id, top);
        Some(top)
    }

    /// Push `frame` for the lifetime of the returned guard.
    pub fn enter_native<'f>(&'f self, frame: &'f mut NativeTransitionFrame) -> TransitionScope<'f> {
        let frame = NonNull::from(frame);
        // SAFETY: the frame is mutably borrowed for the guard's lifetime and
        // the guard pops it on drop.
        unsafe { self.push_transition(frame) };
        TransitionScope {
            thread: self,
            frame,
        }
    }

    // -------------------------------------------------------------------------
    // Pending exception
    // -------------------------------------------------------------------------

    /// Concrete pending exception.
    #[inline]
    pub fn pending_exception(&self) -> Option<ObjectRef> {
        ObjectRef::from_bits(self.pending.load(Ordering::Acquire))
    }

    /// True if any exception (concrete or deferred) is pending.
    pub fn has_pending(&self) -> bool {
        self.pending_exception().is_some() || self.pending_lazy.lock().is_some()
    }

    /// Make `obj` the pending exception, replacing anything pending.
    pub fn set_pending_exception(&self, obj: Option<ObjectRef>) {
        *self.pending_lazy.lock() = None;
        self.pending.store(ObjectRef::bits_of(obj), Ordering::Release);
    }

    /// Record `exception` as pending without constructing it.
    pub fn set_pending(&self, exception: Exception) {
        match exception {
            Exception::Instance(obj) => self.set_pending_exception(Some(obj)),
            Exception::Deferred(lazy) => {
                self.pending.store(0, Ordering::Release);
                *self.pending_lazy.lock() = Some(lazy);
            }
        }
    }

    /// Remove and return the pending exception.
    pub fn take_pending(&self) -> Option<Exception> {
        if let Some(lazy) = self.pending_lazy.lock().take() {
            return Some(Exception::Deferred(lazy));
        }
        ObjectRef::from_bits(self.pending.swap(0, Ordering::AcqRel)).map(Exception::Instance)
    }

    /// Drop any pending exception.
    pub fn clear_pending(&self) {
        self.set_pending_exception(None);
    }

    /// Slot holding the concrete pending exception.
    pub fn pending_slot(&self) -> RootSlot {
        // SAFETY: `AtomicUsize::as_ptr` never returns null.
        RootSlot::new(unsafe { NonNull::new_unchecked(self.pending.as_ptr()) })
    }

    /// Run `f` on the deferred pending exception, if any.
    pub fn with_pending_lazy<R>(&self, f: impl FnOnce(&mut LazyException) -> R) -> Option<R> {
        self.pending_lazy.lock().as_mut().map(f)
    }
}

// =============================================================================
// TransitionScope
// =============================================================================

/// Guard returned by [`ThreadContext::enter_native`]; pops its frame on drop.
#[must_use = "dropping the scope pops the transition frame immediately"]
pub struct TransitionScope<'f> {
    thread: &'f ThreadContext,
    frame: NonNull<NativeTransitionFrame>,
}

impl TransitionScope<'_> {
    /// The pushed frame.
    #[inline]
    pub fn frame(&self) -> NonNull<NativeTransitionFrame> {
        self.frame
    }
}

impl Drop for TransitionScope<'_> {
    fn drop(&mut self) {
        let popped = self.thread.pop_transition();
        debug_assert_eq!(
            popped,
            Some(self.frame),
            "transition frames must be popped in LIFO order"
        );
    }
}

// =============================================================================
// ThreadRegistry
// =============================================================================

/// All attached mutator threads, for stop-the-world root enumeration.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: RwLock<Vec<Arc<ThreadContext>>>,
}

impl ThreadRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(Vec::new()),
        }
    }

    /// Attach a thread.
    pub fn register(&self, thread: Arc<ThreadContext>) {
        self.threads.write().push(thread);
    }

    /// Detach the thread with VM id `id`.
    pub fn unregister(&self, id: u64) -> Option<Arc<ThreadContext>> {
        let mut threads = self.threads.write();
        let index = threads.iter().position(|t| t.id() == id)?;
        Some(threads.swap_remove(index))
    }

    /// Snapshot of the attached threads.
    pub fn threads(&self) -> Vec<Arc<ThreadContext>> {
        self.threads.read().clone()
    }

    /// Number of attached threads.
    pub fn len(&self) -> usize {
        self.threads.read().len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.threads.read().is_empty()
    }
}
