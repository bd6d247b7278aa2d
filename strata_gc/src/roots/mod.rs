//! Root slots and sinks.
//!
//! GC roots reported by a stack walk come from:
//! - Stack slots of managed frames (from compiler stack maps)
//! - Registers saved in callee frames or captured in snapshots
//! - Local handles of native transition frames
//! - A thread's pending exception

mod handles;

pub use handles::{LocalHandle, LocalHandles, HANDLE_BLOCK_SIZE};

use std::fmt;
use std::ptr::NonNull;
use strata_core::ObjectRef;

// =============================================================================
// RootSlot
// =============================================================================

/// Address of a word that holds an object reference (or `0` for null).
///
/// A moving collector may rewrite the slot through [`RootSlot::store`]
/// unless it was reported pinned.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootSlot(NonNull<usize>);

impl RootSlot {
    /// Wrap a slot pointer.
    #[inline]
    pub fn new(ptr: NonNull<usize>) -> Self {
        Self(ptr)
    }

    /// Wrap a raw slot address. Returns `None` for address `0`.
    #[inline]
    pub fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut usize).map(Self)
    }

    /// Slot address.
    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Slot pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Read the reference held in the slot.
    ///
    /// # Safety
    ///
    /// The slot must point to live, readable memory (the owning thread is
    /// parked or is the current thread).
    #[inline]
    pub unsafe fn load(self) -> Option<ObjectRef> {
        // SAFETY: guaranteed by the caller.
        ObjectRef::from_bits(unsafe { self.0.as_ptr().read() })
    }

    /// Overwrite the reference held in the slot.
    ///
    /// # Safety
    ///
    /// Same as [`RootSlot::load`], and the slot must be writable.
    #[inline]
    pub unsafe fn store(self, obj: Option<ObjectRef>) {
        // SAFETY: guaranteed by the caller.
        unsafe { self.0.as_ptr().write(ObjectRef::bits_of(obj)) }
    }
}

impl fmt::Debug for RootSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RootSlot({:#x})", self.addr())
    }
}

// =============================================================================
// RootSink
// =============================================================================

/// Receiver of root slots during an enumeration.
///
/// `pinned` marks slots the collector must not update, such as register
/// values copied out of a snapshot.
pub trait RootSink {
    /// Report one root slot.
    fn add_root(&mut self, slot: RootSlot, pinned: bool);
}

impl<F> RootSink for F
where
    F: FnMut(RootSlot, bool),
{
    #[inline]
    fn add_root(&mut self, slot: RootSlot, pinned: bool) {
        self(slot, pinned)
    }
}

// =============================================================================
// RootCollector
// =============================================================================

/// A sink that records every reported slot.
#[derive(Debug, Default)]
pub struct RootCollector {
    roots: Vec<(RootSlot, bool)>,
}

impl RootCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self { roots: Vec::new() }
    }

    /// All recorded `(slot, pinned)` pairs, in report order.
    pub fn roots(&self) -> &[(RootSlot, bool)] {
        &self.roots
    }

    /// Number of recorded slots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Number of pinned slots.
    pub fn pinned_count(&self) -> usize {
        self.roots.iter().filter(|(_, pinned)| *pinned).count()
    }

    /// Check whether a slot address was reported.
    pub fn contains_addr(&self, addr: usize) -> bool {
        self.roots.iter().any(|(slot, _)| slot.addr() == addr)
    }

    /// Read every non-null reference currently held by the recorded slots.
    ///
    /// # Safety
    ///
    /// Every recorded slot must still be readable.
    pub unsafe fn objects(&self) -> Vec<ObjectRef> {
        self.roots
            .iter()
            // SAFETY: guaranteed by the caller.
            .filter_map(|(slot, _)| unsafe { slot.load() })
            .collect()
    }
}

impl RootSink for RootCollector {
    #[inline]
    fn add_root(&mut self, slot: RootSlot, pinned: bool) {
        self.roots.push((slot, pinned));
    }
}
