//! Local handle chains.
//!
//! Native code that holds object references across a call back into the VM
//! stores them in a [`LocalHandles`] chain owned by its transition frame.
//! Handle slots live in fixed-size blocks that never move, so a slot address
//! handed to the collector stays valid while more handles are created.
//!
//! ```text
//! LocalHandles
//!   blocks[0]: [h0][h1] ... [h31]
//!   blocks[1]: [h32][h33] ... (len = 34)
//! ```

use super::{RootSink, RootSlot};
use std::cell::Cell;
use std::ptr::NonNull;
use strata_core::ObjectRef;

/// Number of handle slots per block.
pub const HANDLE_BLOCK_SIZE: usize = 32;

type HandleBlock = Box<[Cell<usize>; HANDLE_BLOCK_SIZE]>;

/// Index of a handle within its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalHandle(u32);

impl LocalHandle {
    /// Position in the chain.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Chunked chain of locally rooted object references.
#[derive(Debug, Default)]
pub struct LocalHandles {
    blocks: Vec<HandleBlock>,
    len: usize,
}

impl LocalHandles {
    /// Create an empty chain. No block is allocated until the first handle.
    pub const fn new() -> Self {
        Self {
            blocks: Vec::new(),
            len: 0,
        }
    }

    /// Root `obj` in a new handle.
    pub fn push(&mut self, obj: Option<ObjectRef>) -> LocalHandle {
        let (block, offset) = (self.len / HANDLE_BLOCK_SIZE, self.len % HANDLE_BLOCK_SIZE);
        if block == self.blocks.len() {
            self.blocks
                .push(Box::new(std::array::from_fn(|_| Cell::new(0))));
        }
        self.blocks[block][offset].set(ObjectRef::bits_of(obj));
        let handle = LocalHandle(self.len as u32);
        self.len += 1;
        handle
    }

    /// Read the reference held by `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not belong to this chain.
    pub fn get(&self, handle: LocalHandle) -> Option<ObjectRef> {
        ObjectRef::from_bits(self.cell(handle).get())
    }

    /// Replace the reference held by `handle`.
    pub fn set(&self, handle: LocalHandle, obj: Option<ObjectRef>) {
        self.cell(handle).set(ObjectRef::bits_of(obj));
    }

    /// Number of live handles.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no handle has been created.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release every handle, keeping the first block for reuse.
    pub fn clear(&mut self) {
        self.blocks.truncate(1);
        self.len = 0;
    }

    /// Report every handle slot to `sink`. Null handles are reported too, so
    /// the collector sees a stable slot count.
    pub fn enumerate(&self, sink: &mut dyn RootSink) {
        for index in 0..self.len {
            let cell = &self.blocks[index / HANDLE_BLOCK_SIZE][index % HANDLE_BLOCK_SIZE];
            sink.add_root(RootSlot::new(Self::slot_ptr(cell)), false);
        }
    }

    #[inline]
    fn cell(&self, handle: LocalHandle) -> &Cell<usize> {
        let index = handle.index();
        assert!(index < self.len, "handle {index} out of range");
        &self.blocks[index / HANDLE_BLOCK_SIZE][index % HANDLE_BLOCK_SIZE]
    }

    #[inline]
    fn slot_ptr(cell: &Cell<usize>) -> NonNull<usize> {
        // SAFETY: `Cell::as_ptr` never returns null.
        unsafe { NonNull::new_unchecked(cell.as_ptr()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::RootCollector;

    fn obj(bits: usize) -> Option<ObjectRef> {
        ObjectRef::from_bits(bits)
    }

    #[test]
    fn test_push_and_get() {
        let mut handles = LocalHandles::new();
        assert!(handles.is_empty());

        let a = handles.push(obj(0x10));
        let b = handles.push(None);
        assert_eq!(handles.len(), 2);
        assert_eq!(handles.get(a), obj(0x10));
        assert_eq!(handles.get(b), None);

        handles.set(b, obj(0x20));
        assert_eq!(handles.get(b), obj(0x20));
    }

    #[test]
    fn test_slots_are_stable_across_growth() {
        let mut handles = LocalHandles::new();
        handles.push(obj(0x10));

        let mut before = RootCollector::new();
        handles.enumerate(&mut before);
        let first_addr = before.roots()[0].0.addr();

        for i in 0..(HANDLE_BLOCK_SIZE * 3) {
            handles.push(obj(0x100 + i * 8));
        }

        let mut after = RootCollector::new();
        handles.enumerate(&mut after);
        assert_eq!(after.len(), 1 + HANDLE_BLOCK_SIZE * 3);
        assert_eq!(after.roots()[0].0.addr(), first_addr);
    }

    #[test]
    fn test_collector_updates_are_visible() {
        let mut handles = LocalHandles::new();
        let h = handles.push(obj(0x10));

        let mut collector = RootCollector::new();
        handles.enumerate(&mut collector);
        let (slot, pinned) = collector.roots()[0];
        assert!(!pinned);

        unsafe { slot.store(obj(0x80)) };
        assert_eq!(handles.get(h), obj(0x80));
    }

    #[test]
    fn test_clear() {
        let mut handles = LocalHandles::new();
        for _ in 0..40 {
            handles.push(obj(0x10));
        }
        handles.clear();
        assert!(handles.is_empty());

        let mut collector = RootCollector::new();
        handles.enumerate(&mut collector);
        assert!(collector.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_stale_handle_panics() {
        let mut handles = LocalHandles::new();
        let h = handles.push(obj(0x10));
        handles.clear();
        handles.get(h);
    }
}
