//! GC root enumeration over thread stacks.
//!
//! The walker reuses the stack iterator's step algorithm. Each managed
//! frame asks its code generator for live slots, each transition frame
//! reports its local handles, and the thread's pending exception (or the
//! reference arguments of a deferred one) is reported last. Register
//! contexts are never written back to the thread.

use crate::runtime::Runtime;
use crate::stack::StackIterator;
use crate::thread::{ThreadContext, ThreadRegistry};
use log::debug;
use rustc_hash::FxHashSet;
use std::ptr::NonNull;
use strata_gc::{RootSink, RootSlot};

/// Counters for one enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootWalkStats {
    /// Managed frames visited.
    pub managed_frames: usize,
    /// Transition frames visited.
    pub native_frames: usize,
    /// Slots reported.
    pub roots: usize,
}

impl RootWalkStats {
    fn merge(&mut self, other: RootWalkStats) {
        self.managed_frames += other.managed_frames;
        self.native_frames += other.native_frames;
        self.roots += other.roots;
    }
}

/// Drops repeated stack slots and counts what passes through.
///
/// A callee-saved register spilled once may be live at several safepoints
/// up the stack; the collector must see its slot only once. Pinned slots
/// are copies owned by the walker and are never deduplicated.
struct FilteredSink<'s> {
    inner: &'s mut dyn RootSink,
    seen: FxHashSet<usize>,
    roots: usize,
}

impl<'s> FilteredSink<'s> {
    fn new(inner: &'s mut dyn RootSink) -> Self {
        Self {
            inner,
            seen: FxHashSet::default(),
            roots: 0,
        }
    }
}

impl RootSink for FilteredSink<'_> {
    fn add_root(&mut self, slot: RootSlot, pinned: bool) {
        if !pinned && !self.seen.insert(slot.addr()) {
            return;
        }
        self.roots += 1;
        self.inner.add_root(slot, pinned);
    }
}

/// Enumerates the roots held by thread execution state.
#[derive(Debug, Clone, Copy)]
pub struct RootWalker<'r> {
    runtime: &'r Runtime,
}

impl<'r> RootWalker<'r> {
    /// Walker using `runtime`'s code index.
    pub fn new(runtime: &'r Runtime) -> Self {
        Self { runtime }
    }

    /// Report every root of `thread`, which must be parked or current.
    ///
    /// Register roots whose value lives only in the walker's context are
    /// reported pinned and are valid only until `sink` returns.
    pub fn walk_thread(&self, thread: &ThreadContext, sink: &mut dyn RootSink) -> RootWalkStats {
        debug_assert!(thread.is_walkable(), "thread {} is not parked", thread.id());

        let mut sink = FilteredSink::new(sink);
        let mut stats = RootWalkStats::default();
        let mut iter = StackIterator::from_thread(self.runtime, thread);

        while !iter.is_past_end() {
            if let Some(unit) = iter.unit().cloned() {
                unit.generator()
                    .enumerate_roots(&unit, iter.context_mut(), &mut sink);
                stats.managed_frames += 1;
            } else if let Some(frame) = iter.native_frame() {
                frame.handles().enumerate(&mut sink);
                stats.native_frames += 1;
            }
            iter.step();
        }

        if thread.pending_exception().is_some() {
            sink.add_root(thread.pending_slot(), false);
        }
        thread.with_pending_lazy(|lazy| {
            for arg in lazy.args.iter_mut() {
                if let Some(slot) = arg.reference_slot() {
                    // `Option<ObjectRef>` has the layout of a nullable pointer.
                    sink.add_root(RootSlot::new(NonNull::from(slot).cast()), false);
                }
            }
        });

        stats.roots = sink.roots;
        debug!(
            "thread {} roots: {} managed frames, {} native frames, {} slots",
            thread.name(),
            stats.managed_frames,
            stats.native_frames,
            stats.roots
        );
        stats
    }

    /// Report the roots of every registered thread plus the runtime's own.
    pub fn walk_all(&self, registry: &ThreadRegistry, sink: &mut dyn RootSink) -> RootWalkStats {
        let mut total = RootWalkStats::default();
        for thread in registry.threads() {
            total.merge(self.walk_thread(&thread, sink));
        }

        let mut globals = FilteredSink::new(sink);
        self.runtime.enumerate_global_roots(&mut globals);
        total.roots += globals.roots;

        debug!("root walk: {} threads, {:?}", registry.len(), total);
        total
    }
}
