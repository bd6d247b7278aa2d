//! Baseline code generator frames.
//!
//! Baseline code keeps a conventional frame-pointer chain. Every frame has
//! the same shape, so unwinding needs only the saved-register list and the
//! frame size recorded per unit.
//!
//! # Frame Layout (growing downward)
//! ```text
//! ┌───────────────────────────────┐ High addresses
//! │     Return Address            │ ← fp + 8
//! ├───────────────────────────────┤
//! │     Saved Frame Pointer       │ ← fp
//! ├───────────────────────────────┤
//! │     Saved Callee-Save Regs    │ ← slots 0..n   (fp - 8 * (k + 1))
//! ├───────────────────────────────┤
//! │     Locals / Receiver         │ ← slots n..
//! ├───────────────────────────────┤
//! │     Alignment                 │
//! └───────────────────────────────┘ ← sp = fp - frame_size
//! ```
//!
//! Unwinding points the caller's frame pointer, return address and the
//! saved registers at their slots, and sets `sp = fp + 16`.

use super::CodeGenerator;
use crate::backend::{host, ArchDescriptor, Reg, RegLocation, RegisterContext};
use crate::code::{effective_ip, CompiledUnit};
use crate::gc::StackMap;
use log::trace;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use strata_gc::{RootSink, RootSlot};

// =============================================================================
// BaselineFrame
// =============================================================================

/// Frame shape of one baseline unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BaselineFrame {
    /// Bytes between the frame pointer and the frame's stack pointer.
    pub frame_size: u32,
    /// Callee-saved registers, stored in slot order.
    pub saved_regs: SmallVec<[Reg; 8]>,
    /// Slot holding the receiver of an instance method.
    pub this_slot: Option<u8>,
}

impl BaselineFrame {
    /// Size of a frame slot in bytes.
    pub const SLOT_SIZE: usize = 8;

    /// Bytes between the frame pointer and the caller's stack pointer.
    pub const RECORD_SIZE: usize = 16;

    /// Create a frame saving `saved_regs` with `locals` local slots.
    pub fn new(saved_regs: &[Reg], locals: u8) -> Self {
        debug_assert!(
            saved_regs
                .iter()
                .all(|r| matches!(r, Reg::Gpr(_))),
            "only general-purpose registers are spilled"
        );
        let slots = saved_regs.len() + locals as usize;
        let frame_size = (slots * Self::SLOT_SIZE + 15) & !15;
        Self {
            frame_size: frame_size as u32,
            saved_regs: SmallVec::from_slice(saved_regs),
            this_slot: None,
        }
    }

    /// Keep the receiver in local slot `local`.
    pub fn with_this_local(mut self, local: u8) -> Self {
        self.this_slot = Some(self.local_slot(local));
        self
    }

    /// Slot index of local `local`.
    #[inline]
    pub fn local_slot(&self, local: u8) -> u8 {
        self.saved_regs.len() as u8 + local
    }

    /// Distance below the frame pointer of slot `slot`.
    #[inline]
    pub const fn slot_offset(slot: u8) -> usize {
        (slot as usize + 1) * Self::SLOT_SIZE
    }

    /// Address of slot `slot` in the frame at `fp`.
    #[inline]
    pub const fn slot_addr(fp: usize, slot: u8) -> usize {
        fp - Self::slot_offset(slot)
    }
}

// =============================================================================
// BaselineGenerator
// =============================================================================

#[derive(Debug)]
struct UnitMetadata {
    frame: BaselineFrame,
    stack_map: StackMap,
}

/// Frame operations for baseline-compiled units.
#[derive(Debug)]
pub struct BaselineGenerator {
    arch: &'static ArchDescriptor,
    units: RwLock<FxHashMap<usize, Arc<UnitMetadata>>>,
}

impl BaselineGenerator {
    /// Generator for the host architecture.
    pub fn new() -> Self {
        Self::for_arch(host())
    }

    /// Generator for a specific architecture.
    pub fn for_arch(arch: &'static ArchDescriptor) -> Self {
        Self {
            arch,
            units: RwLock::new(FxHashMap::default()),
        }
    }

    /// Record frame metadata for the unit starting at `stack_map.code_start`.
    pub fn register(&self, frame: BaselineFrame, stack_map: StackMap) {
        let code_start = stack_map.code_start;
        self.units
            .write()
            .insert(code_start, Arc::new(UnitMetadata { frame, stack_map }));
    }

    /// Forget the unit starting at `code_start`.
    pub fn unregister(&self, code_start: usize) -> bool {
        self.units.write().remove(&code_start).is_some()
    }

    /// Frame shape of the unit starting at `code_start`.
    pub fn frame(&self, code_start: usize) -> Option<BaselineFrame> {
        self.units.read().get(&code_start).map(|m| m.frame.clone())
    }

    fn metadata(&self, unit: &CompiledUnit) -> Option<Arc<UnitMetadata>> {
        let meta = self.units.read().get(&unit.code_start()).cloned();
        debug_assert!(
            meta.is_some(),
            "no baseline frame registered for {}",
            unit.method()
        );
        meta
    }
}

impl Default for BaselineGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator for BaselineGenerator {
    fn name(&self) -> &str {
        "baseline"
    }

    fn unwind(&self, unit: &CompiledUnit, ctx: &mut RegisterContext) {
        let fp = ctx.fp();
        debug_assert!(fp != 0, "unwinding {} without a frame pointer", unit.method());

        if let Some(meta) = self.metadata(unit) {
            for (slot, reg) in meta.frame.saved_regs.iter().enumerate() {
                let addr = BaselineFrame::slot_addr(fp, slot as u8);
                // SAFETY: spill slots belong to the frame being unwound, which
                // stays live for the duration of the walk.
                ctx.set_location(*reg, unsafe { RegLocation::saved_at(addr) });
            }
        }
        for reg in self.arch.caller_saved() {
            ctx.invalidate(reg);
        }

        // SAFETY: the frame record [fp, fp + 16) belongs to the same frame.
        unsafe {
            ctx.set_location(Reg::Ip, RegLocation::saved_at(fp + BaselineFrame::SLOT_SIZE));
            ctx.set_location(Reg::Fp, RegLocation::saved_at(fp));
        }
        ctx.set_sp(fp + BaselineFrame::RECORD_SIZE);
        ctx.set_ip_past(true);

        trace!(
            "baseline unwind {}: fp={:#x} -> ip={:#x} fp={:#x}",
            unit.method(),
            fp,
            ctx.ip(),
            ctx.fp()
        );
    }

    fn enumerate_roots(&self, unit: &CompiledUnit, ctx: &mut RegisterContext, sink: &mut dyn RootSink) {
        let Some(meta) = self.metadata(unit) else {
            return;
        };
        let ip = effective_ip(ctx.ip(), ctx.is_ip_past());
        let Some(safepoint) = meta.stack_map.lookup_address(ip).copied() else {
            trace!("no safepoint for {} at {:#x}", unit.method(), ip);
            return;
        };

        let fp = ctx.fp();
        for slot in safepoint.live_stack_slots() {
            if let Some(root) = RootSlot::from_addr(BaselineFrame::slot_addr(fp, slot)) {
                sink.add_root(root, false);
            }
        }
        for encoding in safepoint.live_registers() {
            if let Some((ptr, is_copy)) = ctx.slot_ptr(Reg::Gpr(encoding)) {
                sink.add_root(RootSlot::new(ptr.cast()), is_copy);
            }
        }
    }

    fn fix_handler_context(&self, unit: &CompiledUnit, ctx: &mut RegisterContext) {
        let frame_size = self
            .metadata(unit)
            .map_or(0, |meta| meta.frame.frame_size as usize);
        let sp = ctx.fp() - frame_size;
        ctx.set_sp(sp);
    }

    fn address_of_this(&self, unit: &CompiledUnit, ctx: &RegisterContext) -> Option<RootSlot> {
        let slot = self.metadata(unit)?.frame.this_slot?;
        RootSlot::from_addr(BaselineFrame::slot_addr(ctx.fp(), slot))
    }
}
