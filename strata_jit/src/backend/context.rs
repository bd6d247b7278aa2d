//! Register contexts and snapshots.
//!
//! A [`RegisterContext`] answers "where does each logical register's value
//! live for the frame being inspected". Every register has exactly one
//! [`RegLocation`]:
//!
//! ```text
//!  Reg::Fp ──► Saved(0x7ffd_1230)   value spilled in a callee frame
//!  Reg::Ip ──► Saved(0x7ffd_1238)   return address slot
//!  Reg::Sp ──► Scratch              computed during unwinding
//!  Reg::Gpr(0) ─► Snapshot           copied from a captured snapshot
//!  Reg::Gpr(1) ─► Unset              clobbered by a call
//! ```
//!
//! Unwinding repoints `Saved` locations at spill slots instead of copying
//! values, so a collector that rewrites a root through a slot address is
//! seeing the same word the frame will reload on return. Writing a register
//! through the context never touches stack memory: the value goes to the
//! context's scratch area and the register is relocated there.

use super::registers::{Reg, REG_SLOTS};
use std::ptr::NonNull;

// =============================================================================
// RegLocation
// =============================================================================

/// Backing storage of one register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegLocation {
    /// No known value (clobbered or never captured).
    #[default]
    Unset,
    /// A word in stack memory or a transition frame.
    Saved(NonNull<u64>),
    /// The context's copy of a captured snapshot.
    Snapshot,
    /// The context's scratch storage.
    Scratch,
}

impl RegLocation {
    /// Location for the word at `addr`. Address `0` yields `Unset`.
    ///
    /// # Safety
    ///
    /// The word must stay readable for as long as any context holding this
    /// location is used, which in practice means the owning thread stays
    /// parked or is the current thread.
    #[inline]
    pub unsafe fn saved_at(addr: usize) -> Self {
        match NonNull::new(addr as *mut u64) {
            Some(ptr) => RegLocation::Saved(ptr),
            None => RegLocation::Unset,
        }
    }

    /// Check for a stack-memory location.
    #[inline]
    pub fn is_saved(self) -> bool {
        matches!(self, RegLocation::Saved(_))
    }
}

// =============================================================================
// RegisterSnapshot
// =============================================================================

/// Flat copy of register values plus a validity mask.
///
/// Produced from a stack iterator, from a signal `ucontext`, or by a debugger
/// when it pops a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterSnapshot {
    values: [u64; REG_SLOTS],
    valid: u64,
    is_ip_past: bool,
}

impl RegisterSnapshot {
    /// Empty snapshot (nothing valid, exact IP).
    pub const fn new() -> Self {
        Self {
            values: [0; REG_SLOTS],
            valid: 0,
            is_ip_past: false,
        }
    }

    /// Builder form of [`RegisterSnapshot::set`].
    #[inline]
    pub fn with(mut self, reg: Reg, value: u64) -> Self {
        self.set(reg, value);
        self
    }

    /// Builder form of [`RegisterSnapshot::set_ip_past`].
    #[inline]
    pub fn with_ip_past(mut self, is_ip_past: bool) -> Self {
        self.is_ip_past = is_ip_past;
        self
    }

    /// Record a register value.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u64) {
        self.values[reg.slot()] = value;
        self.valid |= reg.mask();
    }

    /// Forget a register value.
    #[inline]
    pub fn invalidate(&mut self, reg: Reg) {
        self.values[reg.slot()] = 0;
        self.valid &= !reg.mask();
    }

    /// Register value, if captured.
    #[inline]
    pub fn get(&self, reg: Reg) -> Option<u64> {
        self.is_valid(reg).then(|| self.values[reg.slot()])
    }

    /// Check whether a register was captured.
    #[inline]
    pub fn is_valid(&self, reg: Reg) -> bool {
        self.valid & reg.mask() != 0
    }

    /// Validity mask, one bit per [`Reg::slot`].
    #[inline]
    pub fn valid_mask(&self) -> u64 {
        self.valid
    }

    /// Whether the captured IP is a return address.
    #[inline]
    pub fn is_ip_past(&self) -> bool {
        self.is_ip_past
    }

    /// Mark the captured IP as a return address or an exact PC.
    #[inline]
    pub fn set_ip_past(&mut self, is_ip_past: bool) {
        self.is_ip_past = is_ip_past;
    }

    /// Captured IP (0 if absent).
    #[inline]
    pub fn ip(&self) -> usize {
        self.get(Reg::Ip).unwrap_or(0) as usize
    }

    /// Captured SP (0 if absent).
    #[inline]
    pub fn sp(&self) -> usize {
        self.get(Reg::Sp).unwrap_or(0) as usize
    }

    /// Captured registers.
    pub fn registers(&self) -> impl Iterator<Item = (Reg, u64)> + '_ {
        (0..REG_SLOTS).filter_map(move |slot| {
            let reg = Reg::from_slot(slot)?;
            self.get(reg).map(|value| (reg, value))
        })
    }
}

impl Default for RegisterSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// RegisterContext
// =============================================================================

/// Per-register locations for the frame currently being inspected.
///
/// Cloning a context yields an independent duplicate: scratch and snapshot
/// storage are copied, `Saved` locations keep pointing at the same words.
#[derive(Debug, Clone)]
pub struct RegisterContext {
    locations: [RegLocation; REG_SLOTS],
    scratch: [u64; REG_SLOTS],
    captured: [u64; REG_SLOTS],
    is_ip_past: bool,
}

impl RegisterContext {
    /// Context with every register unset.
    pub fn new() -> Self {
        Self {
            locations: [RegLocation::Unset; REG_SLOTS],
            scratch: [0; REG_SLOTS],
            captured: [0; REG_SLOTS],
            is_ip_past: false,
        }
    }

    /// Context backed by a copy of `snapshot`.
    pub fn from_snapshot(snapshot: &RegisterSnapshot) -> Self {
        let mut ctx = Self::new();
        ctx.load_snapshot(snapshot);
        ctx
    }

    /// Replace every location with a copy of `snapshot`. Registers the
    /// snapshot did not capture become unset.
    pub fn load_snapshot(&mut self, snapshot: &RegisterSnapshot) {
        self.captured = snapshot.values;
        for slot in 0..REG_SLOTS {
            self.locations[slot] = if snapshot.valid & (1 << slot) != 0 {
                RegLocation::Snapshot
            } else {
                RegLocation::Unset
            };
        }
        self.is_ip_past = snapshot.is_ip_past;
    }

    /// Current location of `reg`.
    #[inline]
    pub fn location(&self, reg: Reg) -> RegLocation {
        self.locations[reg.slot()]
    }

    /// Point `reg` at a new location.
    #[inline]
    pub fn set_location(&mut self, reg: Reg, location: RegLocation) {
        self.locations[reg.slot()] = location;
    }

    /// Mark `reg` as having no known value.
    #[inline]
    pub fn invalidate(&mut self, reg: Reg) {
        self.locations[reg.slot()] = RegLocation::Unset;
    }

    /// Read `reg`, or `None` if unset.
    #[inline]
    pub fn try_get(&self, reg: Reg) -> Option<u64> {
        let slot = reg.slot();
        match self.locations[slot] {
            RegLocation::Unset => None,
            // SAFETY: `Saved` locations are only built through
            // `RegLocation::saved_at`, whose contract keeps the word readable.
            RegLocation::Saved(ptr) => Some(unsafe { ptr.as_ptr().read() }),
            RegLocation::Snapshot => Some(self.captured[slot]),
            RegLocation::Scratch => Some(self.scratch[slot]),
        }
    }

    /// Read `reg`; unset registers read as `0`.
    #[inline]
    pub fn get(&self, reg: Reg) -> u64 {
        self.try_get(reg).unwrap_or(0)
    }

    /// Write `reg` into scratch storage and relocate it there.
    #[inline]
    pub fn set(&mut self, reg: Reg, value: u64) {
        let slot = reg.slot();
        self.scratch[slot] = value;
        self.locations[slot] = RegLocation::Scratch;
    }

    /// Instruction pointer.
    #[inline]
    pub fn ip(&self) -> usize {
        self.get(Reg::Ip) as usize
    }

    /// Stack pointer.
    #[inline]
    pub fn sp(&self) -> usize {
        self.get(Reg::Sp) as usize
    }

    /// Frame pointer.
    #[inline]
    pub fn fp(&self) -> usize {
        self.get(Reg::Fp) as usize
    }

    /// Set the instruction pointer.
    #[inline]
    pub fn set_ip(&mut self, ip: usize) {
        self.set(Reg::Ip, ip as u64);
    }

    /// Set the stack pointer.
    #[inline]
    pub fn set_sp(&mut self, sp: usize) {
        self.set(Reg::Sp, sp as u64);
    }

    /// Whether the IP is a return address rather than an exact PC.
    #[inline]
    pub fn is_ip_past(&self) -> bool {
        self.is_ip_past
    }

    /// Mark the IP as a return address or an exact PC.
    #[inline]
    pub fn set_ip_past(&mut self, is_ip_past: bool) {
        self.is_ip_past = is_ip_past;
    }

    /// Address of the word backing `reg`, and whether that word is a copy
    /// owned by this context rather than the frame's real storage.
    pub fn slot_ptr(&mut self, reg: Reg) -> Option<(NonNull<u64>, bool)> {
        let slot = reg.slot();
        match self.locations[slot] {
            RegLocation::Unset => None,
            RegLocation::Saved(ptr) => Some((ptr, false)),
            RegLocation::Snapshot => Some((NonNull::from(&mut self.captured[slot]), true)),
            RegLocation::Scratch => Some((NonNull::from(&mut self.scratch[slot]), true)),
        }
    }

    /// Flatten into a snapshot. Unset registers are left invalid.
    pub fn to_snapshot(&self) -> RegisterSnapshot {
        let mut snapshot = RegisterSnapshot::new();
        for slot in 0..REG_SLOTS {
            if let Some(reg) = Reg::from_slot(slot) {
                if let Some(value) = self.try_get(reg) {
                    snapshot.set(reg, value);
                }
            }
        }
        snapshot.set_ip_past(self.is_ip_past);
        snapshot
    }
}

impl Default for RegisterContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_context_is_unset() {
        let ctx = RegisterContext::new();
        assert_eq!(ctx.try_get(Reg::Ip), None);
        assert_eq!(ctx.get(Reg::Sp), 0);
        assert_eq!(ctx.location(Reg::Gpr(3)), RegLocation::Unset);
    }

    #[test]
    fn test_saved_location_reads_through() {
        let mut word: u64 = 0x1234;
        let ptr = &mut word as *mut u64;
        let mut ctx = RegisterContext::new();
        ctx.set_location(Reg::Gpr(3), unsafe { RegLocation::saved_at(ptr as usize) });
        assert_eq!(ctx.get(Reg::Gpr(3)), 0x1234);

        unsafe { ptr.write(0x5678) };
        assert_eq!(ctx.get(Reg::Gpr(3)), 0x5678);
    }

    #[test]
    fn test_set_relocates_to_scratch_without_writing_memory() {
        let mut word: u64 = 0x1234;
        let mut ctx = RegisterContext::new();
        ctx.set_location(Reg::Fp, unsafe {
            RegLocation::saved_at(&mut word as *mut u64 as usize)
        });

        ctx.set(Reg::Fp, 0x9999);
        assert_eq!(ctx.location(Reg::Fp), RegLocation::Scratch);
        assert_eq!(ctx.fp(), 0x9999);
        assert_eq!(word, 0x1234);
    }

    #[test]
    fn test_saved_at_null_is_unset() {
        assert_eq!(unsafe { RegLocation::saved_at(0) }, RegLocation::Unset);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let snapshot = RegisterSnapshot::new()
            .with(Reg::Ip, 0x1010)
            .with(Reg::Sp, 0x7000)
            .with(Reg::Gpr(12), 42)
            .with_ip_past(true);

        let ctx = RegisterContext::from_snapshot(&snapshot);
        assert_eq!(ctx.location(Reg::Ip), RegLocation::Snapshot);
        assert_eq!(ctx.location(Reg::Gpr(0)), RegLocation::Unset);
        assert!(ctx.is_ip_past());
        assert_eq!(ctx.to_snapshot(), snapshot);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut original = RegisterContext::new();
        original.set_ip(0x100);

        let mut dup = original.clone();
        dup.set_ip(0x200);
        dup.set_ip_past(true);

        assert_eq!(original.ip(), 0x100);
        assert!(!original.is_ip_past());
        assert_eq!(dup.ip(), 0x200);
    }

    #[test]
    fn test_slot_ptr_reports_copies() {
        let mut word: u64 = 7;
        let mut ctx = RegisterContext::new();
        ctx.set_location(Reg::Gpr(3), unsafe {
            RegLocation::saved_at(&mut word as *mut u64 as usize)
        });
        ctx.set(Reg::Gpr(0), 9);

        let (ptr, copy) = ctx.slot_ptr(Reg::Gpr(3)).unwrap();
        assert_eq!(ptr.as_ptr() as usize, &mut word as *mut u64 as usize);
        assert!(!copy);

        let (ptr, copy) = ctx.slot_ptr(Reg::Gpr(0)).unwrap();
        assert!(copy);
        unsafe { ptr.as_ptr().write(11) };
        assert_eq!(ctx.get(Reg::Gpr(0)), 11);

        assert!(ctx.slot_ptr(Reg::Gpr(1)).is_none());
    }

    #[test]
    fn test_snapshot_registers_iter() {
        let snapshot = RegisterSnapshot::new()
            .with(Reg::Sp, 1)
            .with(Reg::Gpr(2), 3);
        let regs: Vec<_> = snapshot.registers().collect();
        assert_eq!(regs, vec![(Reg::Sp, 1), (Reg::Gpr(2), 3)]);

        let mut snapshot = snapshot;
        snapshot.invalidate(Reg::Sp);
        assert_eq!(snapshot.get(Reg::Sp), None);
        assert_eq!(snapshot.sp(), 0);
    }
}
