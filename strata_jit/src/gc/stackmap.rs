//! Stack maps for GC safepoints.
//!
//! Stack maps record which frame slots and registers hold object references
//! at each safepoint of a compiled unit.
//!
//! # Design
//!
//! - 64-bit bitmap for frame slots (slot `k` lives at `fp - 8 * (k + 1)`)
//! - 32-bit bitmap for general-purpose registers by hardware encoding
//! - Sorted storage for O(log n) lookup
//!
//! Safepoints are keyed by the offset of the *start* of the instruction they
//! describe. Lookups use the effective IP (see [`crate::code::effective_ip`])
//! and take the nearest safepoint at or before it, so a return address
//! finds the call that produced it and an exact PC finds its own
//! instruction.
//!
//! # Example
//!
//! ```ignore
//! let mut builder = StackMapBuilder::new();
//! builder.add_safepoint(0x10, 0b1000, 0b0100); // rbx and slot 2 live
//! let map = builder.finish(code_start, code_size);
//! ```

// =============================================================================
// SafePoint
// =============================================================================

/// Live references at one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SafePoint {
    /// Offset of the instruction from the unit start.
    pub code_offset: u32,
    /// Live registers by hardware encoding.
    pub register_bitmap: u32,
    /// Live frame slots.
    pub stack_bitmap: u64,
}

impl SafePoint {
    /// Create a new safepoint.
    #[inline]
    pub const fn new(code_offset: u32, register_bitmap: u32, stack_bitmap: u64) -> Self {
        Self {
            code_offset,
            register_bitmap,
            stack_bitmap,
        }
    }

    /// Check if a register contains a live reference.
    #[inline]
    pub const fn is_register_live(&self, encoding: u8) -> bool {
        encoding < 32 && (self.register_bitmap & (1 << encoding)) != 0
    }

    /// Check if a frame slot contains a live reference.
    #[inline]
    pub const fn is_stack_slot_live(&self, slot: u8) -> bool {
        slot < 64 && (self.stack_bitmap & (1 << slot)) != 0
    }

    /// Live register encodings.
    #[inline]
    pub fn live_registers(&self) -> LiveBits {
        LiveBits::new(self.register_bitmap as u64)
    }

    /// Live frame slot indices.
    #[inline]
    pub fn live_stack_slots(&self) -> LiveBits {
        LiveBits::new(self.stack_bitmap)
    }

    /// Total number of live references.
    #[inline]
    pub const fn live_count(&self) -> u32 {
        self.register_bitmap.count_ones() + self.stack_bitmap.count_ones()
    }
}

// =============================================================================
// LiveBits
// =============================================================================

/// Iterator over set bits, lowest first.
#[derive(Debug, Clone)]
pub struct LiveBits {
    bitmap: u64,
}

impl LiveBits {
    #[inline]
    fn new(bitmap: u64) -> Self {
        Self { bitmap }
    }
}

impl Iterator for LiveBits {
    type Item = u8;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.bitmap == 0 {
            return None;
        }
        let trailing = self.bitmap.trailing_zeros() as u8;
        self.bitmap &= self.bitmap - 1;
        Some(trailing)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.bitmap.count_ones() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for LiveBits {}

// =============================================================================
// StackMap
// =============================================================================

/// All safepoints of one compiled unit.
#[derive(Debug, Clone)]
pub struct StackMap {
    /// Start address of the compiled code.
    pub code_start: usize,
    /// Size of the compiled code in bytes.
    pub code_size: u32,
    safepoints: Box<[SafePoint]>,
}

impl StackMap {
    /// Create a stack map; safepoints are sorted by offset.
    pub fn new(code_start: usize, code_size: u32, mut safepoints: Vec<SafePoint>) -> Self {
        safepoints.sort_by_key(|sp| sp.code_offset);
        Self {
            code_start,
            code_size,
            safepoints: safepoints.into_boxed_slice(),
        }
    }

    /// Map with no safepoints (no references are ever live).
    pub fn empty(code_start: usize, code_size: u32) -> Self {
        Self::new(code_start, code_size, Vec::new())
    }

    /// Check if an address falls within the unit.
    #[inline]
    pub fn contains_address(&self, addr: usize) -> bool {
        addr >= self.code_start && addr < self.code_start + self.code_size as usize
    }

    /// Safepoint at or immediately before `offset`.
    #[inline]
    pub fn lookup_offset(&self, offset: u32) -> Option<&SafePoint> {
        match self
            .safepoints
            .binary_search_by_key(&offset, |sp| sp.code_offset)
        {
            Ok(idx) => Some(&self.safepoints[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.safepoints[idx - 1]),
        }
    }

    /// Safepoint for an absolute (effective) address.
    #[inline]
    pub fn lookup_address(&self, addr: usize) -> Option<&SafePoint> {
        if !self.contains_address(addr) {
            return None;
        }
        self.lookup_offset((addr - self.code_start) as u32)
    }

    /// All safepoints in offset order.
    #[inline]
    pub fn safepoints(&self) -> &[SafePoint] {
        &self.safepoints
    }
}

// =============================================================================
// StackMapBuilder
// =============================================================================

/// Builder used while emitting a unit.
#[derive(Debug, Default)]
pub struct StackMapBuilder {
    safepoints: Vec<SafePoint>,
}

impl StackMapBuilder {
    /// Create a new builder.
    #[inline]
    pub fn new() -> Self {
        Self {
            safepoints: Vec::with_capacity(16),
        }
    }

    /// Record a safepoint.
    #[inline]
    pub fn add_safepoint(&mut self, code_offset: u32, register_bitmap: u32, stack_bitmap: u64) {
        self.safepoints
            .push(SafePoint::new(code_offset, register_bitmap, stack_bitmap));
    }

    /// Build the final map.
    #[inline]
    pub fn finish(self, code_start: usize, code_size: u32) -> StackMap {
        StackMap::new(code_start, code_size, self.safepoints)
    }

    /// Number of recorded safepoints.
    #[inline]
    pub fn len(&self) -> usize {
        self.safepoints.len()
    }

    /// Check if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.safepoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safepoint_live_checks() {
        let sp = SafePoint::new(0, 0b0101, 0b1001_0001);
        assert!(sp.is_register_live(0));
        assert!(!sp.is_register_live(1));
        assert!(sp.is_register_live(2));
        assert!(!sp.is_register_live(40));
        assert!(sp.is_stack_slot_live(4));
        assert!(sp.is_stack_slot_live(7));
        assert!(!sp.is_stack_slot_live(1));
        assert_eq!(sp.live_count(), 5);
    }

    #[test]
    fn test_live_bits_iter() {
        let sp = SafePoint::new(0, 0b1010, 0b1010_0101);
        assert_eq!(sp.live_registers().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(sp.live_stack_slots().collect::<Vec<_>>(), vec![0, 2, 5, 7]);
        assert_eq!(sp.live_stack_slots().len(), 4);
    }

    #[test]
    fn test_high_register_bits() {
        let sp = SafePoint::new(0, 1 << 28, 1 << 63);
        assert_eq!(sp.live_registers().collect::<Vec<_>>(), vec![28]);
        assert_eq!(sp.live_stack_slots().collect::<Vec<_>>(), vec![63]);
    }

    #[test]
    fn test_stackmap_lookup() {
        let map = StackMap::new(
            0x1000,
            0x100,
            vec![
                SafePoint::new(0x50, 0b0100, 0b0100),
                SafePoint::new(0x10, 0b0001, 0b0001),
                SafePoint::new(0x30, 0b0010, 0b0010),
            ],
        );

        assert_eq!(map.safepoints()[0].code_offset, 0x10);
        assert_eq!(map.lookup_offset(0x30).unwrap().register_bitmap, 0b0010);
        assert!(map.lookup_offset(0x05).is_none());
        assert_eq!(map.lookup_offset(0x40).unwrap().code_offset, 0x30);
        assert_eq!(map.lookup_address(0x1050).unwrap().code_offset, 0x50);
        assert!(map.lookup_address(0x2000).is_none());
    }

    #[test]
    fn test_return_address_finds_call() {
        // call at 0x10..0x15; return address 0x15 has effective offset 0x14.
        let map = StackMap::new(0x1000, 0x100, vec![SafePoint::new(0x10, 0, 0b1)]);
        assert_eq!(map.lookup_offset(0x14).unwrap().code_offset, 0x10);
    }

    #[test]
    fn test_builder() {
        let mut builder = StackMapBuilder::new();
        assert!(builder.is_empty());
        builder.add_safepoint(0x20, 0b0001, 0b0001);
        builder.add_safepoint(0x10, 0b0010, 0b0010);
        assert_eq!(builder.len(), 2);

        let map = builder.finish(0x1000, 0x100);
        assert_eq!(map.safepoints()[0].code_offset, 0x10);
        assert!(StackMap::empty(0x1000, 0x10).lookup_offset(0).is_none());
    }
}
