//! Opaque object references.
//!
//! An [`ObjectRef`] is the bit pattern the collector stores in stack slots,
//! registers and handles. The value `0` is the null reference and never
//! produces an `ObjectRef`, so `Option<ObjectRef>` is pointer sized.

use std::fmt;
use std::ptr::NonNull;

/// Non-null reference to a GC-managed object.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef(NonNull<u8>);

// Safety: an ObjectRef is an address; the heap it points into is shared by
// every mutator thread and synchronizes its own accesses.
unsafe impl Send for ObjectRef {}
unsafe impl Sync for ObjectRef {}

impl ObjectRef {
    /// Wrap a raw object pointer. Returns `None` for null.
    #[inline]
    pub fn from_ptr(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    /// Wrap the raw bits of a stack slot or register. Returns `None` for `0`.
    #[inline]
    pub fn from_bits(bits: usize) -> Option<Self> {
        Self::from_ptr(bits as *mut u8)
    }

    /// Raw bits as stored in slots and registers.
    #[inline]
    pub fn to_bits(self) -> usize {
        self.0.as_ptr() as usize
    }

    /// Raw object pointer.
    #[inline]
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    /// Bits for an optional reference (`0` for `None`).
    #[inline]
    pub fn bits_of(obj: Option<ObjectRef>) -> usize {
        obj.map_or(0, ObjectRef::to_bits)
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.to_bits())
    }
}

impl fmt::Pointer for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0, f)
    }
}
