//! Classes and methods as seen by the unwinder.
//!
//! The unwinder needs three things from the class model: an ancestor test
//! for handler filters, a printable name for stack traces, and the
//! `STATIC`/`SYNCHRONIZED` bits that decide which monitor a dying frame
//! still holds.

use bitflags::bitflags;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// ClassId
// =============================================================================

/// Unique class identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(1);

impl ClassId {
    /// Allocate a fresh class id.
    #[inline]
    pub fn next() -> Self {
        ClassId(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// =============================================================================
// Class
// =============================================================================

/// A loaded class with an optional superclass.
#[derive(Debug)]
pub struct Class {
    id: ClassId,
    name: Box<str>,
    superclass: Option<Arc<Class>>,
}

impl Class {
    /// Create a root class.
    pub fn new(name: impl Into<Box<str>>) -> Arc<Self> {
        Arc::new(Self {
            id: ClassId::next(),
            name: name.into(),
            superclass: None,
        })
    }

    /// Create a class extending `superclass`.
    pub fn with_superclass(name: impl Into<Box<str>>, superclass: &Arc<Class>) -> Arc<Self> {
        Arc::new(Self {
            id: ClassId::next(),
            name: name.into(),
            superclass: Some(Arc::clone(superclass)),
        })
    }

    /// Class identity.
    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Fully qualified name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Direct superclass.
    #[inline]
    pub fn superclass(&self) -> Option<&Arc<Class>> {
        self.superclass.as_ref()
    }

    /// Returns true if `self` is `other` or inherits from it.
    pub fn is_subclass_of(&self, other: &Class) -> bool {
        let mut current = Some(self);
        while let Some(class) = current {
            if class.id == other.id {
                return true;
            }
            current = class.superclass.as_deref();
        }
        false
    }

    /// Number of superclasses above this class.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.superclass.as_deref();
        while let Some(class) = current {
            depth += 1;
            current = class.superclass.as_deref();
        }
        depth
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Class {}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// =============================================================================
// Method
// =============================================================================

bitflags! {
    /// Method modifiers relevant to unwinding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u16 {
        /// No receiver; synchronizes on the class monitor.
        const STATIC = 1 << 0;
        /// Holds a monitor for the duration of the call.
        const SYNCHRONIZED = 1 << 1;
        /// Implemented in native code.
        const NATIVE = 1 << 2;
    }
}

/// A method owned by a class.
#[derive(Debug)]
pub struct Method {
    name: Box<str>,
    class: Arc<Class>,
    flags: MethodFlags,
}

impl Method {
    /// Create a method.
    pub fn new(class: &Arc<Class>, name: impl Into<Box<str>>, flags: MethodFlags) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            class: Arc::clone(class),
            flags,
        })
    }

    /// Simple name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declaring class.
    #[inline]
    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Modifier flags.
    #[inline]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Check the `STATIC` flag.
    #[inline]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Check the `SYNCHRONIZED` flag.
    #[inline]
    pub fn is_synchronized(&self) -> bool {
        self.flags.contains(MethodFlags::SYNCHRONIZED)
    }

    /// Check the `NATIVE` flag.
    #[inline]
    pub fn is_native(&self) -> bool {
        self.flags.contains(MethodFlags::NATIVE)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class.name(), self.name)
    }
}
