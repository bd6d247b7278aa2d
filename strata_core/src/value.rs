//! Argument values.
//!
//! Deferred exceptions carry their constructor arguments as [`Value`]s until
//! the propagator decides the instance is actually needed.

use crate::object::ObjectRef;
use smallvec::SmallVec;

/// Inline argument list; constructor calls rarely take more than four.
pub type Args = SmallVec<[Value; 4]>;

/// A primitive or reference argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Object reference (`None` is null).
    Ref(Option<ObjectRef>),
}

impl Value {
    /// The null reference.
    pub const NULL: Value = Value::Ref(None);

    /// Reference payload, if this is a non-null reference.
    #[inline]
    pub fn as_object(&self) -> Option<ObjectRef> {
        match *self {
            Value::Ref(obj) => obj,
            _ => None,
        }
    }

    /// Mutable access to the raw reference bits, for root enumeration.
    ///
    /// Returns `None` for primitives.
    #[inline]
    pub fn reference_slot(&mut self) -> Option<&mut Option<ObjectRef>> {
        match self {
            Value::Ref(obj) => Some(obj),
            _ => None,
        }
    }

    /// Check if this value is a reference (null or not).
    #[inline]
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Ref(_))
    }
}

impl From<ObjectRef> for Value {
    fn from(obj: ObjectRef) -> Self {
        Value::Ref(Some(obj))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_accessors() {
        let obj = ObjectRef::from_bits(0x2000).unwrap();
        let mut v = Value::from(obj);
        assert!(v.is_reference());
        assert_eq!(v.as_object(), Some(obj));
        *v.reference_slot().unwrap() = None;
        assert_eq!(v, Value::NULL);
    }

    #[test]
    fn test_primitives_have_no_slot() {
        let mut v = Value::Int(3);
        assert!(!v.is_reference());
        assert!(v.reference_slot().is_none());
        assert!(v.as_object().is_none());
    }

    #[test]
    fn test_args_inline_capacity() {
        let args: Args = smallvec::smallvec![Value::Int(1), Value::Long(2)];
        assert!(!args.spilled());
    }
}
