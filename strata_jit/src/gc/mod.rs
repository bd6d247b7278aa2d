//! GC metadata emitted alongside compiled code.

pub mod stackmap;

pub use stackmap::{LiveBits, SafePoint, StackMap, StackMapBuilder};
