//! Architecture layer: logical registers, target descriptors and register
//! contexts.

pub mod context;
pub mod registers;

pub use context::{RegLocation, RegisterContext, RegisterSnapshot};
pub use registers::{
    host, ArchDescriptor, ArchKind, Reg, AARCH64, MAX_CALLEE_SAVED, MAX_GPRS, REG_SLOTS,
    UNSUPPORTED, X86_64,
};
