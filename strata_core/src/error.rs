//! Error types surfaced by the runtime.

use thiserror::Error;

/// Result alias for fallible VM operations.
pub type VmResult<T> = Result<T, VmError>;

/// Object allocation failed.
///
/// Returned by the object model when a lazily constructed exception cannot
/// be materialized. The propagator substitutes the preallocated
/// out-of-memory instance instead of retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("allocation of {requested} bytes failed")]
pub struct AllocError {
    /// Requested allocation size in bytes (0 if unknown).
    pub requested: usize,
}

/// Errors reported by runtime construction and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The heap could not satisfy a startup allocation.
    #[error("out of memory: {0}")]
    OutOfMemory(#[from] AllocError),

    /// The host architecture cannot perform an operation the VM requires.
    #[error("operation `{operation}` is not supported on {arch}")]
    Unsupported {
        /// Architecture name.
        arch: &'static str,
        /// Operation that is missing.
        operation: &'static str,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
}
