//! Compiled code units and their exception-handler tables.

use super::effective_ip;
use crate::codegen::CodeGenerator;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strata_core::{Class, Method};

// =============================================================================
// CatchFilter
// =============================================================================

/// Exception classes a handler accepts.
#[derive(Clone)]
pub enum CatchFilter {
    /// Catch-all (`finally` blocks, `catch (Throwable)` after erasure).
    Any,
    /// The class and all its subclasses.
    Class(Arc<Class>),
}

impl CatchFilter {
    /// Check whether an exception of `class` is accepted.
    #[inline]
    pub fn accepts(&self, class: &Class) -> bool {
        match self {
            CatchFilter::Any => true,
            CatchFilter::Class(filter) => class.is_subclass_of(filter),
        }
    }
}

impl fmt::Debug for CatchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatchFilter::Any => f.write_str("Any"),
            CatchFilter::Class(class) => write!(f, "Class({})", class.name()),
        }
    }
}

// =============================================================================
// HandlerRange
// =============================================================================

/// One entry of a unit's handler table.
#[derive(Debug, Clone)]
pub struct HandlerRange {
    /// First protected address.
    pub start_ip: usize,
    /// One past the last protected address.
    pub end_ip: usize,
    /// Handler entry point.
    pub handler_ip: usize,
    /// Accepted exception classes.
    pub filter: CatchFilter,
    /// The handler never reads the exception object.
    pub exception_unused: bool,
}

impl HandlerRange {
    /// Create a handler for `[start_ip, end_ip)`.
    pub fn new(start_ip: usize, end_ip: usize, handler_ip: usize, filter: CatchFilter) -> Self {
        debug_assert!(start_ip < end_ip, "empty handler range");
        Self {
            start_ip,
            end_ip,
            handler_ip,
            filter,
            exception_unused: false,
        }
    }

    /// Mark the exception object as provably unused by the handler.
    pub fn with_exception_unused(mut self) -> Self {
        self.exception_unused = true;
        self
    }

    /// Check whether the range protects `ip`.
    #[inline]
    pub fn covers(&self, ip: usize, is_ip_past: bool) -> bool {
        let ip = effective_ip(ip, is_ip_past);
        ip >= self.start_ip && ip < self.end_ip
    }
}

// =============================================================================
// UnitStats
// =============================================================================

/// Exception statistics for one unit.
#[derive(Debug, Default)]
pub struct UnitStats {
    unwound: AtomicU64,
    caught: AtomicU64,
}

impl UnitStats {
    /// Count an exception that left the unit without being caught.
    #[inline]
    pub fn record_unwind(&self) {
        self.unwound.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an exception caught by one of the unit's handlers.
    #[inline]
    pub fn record_catch(&self) {
        self.caught.fetch_add(1, Ordering::Relaxed);
    }

    /// Exceptions that propagated through the unit.
    pub fn unwound(&self) -> u64 {
        self.unwound.load(Ordering::Relaxed)
    }

    /// Exceptions caught in the unit.
    pub fn caught(&self) -> u64 {
        self.caught.load(Ordering::Relaxed)
    }
}

// =============================================================================
// CompiledUnit
// =============================================================================

/// A contiguous block of compiled code for one method.
///
/// Handler entries are scanned in table order; the code generator emits
/// inner `try` blocks before outer ones.
#[derive(Debug)]
pub struct CompiledUnit {
    code_start: usize,
    code_size: usize,
    method: Arc<Method>,
    generator: Arc<dyn CodeGenerator>,
    handlers: Box<[HandlerRange]>,
    stats: UnitStats,
}

impl CompiledUnit {
    /// Create a unit with an empty handler table.
    pub fn new(
        method: Arc<Method>,
        generator: Arc<dyn CodeGenerator>,
        code_start: usize,
        code_size: usize,
    ) -> Self {
        Self {
            code_start,
            code_size,
            method,
            generator,
            handlers: Box::new([]),
            stats: UnitStats::default(),
        }
    }

    /// Attach the handler table.
    pub fn with_handlers(mut self, handlers: Vec<HandlerRange>) -> Self {
        debug_assert!(handlers
            .iter()
            .all(|h| h.start_ip >= self.code_start && h.end_ip <= self.code_end()));
        self.handlers = handlers.into_boxed_slice();
        self
    }

    /// First code address.
    #[inline]
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    /// One past the last code address.
    #[inline]
    pub fn code_end(&self) -> usize {
        self.code_start + self.code_size
    }

    /// Code size in bytes.
    #[inline]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Check whether the unit contains `ip`.
    #[inline]
    pub fn contains(&self, ip: usize, is_ip_past: bool) -> bool {
        let ip = effective_ip(ip, is_ip_past);
        ip >= self.code_start && ip < self.code_end()
    }

    /// Owning method.
    #[inline]
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// Code generator that produced the unit.
    #[inline]
    pub fn generator(&self) -> &Arc<dyn CodeGenerator> {
        &self.generator
    }

    /// Handler table in scan order.
    #[inline]
    pub fn handlers(&self) -> &[HandlerRange] {
        &self.handlers
    }

    /// Exception statistics.
    #[inline]
    pub fn stats(&self) -> &UnitStats {
        &self.stats
    }

    /// First handler covering `ip` that accepts `class`.
    pub fn find_handler(&self, ip: usize, is_ip_past: bool, class: &Class) -> Option<&HandlerRange> {
        self.handlers
            .iter()
            .find(|h| h.covers(ip, is_ip_past) && h.filter.accepts(class))
    }
}
