//! Exceptions in flight.
//!
//! An exception is either an already-allocated object or a deferred
//! description (class, constructor, arguments) that is only materialized if
//! a handler actually needs it.

mod propagate;
mod throw;

pub use propagate::{ExceptionPropagator, HandlerSite, PropagationOutcome};
pub use throw::{
    format_unhandled, raise_exception, report_unhandled, rethrow_pending, throw_exception,
    throw_from_snapshot,
};

use std::fmt;
use std::sync::Arc;
use strata_core::{Args, Class, Method, ObjectRef, Value};

use crate::runtime::ObjectModel;

// =============================================================================
// LazyException
// =============================================================================

/// An exception whose object has not been allocated yet.
#[derive(Clone)]
pub struct LazyException {
    /// Class to instantiate.
    pub class: Arc<Class>,
    /// Constructor to run, `None` for the default constructor.
    pub constructor: Option<Arc<Method>>,
    /// Constructor arguments. Reference arguments are GC roots.
    pub args: Args,
}

impl LazyException {
    /// Deferred exception of `class` built with its default constructor.
    pub fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            constructor: None,
            args: Args::new(),
        }
    }

    /// Use `constructor` instead of the default one.
    pub fn with_constructor(mut self, constructor: Arc<Method>) -> Self {
        self.constructor = Some(constructor);
        self
    }

    /// Append a constructor argument.
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl fmt::Debug for LazyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyException")
            .field("class", &self.class.name())
            .field("constructor", &self.constructor.as_ref().map(|m| m.to_string()))
            .field("args", &self.args)
            .finish()
    }
}

// =============================================================================
// Exception
// =============================================================================

/// The exception being propagated.
#[derive(Debug, Clone)]
pub enum Exception {
    /// An allocated exception object.
    Instance(ObjectRef),
    /// A description to materialize on demand.
    Deferred(LazyException),
}

impl Exception {
    /// Class used for handler matching.
    pub fn class(&self, objects: &dyn ObjectModel) -> Arc<Class> {
        match self {
            Exception::Instance(obj) => objects.class_of(*obj),
            Exception::Deferred(lazy) => Arc::clone(&lazy.class),
        }
    }

    /// The object, if already allocated.
    #[inline]
    pub fn instance(&self) -> Option<ObjectRef> {
        match self {
            Exception::Instance(obj) => Some(*obj),
            Exception::Deferred(_) => None,
        }
    }

    /// Check for a deferred exception.
    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Exception::Deferred(_))
    }
}

impl From<ObjectRef> for Exception {
    fn from(obj: ObjectRef) -> Self {
        Exception::Instance(obj)
    }
}

impl From<LazyException> for Exception {
    fn from(lazy: LazyException) -> Self {
        Exception::Deferred(lazy)
    }
}
