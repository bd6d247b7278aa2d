//! Runtime services shared by every walk.
//!
//! The [`Runtime`] ties together the pieces a stack walk consults: the
//! global code-unit index, the object system (for exception classes and
//! lazy construction), monitors, the target description and the resolved
//! configuration. It also owns the preallocated out-of-memory exception that
//! propagation substitutes when lazy construction cannot allocate.

use crate::config::VmConfig;
use log::debug;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use strata_core::{AllocError, Class, Method, ObjectRef, Value, VmResult};
use strata_gc::{RootSink, RootSlot};
use strata_jit::backend::{host, ArchDescriptor};
use strata_jit::CodeUnitIndex;

// =============================================================================
// Collaborators
// =============================================================================

/// Object system operations the unwinder needs.
pub trait ObjectModel: Send + Sync {
    /// Runtime class of `obj`.
    fn class_of(&self, obj: ObjectRef) -> Arc<Class>;

    /// Object whose monitor guards static synchronized methods of `class`.
    fn class_mirror(&self, class: &Arc<Class>) -> ObjectRef;

    /// Allocate an instance of `class` and run `constructor` with `args`.
    fn instantiate(
        &self,
        class: &Arc<Class>,
        constructor: Option<&Method>,
        args: &[Value],
    ) -> Result<ObjectRef, AllocError>;

    /// Class of the preallocated out-of-memory error.
    fn out_of_memory_class(&self) -> Arc<Class>;
}

/// Monitor operations.
pub trait MonitorOps: Send + Sync {
    /// Acquire the monitor of `obj`.
    fn monitor_enter(&self, obj: ObjectRef);

    /// Release the monitor of `obj`.
    fn monitor_exit(&self, obj: ObjectRef);
}

// =============================================================================
// Runtime
// =============================================================================

/// Shared services for stack walking and exception propagation.
pub struct Runtime {
    config: VmConfig,
    arch: &'static ArchDescriptor,
    code: Arc<CodeUnitIndex>,
    objects: Arc<dyn ObjectModel>,
    monitors: Arc<dyn MonitorOps>,
    /// Reported as a pinned global root; the collector never moves it.
    out_of_memory: UnsafeCell<usize>,
}

// Safety: `out_of_memory` is written once during construction and only read
// afterwards.
unsafe impl Send for Runtime {}
unsafe impl Sync for Runtime {}

impl Runtime {
    /// Runtime for the host target.
    ///
    /// Fails with [`strata_core::VmError::Unsupported`] if the host cannot
    /// unwind or transfer control, and with an out-of-memory error if the
    /// out-of-memory singleton cannot be preallocated.
    pub fn new(
        config: VmConfig,
        code: Arc<CodeUnitIndex>,
        objects: Arc<dyn ObjectModel>,
        monitors: Arc<dyn MonitorOps>,
    ) -> VmResult<Self> {
        Self::for_arch(host(), config, code, objects, monitors)
    }

    /// Runtime for an explicit target description.
    pub fn for_arch(
        arch: &'static ArchDescriptor,
        config: VmConfig,
        code: Arc<CodeUnitIndex>,
        objects: Arc<dyn ObjectModel>,
        monitors: Arc<dyn MonitorOps>,
    ) -> VmResult<Self> {
        config.validate()?;
        arch.ensure_supported()?;

        let oom_class = objects.out_of_memory_class();
        let out_of_memory = objects.instantiate(&oom_class, None, &[])?;

        debug!(
            "runtime ready: arch={} units={} oom={:?} config={:?}",
            arch.name,
            code.len(),
            out_of_memory,
            config
        );

        Ok(Self {
            config,
            arch,
            code,
            objects,
            monitors,
            out_of_memory: UnsafeCell::new(out_of_memory.to_bits()),
        })
    }

    /// Resolved configuration.
    #[inline]
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Target description.
    #[inline]
    pub fn arch(&self) -> &'static ArchDescriptor {
        self.arch
    }

    /// Global code-unit index.
    #[inline]
    pub fn code(&self) -> &CodeUnitIndex {
        &self.code
    }

    /// Object system.
    #[inline]
    pub fn objects(&self) -> &dyn ObjectModel {
        &*self.objects
    }

    /// Monitor operations.
    #[inline]
    pub fn monitors(&self) -> &dyn MonitorOps {
        &*self.monitors
    }

    /// The preallocated out-of-memory exception.
    #[inline]
    pub fn out_of_memory(&self) -> ObjectRef {
        // SAFETY: the cell is initialized with a non-null reference and never
        // written after construction.
        let bits = unsafe { *self.out_of_memory.get() };
        // SAFETY: see above.
        unsafe { ObjectRef::from_ptr(bits as *mut u8).unwrap_unchecked() }
    }

    /// Report roots owned by the runtime itself.
    pub fn enumerate_global_roots(&self, sink: &mut dyn RootSink) {
        // SAFETY: `UnsafeCell::get` never returns null.
        let slot = RootSlot::new(unsafe { NonNull::new_unchecked(self.out_of_memory.get()) });
        sink.add_root(slot, true);
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("arch", &self.arch.name)
            .field("units", &self.code.len())
            .field("out_of_memory", &self.out_of_memory())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use strata_core::VmError;
    use strata_gc::RootCollector;
    use strata_jit::backend::{UNSUPPORTED, X86_64};

    #[derive(Default)]
    struct Objects {
        fail: bool,
        allocated: Mutex<usize>,
    }

    impl ObjectModel for Objects {
        fn class_of(&self, _obj: ObjectRef) -> Arc<Class> {
            Class::new("Object")
        }

        fn class_mirror(&self, _class: &Arc<Class>) -> ObjectRef {
            ObjectRef::from_bits(0x10).unwrap()
        }

        fn instantiate(
            &self,
            _class: &Arc<Class>,
            _constructor: Option<&Method>,
            _args: &[Value],
        ) -> Result<ObjectRef, AllocError> {
            if self.fail {
                return Err(AllocError { requested: 32 });
            }
            let mut n = self.allocated.lock();
            *n += 1;
            Ok(ObjectRef::from_bits(0x1000 * *n).unwrap())
        }

        fn out_of_memory_class(&self) -> Arc<Class> {
            Class::new("OutOfMemoryError")
        }
    }

    struct NoMonitors;

    impl MonitorOps for NoMonitors {
        fn monitor_enter(&self, _obj: ObjectRef) {}
        fn monitor_exit(&self, _obj: ObjectRef) {}
    }

    fn build(arch: &'static ArchDescriptor, objects: Objects) -> VmResult<Runtime> {
        Runtime::for_arch(
            arch,
            VmConfig::default(),
            Arc::new(CodeUnitIndex::new()),
            Arc::new(objects),
            Arc::new(NoMonitors),
        )
    }

    #[test]
    fn test_preallocates_out_of_memory() {
        let runtime = build(&X86_64, Objects::default()).unwrap();
        assert_eq!(runtime.out_of_memory().to_bits(), 0x1000);
        assert_eq!(runtime.arch().name, "x86_64");
    }

    #[test]
    fn test_unsupported_arch_is_rejected() {
        let err = build(&UNSUPPORTED, Objects::default()).unwrap_err();
        assert!(matches!(err, VmError::Unsupported { .. }));
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let objects = Objects {
            fail: true,
            ..Default::default()
        };
        let err = build(&X86_64, objects).unwrap_err();
        assert_eq!(err, VmError::OutOfMemory(AllocError { requested: 32 }));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = VmConfig {
            max_trace_frames: 0,
            ..VmConfig::default()
        };
        let err = Runtime::for_arch(
            &X86_64,
            config,
            Arc::new(CodeUnitIndex::new()),
            Arc::new(Objects::default()),
            Arc::new(NoMonitors),
        )
        .unwrap_err();
        assert!(matches!(err, VmError::Config(_)));
    }

    #[test]
    fn test_global_roots_pin_out_of_memory() {
        let runtime = build(&X86_64, Objects::default()).unwrap();
        let mut roots = RootCollector::new();
        runtime.enumerate_global_roots(&mut roots);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots.pinned_count(), 1);
        assert_eq!(unsafe { roots.objects() }, vec![runtime.out_of_memory()]);
    }
}
