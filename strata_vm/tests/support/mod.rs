//! Shared fixtures: in-memory stacks and mock collaborators.
//!
//! [`FakeStack`] lays out real frames in a heap buffer exactly as compiled
//! code and transition stubs would: baseline frame records, spill slots and
//! `NativeTransitionFrame`s placed directly below the caller's stack
//! pointer. Walking it exercises the same code paths as a live stack.

#![allow(dead_code)]

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use strata_core::{AllocError, Class, ClassId, Method, MethodFlags, ObjectRef, Value};
use strata_jit::backend::{host, Reg, RegisterSnapshot};
use strata_jit::gc::{SafePoint, StackMap};
use strata_jit::{
    BaselineFrame, BaselineGenerator, CodeGenerator, CodeUnitIndex, CompiledUnit, HandlerRange,
};
use strata_vm::{MonitorOps, NativeTransitionFrame, ObjectModel, Runtime, ThreadContext, VmConfig};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// =============================================================================
// Classes
// =============================================================================

pub struct Classes {
    pub throwable: Arc<Class>,
    pub exception: Arc<Class>,
    pub runtime_exception: Arc<Class>,
    pub null_pointer: Arc<Class>,
    pub illegal_state: Arc<Class>,
    pub out_of_memory: Arc<Class>,
    pub main: Arc<Class>,
}

impl Classes {
    pub fn new() -> Self {
        let throwable = Class::new("java.lang.Throwable");
        let exception = Class::with_superclass("java.lang.Exception", &throwable);
        let runtime_exception = Class::with_superclass("java.lang.RuntimeException", &exception);
        let null_pointer =
            Class::with_superclass("java.lang.NullPointerException", &runtime_exception);
        let illegal_state =
            Class::with_superclass("java.lang.IllegalStateException", &runtime_exception);
        let error = Class::with_superclass("java.lang.Error", &throwable);
        let out_of_memory = Class::with_superclass("java.lang.OutOfMemoryError", &error);
        Self {
            throwable,
            exception,
            runtime_exception,
            null_pointer,
            illegal_state,
            out_of_memory,
            main: Class::new("app.Main"),
        }
    }
}

// =============================================================================
// MockHeap
// =============================================================================

/// One call to `ObjectModel::instantiate`.
#[derive(Debug, Clone)]
pub struct Construction {
    pub object: ObjectRef,
    pub class: Arc<Class>,
    pub constructor: Option<String>,
    pub args: Vec<Value>,
}

/// Hands out fake object addresses and remembers their classes.
pub struct MockHeap {
    out_of_memory_class: Arc<Class>,
    classes: Mutex<FxHashMap<usize, Arc<Class>>>,
    mirrors: Mutex<FxHashMap<ClassId, ObjectRef>>,
    constructions: Mutex<Vec<Construction>>,
    next: AtomicUsize,
    fail: AtomicBool,
}

impl MockHeap {
    pub fn new(classes: &Classes) -> Self {
        Self {
            out_of_memory_class: Arc::clone(&classes.out_of_memory),
            classes: Mutex::new(FxHashMap::default()),
            mirrors: Mutex::new(FxHashMap::default()),
            constructions: Mutex::new(Vec::new()),
            next: AtomicUsize::new(0x10_0000),
            fail: AtomicBool::new(false),
        }
    }

    /// Allocate without recording a construction.
    pub fn alloc(&self, class: &Arc<Class>) -> ObjectRef {
        let bits = self.next.fetch_add(0x40, Ordering::Relaxed);
        let obj = ObjectRef::from_bits(bits).unwrap();
        self.classes.lock().insert(bits, Arc::clone(class));
        obj
    }

    pub fn set_fail_allocations(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn constructions(&self) -> Vec<Construction> {
        self.constructions.lock().clone()
    }

    pub fn clear_constructions(&self) {
        self.constructions.lock().clear();
    }
}

impl ObjectModel for MockHeap {
    fn class_of(&self, obj: ObjectRef) -> Arc<Class> {
        self.classes
            .lock()
            .get(&obj.to_bits())
            .cloned()
            .expect("object allocated by the mock heap")
    }

    fn class_mirror(&self, class: &Arc<Class>) -> ObjectRef {
        if let Some(mirror) = self.mirrors.lock().get(&class.id()) {
            return *mirror;
        }
        let mirror = self.alloc(class);
        self.mirrors.lock().insert(class.id(), mirror);
        mirror
    }

    fn instantiate(
        &self,
        class: &Arc<Class>,
        constructor: Option<&Method>,
        args: &[Value],
    ) -> Result<ObjectRef, AllocError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(AllocError { requested: 64 });
        }
        let object = self.alloc(class);
        self.constructions.lock().push(Construction {
            object,
            class: Arc::clone(class),
            constructor: constructor.map(|m| m.to_string()),
            args: args.to_vec(),
        });
        Ok(object)
    }

    fn out_of_memory_class(&self) -> Arc<Class> {
        Arc::clone(&self.out_of_memory_class)
    }
}

// =============================================================================
// RecordingMonitors
// =============================================================================

#[derive(Default)]
pub struct RecordingMonitors {
    entered: Mutex<Vec<ObjectRef>>,
    exited: Mutex<Vec<ObjectRef>>,
}

impl RecordingMonitors {
    pub fn entered(&self) -> Vec<ObjectRef> {
        self.entered.lock().clone()
    }

    pub fn exited(&self) -> Vec<ObjectRef> {
        self.exited.lock().clone()
    }
}

impl MonitorOps for RecordingMonitors {
    fn monitor_enter(&self, obj: ObjectRef) {
        self.entered.lock().push(obj);
    }

    fn monitor_exit(&self, obj: ObjectRef) {
        self.exited.lock().push(obj);
    }
}

// =============================================================================
// TestVm
// =============================================================================

/// A runtime wired to mock collaborators and a baseline generator.
pub struct TestVm {
    pub classes: Classes,
    pub heap: Arc<MockHeap>,
    pub monitors: Arc<RecordingMonitors>,
    pub code: Arc<CodeUnitIndex>,
    pub generator: Arc<BaselineGenerator>,
    pub runtime: Runtime,
}

impl TestVm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default().with_print_unhandled(false))
    }

    pub fn with_config(config: VmConfig) -> Self {
        init_logging();
        let classes = Classes::new();
        let heap = Arc::new(MockHeap::new(&classes));
        let monitors = Arc::new(RecordingMonitors::default());
        let code = Arc::new(CodeUnitIndex::new());
        let runtime = Runtime::new(
            config,
            Arc::clone(&code),
            Arc::clone(&heap) as Arc<dyn ObjectModel>,
            Arc::clone(&monitors) as Arc<dyn MonitorOps>,
        )
        .expect("host supports stack walking");
        heap.clear_constructions();

        Self {
            classes,
            heap,
            monitors,
            code,
            generator: Arc::new(BaselineGenerator::new()),
            runtime,
        }
    }

    pub fn method(&self, name: &str, flags: MethodFlags) -> Arc<Method> {
        Method::new(&self.classes.main, name, flags)
    }

    /// Register a baseline unit at `[code_start, code_start + 0x100)`.
    pub fn install(
        &self,
        method: Arc<Method>,
        code_start: usize,
        frame: BaselineFrame,
        safepoints: Vec<SafePoint>,
        handlers: Vec<HandlerRange>,
    ) -> Arc<CompiledUnit> {
        const CODE_SIZE: usize = 0x100;
        self.generator.register(
            frame,
            StackMap::new(code_start, CODE_SIZE as u32, safepoints),
        );
        let generator = Arc::clone(&self.generator) as Arc<dyn CodeGenerator>;
        let unit = Arc::new(
            CompiledUnit::new(method, generator, code_start, CODE_SIZE).with_handlers(handlers),
        );
        self.code.insert(Arc::clone(&unit)).expect("disjoint code ranges");
        unit
    }

    pub fn thread(&self, name: &str) -> Arc<ThreadContext> {
        Arc::new(ThreadContext::new(1, name))
    }
}

// =============================================================================
// FakeStack
// =============================================================================

const STACK_WORDS: usize = 4096;

/// A downward-growing stack in heap memory.
pub struct FakeStack {
    memory: NonNull<[u64]>,
    base: usize,
    top: usize,
    sp: usize,
    fp: usize,
    frames: Vec<NonNull<NativeTransitionFrame>>,
    thread: Arc<ThreadContext>,
}

impl FakeStack {
    pub fn new(thread: Arc<ThreadContext>) -> Self {
        let memory = NonNull::from(Box::leak(vec![0u64; STACK_WORDS].into_boxed_slice()));
        let base = memory.as_ptr() as *mut u64 as usize;
        let top = (base + STACK_WORDS * 8) & !15;
        Self {
            memory,
            base,
            top,
            sp: top,
            fp: 0,
            frames: Vec::new(),
            thread,
        }
    }

    pub fn thread(&self) -> &Arc<ThreadContext> {
        &self.thread
    }

    pub fn sp(&self) -> usize {
        self.sp
    }

    pub fn fp(&self) -> usize {
        self.fp
    }

    /// Call into a baseline frame from the current frame. `ret_ip` is the
    /// return address into the caller and `saved` the caller's values of
    /// `frame.saved_regs`. Returns the new frame pointer.
    pub fn push_managed(&mut self, ret_ip: usize, frame: &BaselineFrame, saved: &[u64]) -> usize {
        assert_eq!(saved.len(), frame.saved_regs.len());
        self.write(self.sp - 8, ret_ip as u64);
        self.write(self.sp - 16, self.fp as u64);
        let fp = self.sp - BaselineFrame::RECORD_SIZE;
        for (slot, value) in saved.iter().enumerate() {
            self.write(BaselineFrame::slot_addr(fp, slot as u8), *value);
        }
        self.fp = fp;
        self.sp = fp - frame.frame_size as usize;
        fp
    }

    /// Return from the newest managed frame.
    pub fn pop_managed(&mut self) {
        let fp = self.fp;
        self.sp = fp + BaselineFrame::RECORD_SIZE;
        self.fp = self.read(fp) as usize;
    }

    /// Call native code, saving the frame pointer and `callee_saved` (the
    /// remaining callee-saved registers in descriptor order).
    pub fn push_native(
        &mut self,
        ret_ip: usize,
        callee_saved: &[u64],
    ) -> NonNull<NativeTransitionFrame> {
        let mut values = vec![self.fp as u64];
        values.extend_from_slice(callee_saved);
        self.place(NativeTransitionFrame::new(ret_ip, &values))
    }

    /// Call a native method.
    pub fn push_native_method(
        &mut self,
        ret_ip: usize,
        method: Arc<Method>,
    ) -> NonNull<NativeTransitionFrame> {
        let fp = self.fp as u64;
        self.place(NativeTransitionFrame::new(ret_ip, &[fp]).with_method(method))
    }

    /// Interrupt the current frame at the exact address `ip`.
    pub fn suspend(&mut self, ip: usize) -> NonNull<NativeTransitionFrame> {
        let snapshot = self.snapshot(ip);
        self.suspend_with(snapshot)
    }

    /// Interrupt the current frame with the registers in `snapshot`.
    pub fn suspend_with(&mut self, snapshot: RegisterSnapshot) -> NonNull<NativeTransitionFrame> {
        self.place(NativeTransitionFrame::suspended(snapshot))
    }

    /// Push a transition frame a debugger has popped, resuming at `snapshot`.
    pub fn push_popped(
        &mut self,
        ret_ip: usize,
        snapshot: RegisterSnapshot,
    ) -> NonNull<NativeTransitionFrame> {
        let fp = self.fp as u64;
        let mut frame = NativeTransitionFrame::new(ret_ip, &[fp]);
        frame.mark_popped(snapshot);
        self.place(frame)
    }

    /// Return from the newest native call.
    pub fn pop_native(&mut self) {
        let frame = self.frames.pop().expect("a pushed transition frame");
        assert_eq!(self.thread.pop_transition(), Some(frame));
        // SAFETY: placed by `place` and now unlinked.
        unsafe { frame.as_ptr().drop_in_place() };
        self.sp = frame.as_ptr() as usize + NativeTransitionFrame::STATIC_SIZE;
    }

    /// Registers of the current frame executing at exact `ip`.
    pub fn snapshot(&self, ip: usize) -> RegisterSnapshot {
        RegisterSnapshot::new()
            .with(Reg::Ip, ip as u64)
            .with(Reg::Sp, self.sp as u64)
            .with(Reg::Fp, self.fp as u64)
            .with_ip_past(false)
    }

    pub fn write_slot(&self, fp: usize, slot: u8, value: u64) {
        self.write(BaselineFrame::slot_addr(fp, slot), value);
    }

    pub fn read_slot(&self, fp: usize, slot: u8) -> u64 {
        self.read(BaselineFrame::slot_addr(fp, slot))
    }

    fn place(&mut self, frame: NativeTransitionFrame) -> NonNull<NativeTransitionFrame> {
        let addr = (self.sp - NativeTransitionFrame::STATIC_SIZE) & !15;
        assert!(addr >= self.base, "fake stack overflow");
        let ptr = NonNull::new(addr as *mut NativeTransitionFrame).unwrap();
        // SAFETY: `addr` is inside the buffer, 16-byte aligned and unused.
        unsafe {
            ptr.as_ptr().write(frame);
            self.thread.push_transition(ptr);
        }
        self.frames.push(ptr);
        self.sp = addr;
        ptr
    }

    fn write(&self, addr: usize, value: u64) {
        assert!(addr >= self.base && addr + 8 <= self.top, "{addr:#x} outside the stack");
        // SAFETY: checked above.
        unsafe { (addr as *mut u64).write(value) }
    }

    fn read(&self, addr: usize) -> u64 {
        assert!(addr >= self.base && addr + 8 <= self.top, "{addr:#x} outside the stack");
        // SAFETY: checked above.
        unsafe { (addr as *const u64).read() }
    }
}

impl Drop for FakeStack {
    fn drop(&mut self) {
        while !self.frames.is_empty() {
            self.pop_native();
        }
        // SAFETY: leaked in `new` and no longer referenced.
        unsafe { drop(Box::from_raw(self.memory.as_ptr())) };
    }
}

/// The second callee-saved register of the host (`rbx` / `x19`) and its
/// hardware encoding.
pub fn callee_saved_gpr() -> (Reg, u8) {
    let reg = host().callee_saved[1];
    match reg {
        Reg::Gpr(encoding) => (reg, encoding),
        other => panic!("unexpected callee-saved register {other:?}"),
    }
}

/// Safepoint at `offset` with live stack `slots` and live register
/// `encodings`.
pub fn safepoint(offset: u32, slots: &[u8], encodings: &[u8]) -> SafePoint {
    let stack = slots.iter().fold(0u64, |bits, s| bits | 1 << s);
    let regs = encodings.iter().fold(0u32, |bits, e| bits | 1 << e);
    SafePoint::new(offset, regs, stack)
}
