//! Native transition frames.
//!
//! A [`NativeTransitionFrame`] is pushed every time control leaves managed
//! code for the VM, the interpreter or a native method, and popped on the
//! matching return. The frames of one thread form a strict LIFO chain:
//!
//! ```text
//!   ThreadContext.top ──► [frame C] ──prev──► [frame B] ──prev──► [frame A] ──► None
//!                         (newest)                                (oldest)
//! ```
//!
//! Transition stubs place the frame immediately below the managed caller's
//! stack pointer, so crossing a frame at address `a` restores
//! `sp = a + STATIC_SIZE`.
//!
//! How a frame is crossed depends on how it was captured:
//!
//! | Kind              | Registers from              | `is_ip_past`       |
//! |-------------------|-----------------------------|--------------------|
//! | `Normal`          | the frame's saved fields    | true               |
//! | `Suspended`       | snapshot taken at interrupt | false              |
//! | `DebuggerPopped`  | snapshot taken at pop time  | as recorded        |

use std::cell::Cell;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use strata_core::Method;
use strata_gc::LocalHandles;
use strata_jit::backend::{ArchDescriptor, RegisterSnapshot, MAX_CALLEE_SAVED};

// =============================================================================
// FrameType
// =============================================================================

/// How a transition frame was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    /// Ordinary call from managed code into the VM.
    Normal,
    /// Thread interrupted asynchronously (signal, suspension).
    Suspended,
    /// Frame popped by a debugger; resumes from the pop-time snapshot.
    DebuggerPopped,
}

#[derive(Debug)]
enum Capture {
    Normal,
    Suspended(Box<RegisterSnapshot>),
    DebuggerPopped(Box<RegisterSnapshot>),
}

// =============================================================================
// NativeTransitionFrame
// =============================================================================

/// Saved state at one native/managed boundary.
#[repr(C)]
pub struct NativeTransitionFrame {
    prev: Option<NonNull<NativeTransitionFrame>>,
    /// Callee-saved registers in `ArchDescriptor::callee_saved` order.
    saved: [Cell<u64>; MAX_CALLEE_SAVED],
    return_ip: Cell<u64>,
    capture: Capture,
    method: Option<Arc<Method>>,
    handles: LocalHandles,
}

impl NativeTransitionFrame {
    /// Bytes a transition stub reserves below the caller's stack pointer.
    pub const STATIC_SIZE: usize = (std::mem::size_of::<Self>() + 15) & !15;

    /// Frame for an ordinary call. `callee_saved` lists register values in
    /// `ArchDescriptor::callee_saved` order.
    pub fn new(return_ip: usize, callee_saved: &[u64]) -> Self {
        debug_assert!(callee_saved.len() <= MAX_CALLEE_SAVED);
        let saved: [Cell<u64>; MAX_CALLEE_SAVED] =
            std::array::from_fn(|i| Cell::new(callee_saved.get(i).copied().unwrap_or(0)));
        Self {
            prev: None,
            saved,
            return_ip: Cell::new(return_ip as u64),
            capture: Capture::Normal,
            method: None,
            handles: LocalHandles::new(),
        }
    }

    /// Frame for a thread interrupted at the registers in `snapshot`.
    pub fn suspended(snapshot: RegisterSnapshot) -> Self {
        let mut frame = Self::new(snapshot.ip(), &[]);
        frame.capture = Capture::Suspended(Box::new(snapshot));
        frame
    }

    /// Attach the native method this frame executes.
    pub fn with_method(mut self, method: Arc<Method>) -> Self {
        self.method = Some(method);
        self
    }

    /// Mark the frame popped by a debugger, resuming from `snapshot`.
    pub fn mark_popped(&mut self, snapshot: RegisterSnapshot) {
        self.capture = Capture::DebuggerPopped(Box::new(snapshot));
    }

    /// Capture kind.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self.capture {
            Capture::Normal => FrameType::Normal,
            Capture::Suspended(_) => FrameType::Suspended,
            Capture::DebuggerPopped(_) => FrameType::DebuggerPopped,
        }
    }

    /// Register snapshot for suspended and popped frames.
    #[inline]
    pub fn snapshot(&self) -> Option<&RegisterSnapshot> {
        match &self.capture {
            Capture::Normal => None,
            Capture::Suspended(snapshot) | Capture::DebuggerPopped(snapshot) => Some(&**snapshot),
        }
    }

    /// Older frame in the chain.
    #[inline]
    pub fn prev(&self) -> Option<NonNull<NativeTransitionFrame>> {
        self.prev
    }

    #[inline]
    pub(crate) fn set_prev(&mut self, prev: Option<NonNull<NativeTransitionFrame>>) {
        self.prev = prev;
    }

    /// Saved return address into the caller.
    #[inline]
    pub fn return_ip(&self) -> usize {
        self.return_ip.get() as usize
    }

    /// Address of the saved return address.
    #[inline]
    pub fn return_ip_addr(&self) -> usize {
        self.return_ip.as_ptr() as usize
    }

    /// Saved value of the `index`-th callee-saved register.
    #[inline]
    pub fn saved(&self, index: usize) -> u64 {
        self.saved[index].get()
    }

    /// Address of the `index`-th callee-saved register.
    #[inline]
    pub fn saved_addr(&self, index: usize) -> usize {
        self.saved[index].as_ptr() as usize
    }

    /// Overwrite the `index`-th callee-saved register.
    #[inline]
    pub fn set_saved(&self, index: usize, value: u64) {
        self.saved[index].set(value);
    }

    /// Native method executing above this frame.
    #[inline]
    pub fn method(&self) -> Option<&Arc<Method>> {
        self.method.as_ref()
    }

    /// Locally rooted handles.
    #[inline]
    pub fn handles(&self) -> &LocalHandles {
        &self.handles
    }

    /// Mutable access to the local handles.
    #[inline]
    pub fn handles_mut(&mut self) -> &mut LocalHandles {
        &mut self.handles
    }

    /// Pretty-print the saved registers for `arch`.
    pub fn describe(&self, arch: &ArchDescriptor) -> String {
        let mut out = format!("{:?} ret={:#x}", self.frame_type(), self.return_ip());
        for (i, reg) in arch.callee_saved.iter().enumerate() {
            out.push_str(&format!(" {}={:#x}", arch.reg_name(*reg), self.saved(i)));
        }
        out
    }
}

impl fmt::Debug for NativeTransitionFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeTransitionFrame")
            .field("frame_type", &self.frame_type())
            .field("return_ip", &format_args!("{:#x}", self.return_ip()))
            .field("method", &self.method.as_ref().map(|m| m.to_string()))
            .field("handles", &self.handles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Class, MethodFlags};
    use strata_jit::backend::{Reg, X86_64};

    #[test]
    fn test_static_size_is_aligned() {
        assert_eq!(NativeTransitionFrame::STATIC_SIZE % 16, 0);
        assert!(NativeTransitionFrame::STATIC_SIZE >= std::mem::size_of::<NativeTransitionFrame>());
        assert!(std::mem::align_of::<NativeTransitionFrame>() <= 16);
    }

    #[test]
    fn test_normal_frame_fields() {
        let frame = NativeTransitionFrame::new(0x1015, &[1, 2, 3]);
        assert_eq!(frame.frame_type(), FrameType::Normal);
        assert_eq!(frame.return_ip(), 0x1015);
        assert_eq!(frame.saved(1), 2);
        assert_eq!(frame.saved(5), 0);
        assert!(frame.snapshot().is_none());
        assert!(frame.prev().is_none());

        frame.set_saved(1, 9);
        let addr = frame.saved_addr(1);
        assert_eq!(unsafe { *(addr as *const u64) }, 9);
    }

    #[test]
    fn test_suspended_and_popped() {
        let snapshot = RegisterSnapshot::new().with(Reg::Ip, 0x2000);
        let mut frame = NativeTransitionFrame::suspended(snapshot.clone());
        assert_eq!(frame.frame_type(), FrameType::Suspended);
        assert_eq!(frame.snapshot(), Some(&snapshot));

        let popped = RegisterSnapshot::new().with(Reg::Ip, 0x3000);
        frame.mark_popped(popped.clone());
        assert_eq!(frame.frame_type(), FrameType::DebuggerPopped);
        assert_eq!(frame.snapshot(), Some(&popped));
    }

    #[test]
    fn test_method_and_describe() {
        let class = Class::new("Sys");
        let method = Method::new(&class, "arraycopy", MethodFlags::NATIVE | MethodFlags::STATIC);
        let frame = NativeTransitionFrame::new(0x10, &[0xaa]).with_method(method);
        assert_eq!(frame.method().unwrap().name(), "arraycopy");
        let text = frame.describe(&X86_64);
        assert!(text.starts_with("Normal ret=0x10"));
        assert!(text.contains("rbp=0xaa"));
    }
}
