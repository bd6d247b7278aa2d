//! Destructive control transfer.
//!
//! After propagation has positioned a [`StackIterator`] at a handler (or at
//! the native boundary), [`transfer_control`] abandons every frame above it
//! and resumes execution there:
//!
//! ```text
//!   high ┌──────────────────┐
//!        │ resumed frame    │ ◄── target sp, ip written at [sp - 8] (x86_64)
//!        ├──────────────────┤
//!        │ abandoned frames │
//!        │ transfer_control │ ◄── current sp
//!        ├──────────────────┤
//!        │ red zone + gap   │
//!        ├──────────────────┤
//!        │ MachineContext   │ ◄── staging: trampoline runs on this stack
//!   low  └──────────────────┘
//! ```
//!
//! The staging copy lies below every live frame, so loading registers from
//! it cannot be clobbered by the frames being discarded. Nothing between
//! staging and the final jump allocates, logs or calls.

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "x86_64")]
mod x86_64;

use crate::stack::StackIterator;
use log::debug;
use std::mem::offset_of;
use strata_core::ObjectRef;
use strata_jit::backend::{host, ArchDescriptor, Reg, RegisterContext, MAX_GPRS};

// =============================================================================
// MachineContext
// =============================================================================

/// Flat register image consumed by the resume trampolines.
#[repr(C, align(16))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineContext {
    /// General-purpose registers by hardware encoding.
    pub gprs: [u64; MAX_GPRS],
    /// Resume address.
    pub ip: u64,
    /// Stack pointer after resumption.
    pub sp: u64,
    /// Flags register (`rflags` / `nzcv`).
    pub flags: u64,
    _pad: u64,
}

/// Byte offset of [`MachineContext::ip`].
pub const IP_OFFSET: usize = 8 * MAX_GPRS;
/// Byte offset of [`MachineContext::sp`].
pub const SP_OFFSET: usize = IP_OFFSET + 8;
/// Byte offset of [`MachineContext::flags`].
pub const FLAGS_OFFSET: usize = SP_OFFSET + 8;
/// Size of a [`MachineContext`] in words.
pub const CONTEXT_WORDS: usize = std::mem::size_of::<MachineContext>() / 8;

const _: () = assert!(offset_of!(MachineContext, ip) == IP_OFFSET);
const _: () = assert!(offset_of!(MachineContext, sp) == SP_OFFSET);
const _: () = assert!(offset_of!(MachineContext, flags) == FLAGS_OFFSET);
const _: () = assert!(std::mem::size_of::<MachineContext>() % 16 == 0);

/// Free space left between the current stack pointer (plus red zone) and
/// the staging area.
pub const STAGING_GAP: usize = 256;

impl MachineContext {
    /// All-zero image.
    pub const fn zeroed() -> Self {
        Self {
            gprs: [0; MAX_GPRS],
            ip: 0,
            sp: 0,
            flags: 0,
            _pad: 0,
        }
    }

    /// Flatten `ctx` for `arch`, delivering `resume_value` in the result
    /// register. Unset registers load as zero.
    pub fn from_context(
        ctx: &RegisterContext,
        arch: &ArchDescriptor,
        resume_value: Option<ObjectRef>,
    ) -> Self {
        let mut image = Self::zeroed();
        for reg in arch.registers() {
            let value = ctx.get(reg);
            match reg {
                Reg::Ip => image.ip = value,
                Reg::Sp => image.sp = value,
                Reg::Flags => image.flags = value,
                Reg::Fp => image.gprs[arch.fp_encoding as usize] = value,
                Reg::Gpr(n) => image.gprs[n as usize] = value,
            }
        }
        if let Reg::Gpr(n) = arch.result_reg {
            image.gprs[n as usize] = ObjectRef::bits_of(resume_value) as u64;
        }
        image
    }
}

impl Default for MachineContext {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Where to stage a [`MachineContext`] so it lies below both `target_sp`
/// and `current_sp`, clear of the red zone, 16-byte aligned.
#[inline]
pub fn staging_address(target_sp: usize, current_sp: usize, arch: &ArchDescriptor) -> usize {
    let below = target_sp.min(current_sp);
    (below - arch.red_zone - STAGING_GAP - std::mem::size_of::<MachineContext>()) & !15
}

// =============================================================================
// Transfer
// =============================================================================

/// Resume execution at the frame `iter` is positioned on. Never returns.
///
/// Frames above the target are abandoned without running destructors.
/// Aborts the process if the context has no IP or SP, or if the walk used a
/// target description other than the host's.
///
/// # Safety
///
/// `iter` must describe a live frame on the current thread's own stack,
/// positioned at code that expects the delivered registers (a handler entry
/// or the return into a native caller). Every frame above it, including the
/// caller of this function, is discarded, so none of them may own resources
/// that must be dropped.
pub unsafe fn transfer_control(iter: StackIterator<'_>) -> ! {
    let arch = iter.arch();
    debug!(
        "transfer to {:#x} sp={:#x} value={:?}",
        iter.ip(),
        iter.sp(),
        iter.resume_value()
    );

    let image = MachineContext::from_context(iter.context(), arch, iter.resume_value());
    drop(iter);

    if image.ip == 0 || image.sp == 0 || !arch.can_transfer_control || arch.kind != host().kind {
        std::process::abort();
    }

    let staging = staging_address(image.sp as usize, current_sp(), arch) as *mut MachineContext;
    // SAFETY: the staging area lies below every live frame, and the caller
    // guarantees the image describes a frame of the current thread's stack.
    unsafe { resume(&image, staging) }
}

#[inline(always)]
fn current_sp() -> usize {
    let sp: usize;
    #[cfg(target_arch = "x86_64")]
    // SAFETY: reads the stack pointer only.
    unsafe {
        std::arch::asm!("mov {}, rsp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    #[cfg(target_arch = "aarch64")]
    // SAFETY: reads the stack pointer only.
    unsafe {
        std::arch::asm!("mov {}, sp", out(reg) sp, options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        sp = 0;
    }
    sp
}

/// Copy `image` to `staging`, switch onto it and jump.
///
/// # Safety
///
/// `staging` must be writable, 16-byte aligned and below every live frame.
unsafe fn resume(image: &MachineContext, staging: *mut MachineContext) -> ! {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: guaranteed by the caller.
    unsafe {
        x86_64::resume_context(image, staging)
    }
    #[cfg(target_arch = "aarch64")]
    // SAFETY: guaranteed by the caller.
    unsafe {
        aarch64::resume_context(image, staging)
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        let _ = (image, staging);
        std::process::abort()
    }
}
