//! Logical registers and per-architecture descriptors.
//!
//! The unwinder talks about registers through [`Reg`], which names the four
//! special registers every target has (instruction pointer, stack pointer,
//! frame pointer, flags) plus general-purpose registers by hardware
//! encoding. Everything that differs by target lives in an
//! [`ArchDescriptor`]:
//!
//! ```text
//! ┌──────────┬─────────────────────────────┬────────┬──────────┐
//! │ Target   │ Callee-saved                │ Result │ Red zone │
//! ├──────────┼─────────────────────────────┼────────┼──────────┤
//! │ x86_64   │ rbp rbx r12 r13 r14 r15     │ rax    │ 128      │
//! │ aarch64  │ x29 x19..x28                │ x0     │ 0        │
//! └──────────┴─────────────────────────────┴────────┴──────────┘
//! ```
//!
//! Only the System V x86_64 ABI is described; Windows x64 saves a different
//! register set and is reported as unsupported.

use std::fmt;
use strata_core::{VmError, VmResult};

// =============================================================================
// Constants
// =============================================================================

/// Upper bound on general-purpose registers across supported targets.
pub const MAX_GPRS: usize = 32;

/// Number of special registers (ip, sp, fp, flags).
const SPECIAL_SLOTS: usize = 4;

/// Number of register slots in contexts and snapshots.
pub const REG_SLOTS: usize = SPECIAL_SLOTS + MAX_GPRS;

/// Upper bound on callee-saved registers across supported targets.
pub const MAX_CALLEE_SAVED: usize = 12;

// =============================================================================
// Reg
// =============================================================================

/// Architecture-neutral register name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    /// Instruction pointer.
    Ip,
    /// Stack pointer.
    Sp,
    /// Frame pointer (rbp / x29).
    Fp,
    /// Condition flags (rflags / nzcv).
    Flags,
    /// General-purpose register by hardware encoding.
    Gpr(u8),
}

impl Reg {
    /// Dense slot index used by contexts and snapshots.
    ///
    /// `Reg::Gpr` encodings must be below [`MAX_GPRS`].
    #[inline]
    pub const fn slot(self) -> usize {
        match self {
            Reg::Ip => 0,
            Reg::Sp => 1,
            Reg::Fp => 2,
            Reg::Flags => 3,
            Reg::Gpr(n) => {
                debug_assert!((n as usize) < MAX_GPRS, "general-purpose encoding out of range");
                SPECIAL_SLOTS + n as usize
            }
        }
    }

    /// Inverse of [`Reg::slot`].
    #[inline]
    pub const fn from_slot(slot: usize) -> Option<Reg> {
        match slot {
            0 => Some(Reg::Ip),
            1 => Some(Reg::Sp),
            2 => Some(Reg::Fp),
            3 => Some(Reg::Flags),
            n if n < REG_SLOTS => Some(Reg::Gpr((n - SPECIAL_SLOTS) as u8)),
            _ => None,
        }
    }

    /// Bit for this register in a validity mask.
    #[inline]
    pub const fn mask(self) -> u64 {
        1 << self.slot()
    }
}

// =============================================================================
// ArchDescriptor
// =============================================================================

/// Target family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchKind {
    /// x86_64, System V ABI.
    X86_64,
    /// AArch64, AAPCS64.
    Aarch64,
    /// Anything else.
    Unsupported,
}

/// Everything the unwinder needs to know about a target.
pub struct ArchDescriptor {
    /// Target family.
    pub kind: ArchKind,
    /// Display name.
    pub name: &'static str,
    /// Number of general-purpose encodings.
    pub gpr_count: u8,
    /// Encodings aliased by `Reg::Sp`/`Reg::Fp`; never tracked as `Reg::Gpr`.
    pub aliased: &'static [u8],
    /// Encoding that `Reg::Fp` lives in.
    pub fp_encoding: u8,
    /// Registers preserved across calls, in save order.
    pub callee_saved: &'static [Reg],
    /// Register carrying the exception object into a handler.
    pub result_reg: Reg,
    /// Bytes below the stack pointer that leaf code may use.
    pub red_zone: usize,
    /// Required stack pointer alignment at a call boundary.
    pub stack_alignment: usize,
    /// Whether the instruction pointer may be rewritten in a context.
    pub can_set_ip: bool,
    /// Whether a resume trampoline exists for this target.
    pub can_transfer_control: bool,
    gpr_names: &'static [&'static str],
    special_names: [&'static str; SPECIAL_SLOTS],
}

impl ArchDescriptor {
    /// Name of any logical register.
    pub fn reg_name(&self, reg: Reg) -> &'static str {
        match reg {
            Reg::Gpr(n) => self.gpr_names.get(n as usize).copied().unwrap_or("?"),
            special => self.special_names[special.slot()],
        }
    }

    /// Check if `reg` survives a call on this target.
    #[inline]
    pub fn is_callee_saved(&self, reg: Reg) -> bool {
        self.callee_saved.contains(&reg)
    }

    /// Every logical register that exists on this target.
    pub fn registers(&self) -> impl Iterator<Item = Reg> + '_ {
        [Reg::Ip, Reg::Sp, Reg::Fp, Reg::Flags].into_iter().chain(
            (0..self.gpr_count)
                .filter(move |n| !self.aliased.contains(n))
                .map(Reg::Gpr),
        )
    }

    /// Registers a call may clobber.
    pub fn caller_saved(&self) -> impl Iterator<Item = Reg> + '_ {
        self.registers()
            .filter(move |r| matches!(r, Reg::Gpr(_) | Reg::Flags) && !self.is_callee_saved(*r))
    }

    /// Fail with [`VmError::Unsupported`] if this target cannot walk and
    /// unwind stacks.
    pub fn ensure_supported(&self) -> VmResult<()> {
        if !self.can_set_ip {
            return Err(VmError::Unsupported {
                arch: self.name,
                operation: "set instruction pointer",
            });
        }
        if !self.can_transfer_control {
            return Err(VmError::Unsupported {
                arch: self.name,
                operation: "transfer control",
            });
        }
        Ok(())
    }
}

impl fmt::Debug for ArchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchDescriptor")
            .field("name", &self.name)
            .field("gpr_count", &self.gpr_count)
            .field("callee_saved", &self.callee_saved)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ArchDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

// =============================================================================
// Targets
// =============================================================================

/// x86_64 System V.
pub static X86_64: ArchDescriptor = ArchDescriptor {
    kind: ArchKind::X86_64,
    name: "x86_64",
    gpr_count: 16,
    aliased: &[4, 5],
    fp_encoding: 5,
    callee_saved: &[
        Reg::Fp,
        Reg::Gpr(3),
        Reg::Gpr(12),
        Reg::Gpr(13),
        Reg::Gpr(14),
        Reg::Gpr(15),
    ],
    result_reg: Reg::Gpr(0),
    red_zone: 128,
    stack_alignment: 16,
    can_set_ip: true,
    can_transfer_control: true,
    gpr_names: &[
        "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15",
    ],
    special_names: ["rip", "rsp", "rbp", "rflags"],
};

/// AArch64 AAPCS64.
pub static AARCH64: ArchDescriptor = ArchDescriptor {
    kind: ArchKind::Aarch64,
    name: "aarch64",
    gpr_count: 32,
    aliased: &[29, 31],
    fp_encoding: 29,
    callee_saved: &[
        Reg::Fp,
        Reg::Gpr(19),
        Reg::Gpr(20),
        Reg::Gpr(21),
        Reg::Gpr(22),
        Reg::Gpr(23),
        Reg::Gpr(24),
        Reg::Gpr(25),
        Reg::Gpr(26),
        Reg::Gpr(27),
        Reg::Gpr(28),
    ],
    result_reg: Reg::Gpr(0),
    red_zone: 0,
    stack_alignment: 16,
    can_set_ip: true,
    can_transfer_control: true,
    gpr_names: &[
        "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
        "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26",
        "x27", "x28", "x29", "x30", "sp",
    ],
    special_names: ["pc", "sp", "x29", "nzcv"],
};

/// Placeholder for targets without an unwinder.
pub static UNSUPPORTED: ArchDescriptor = ArchDescriptor {
    kind: ArchKind::Unsupported,
    name: std::env::consts::ARCH,
    gpr_count: 0,
    aliased: &[],
    fp_encoding: 0,
    callee_saved: &[],
    result_reg: Reg::Gpr(0),
    red_zone: 0,
    stack_alignment: 16,
    can_set_ip: false,
    can_transfer_control: false,
    gpr_names: &[],
    special_names: ["ip", "sp", "fp", "flags"],
};

/// Descriptor for the target this crate was compiled for.
#[inline]
pub fn host() -> &'static ArchDescriptor {
    #[cfg(all(target_arch = "x86_64", not(windows)))]
    {
        &X86_64
    }
    #[cfg(target_arch = "aarch64")]
    {
        &AARCH64
    }
    #[cfg(not(any(all(target_arch = "x86_64", not(windows)), target_arch = "aarch64")))]
    {
        &UNSUPPORTED
    }
}
