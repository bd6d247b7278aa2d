//! Register capture from signal handlers.
//!
//! A fault in managed code (null dereference, stack overflow probe) arrives
//! as a signal whose `ucontext_t` holds the interrupted registers. The
//! snapshot produced here feeds [`StackIterator::from_snapshot`] and
//! [`throw_from_snapshot`]. The PC is exact, so `is_ip_past` is false.
//!
//! [`StackIterator::from_snapshot`]: crate::stack::StackIterator::from_snapshot
//! [`throw_from_snapshot`]: crate::exception::throw_from_snapshot

use strata_jit::backend::{Reg, RegisterSnapshot};

/// Decode the interrupted registers of a Linux x86_64 signal context.
///
/// # Safety
///
/// `uc` must point to the `ucontext_t` passed to an `SA_SIGINFO` handler.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub unsafe fn snapshot_from_ucontext(uc: *const libc::ucontext_t) -> RegisterSnapshot {
    // SAFETY: guaranteed by the caller.
    let gregs = unsafe { &(*uc).uc_mcontext.gregs };
    let reg = |index: libc::c_int| gregs[index as usize] as u64;

    // Hardware encoding order; rsp and rbp are tracked as Sp and Fp.
    let gprs = [
        (0, libc::REG_RAX),
        (1, libc::REG_RCX),
        (2, libc::REG_RDX),
        (3, libc::REG_RBX),
        (6, libc::REG_RSI),
        (7, libc::REG_RDI),
        (8, libc::REG_R8),
        (9, libc::REG_R9),
        (10, libc::REG_R10),
        (11, libc::REG_R11),
        (12, libc::REG_R12),
        (13, libc::REG_R13),
        (14, libc::REG_R14),
        (15, libc::REG_R15),
    ];

    let mut snapshot = RegisterSnapshot::new()
        .with(Reg::Ip, reg(libc::REG_RIP))
        .with(Reg::Sp, reg(libc::REG_RSP))
        .with(Reg::Fp, reg(libc::REG_RBP))
        .with(Reg::Flags, reg(libc::REG_EFL))
        .with_ip_past(false);
    for (encoding, index) in gprs {
        snapshot.set(Reg::Gpr(encoding), reg(index));
    }
    snapshot
}

/// Decode the interrupted registers of a Linux AArch64 signal context.
///
/// # Safety
///
/// `uc` must point to the `ucontext_t` passed to an `SA_SIGINFO` handler.
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
pub unsafe fn snapshot_from_ucontext(uc: *const libc::ucontext_t) -> RegisterSnapshot {
    // SAFETY: guaranteed by the caller.
    let mcontext = unsafe { &(*uc).uc_mcontext };

    let mut snapshot = RegisterSnapshot::new()
        .with(Reg::Ip, mcontext.pc as u64)
        .with(Reg::Sp, mcontext.sp as u64)
        .with(Reg::Fp, mcontext.regs[29] as u64)
        .with(Reg::Flags, mcontext.pstate as u64 & 0xf000_0000)
        .with_ip_past(false);
    for encoding in (0..31u8).filter(|&n| n != 29) {
        snapshot.set(Reg::Gpr(encoding), mcontext.regs[encoding as usize] as u64);
    }
    snapshot
}

#[cfg(all(test, target_os = "linux", target_arch = "x86_64"))]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_gregs() {
        // SAFETY: `ucontext_t` is plain data.
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        uc.uc_mcontext.gregs[libc::REG_RIP as usize] = 0x4010;
        uc.uc_mcontext.gregs[libc::REG_RSP as usize] = 0x7ff0;
        uc.uc_mcontext.gregs[libc::REG_RBP as usize] = 0x8000;
        uc.uc_mcontext.gregs[libc::REG_RBX as usize] = 3;
        uc.uc_mcontext.gregs[libc::REG_R15 as usize] = 15;

        let snapshot = unsafe { snapshot_from_ucontext(&uc) };

        assert_eq!(snapshot.ip(), 0x4010);
        assert_eq!(snapshot.sp(), 0x7ff0);
        assert_eq!(snapshot.get(Reg::Fp), Some(0x8000));
        assert_eq!(snapshot.get(Reg::Gpr(3)), Some(3));
        assert_eq!(snapshot.get(Reg::Gpr(15)), Some(15));
        assert!(!snapshot.is_valid(Reg::Gpr(4)));
        assert!(!snapshot.is_ip_past());
    }
}

#[cfg(all(test, target_os = "linux", target_arch = "aarch64"))]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_mcontext() {
        // SAFETY: `ucontext_t` is plain data.
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        uc.uc_mcontext.pc = 0x4010;
        uc.uc_mcontext.sp = 0x7ff0;
        uc.uc_mcontext.regs[29] = 0x8000;
        uc.uc_mcontext.regs[19] = 19;
        uc.uc_mcontext.pstate = 0x6000_03c5;

        let snapshot = unsafe { snapshot_from_ucontext(&uc) };

        assert_eq!(snapshot.ip(), 0x4010);
        assert_eq!(snapshot.sp(), 0x7ff0);
        assert_eq!(snapshot.get(Reg::Fp), Some(0x8000));
        assert_eq!(snapshot.get(Reg::Gpr(19)), Some(19));
        assert_eq!(snapshot.get(Reg::Flags), Some(0x6000_0000));
        assert!(!snapshot.is_valid(Reg::Gpr(29)));
    }
}
