//! AArch64 resume trampoline.

use super::{MachineContext, CONTEXT_WORDS, FLAGS_OFFSET, IP_OFFSET, SP_OFFSET};
use std::arch::naked_asm;

/// Copy `src` to `staging`, run on the staging area, load every register
/// and branch to the image's IP on the image's stack.
///
/// `x16`/`x17` are intra-procedure scratch and carry the final SP and IP.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn resume_context(
    src: *const MachineContext,
    staging: *mut MachineContext,
) -> ! {
    naked_asm!(
        "mov sp, x1",
        "mov x2, #{words}",
        "2:",
        "ldr x3, [x0], #8",
        "str x3, [x1], #8",
        "subs x2, x2, #1",
        "b.ne 2b",
        "ldr x2, [sp, #{flags}]",
        "msr nzcv, x2",
        "ldr x16, [sp, #{sp}]",
        "ldr x17, [sp, #{ip}]",
        "ldp x0, x1, [sp, #0]",
        "ldp x2, x3, [sp, #16]",
        "ldp x4, x5, [sp, #32]",
        "ldp x6, x7, [sp, #48]",
        "ldp x8, x9, [sp, #64]",
        "ldp x10, x11, [sp, #80]",
        "ldp x12, x13, [sp, #96]",
        "ldp x14, x15, [sp, #112]",
        "ldp x18, x19, [sp, #144]",
        "ldp x20, x21, [sp, #160]",
        "ldp x22, x23, [sp, #176]",
        "ldp x24, x25, [sp, #192]",
        "ldp x26, x27, [sp, #208]",
        "ldp x28, x29, [sp, #224]",
        "ldr x30, [sp, #240]",
        "mov sp, x16",
        "br x17",
        words = const CONTEXT_WORDS,
        ip = const IP_OFFSET,
        sp = const SP_OFFSET,
        flags = const FLAGS_OFFSET,
    )
}
