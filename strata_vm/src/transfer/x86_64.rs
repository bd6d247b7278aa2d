//! x86_64 resume trampoline.

use super::{MachineContext, CONTEXT_WORDS, FLAGS_OFFSET, IP_OFFSET, SP_OFFSET};
use std::arch::naked_asm;

/// Copy `src` to `staging`, run on the staging area, load every register
/// and return into the image's IP on the image's stack.
///
/// The return address is written to `[sp - 8]` of the target stack, which
/// is dead below the resumed frame.
#[unsafe(naked)]
pub(super) unsafe extern "C" fn resume_context(
    src: *const MachineContext,
    staging: *mut MachineContext,
) -> ! {
    naked_asm!(
        "mov rsp, rsi",
        "mov ecx, {words}",
        "2:",
        "mov rax, qword ptr [rdi]",
        "mov qword ptr [rsi], rax",
        "add rdi, 8",
        "add rsi, 8",
        "dec ecx",
        "jnz 2b",
        // Plant the resume address just below the target stack pointer.
        "mov rax, qword ptr [rsp + {sp}]",
        "mov rcx, qword ptr [rsp + {ip}]",
        "mov qword ptr [rax - 8], rcx",
        "push qword ptr [rsp + {flags}]",
        "popfq",
        "mov rax, qword ptr [rsp + 0]",
        "mov rcx, qword ptr [rsp + 8]",
        "mov rdx, qword ptr [rsp + 16]",
        "mov rbx, qword ptr [rsp + 24]",
        "mov rbp, qword ptr [rsp + 40]",
        "mov rsi, qword ptr [rsp + 48]",
        "mov rdi, qword ptr [rsp + 56]",
        "mov r8, qword ptr [rsp + 64]",
        "mov r9, qword ptr [rsp + 72]",
        "mov r10, qword ptr [rsp + 80]",
        "mov r11, qword ptr [rsp + 88]",
        "mov r12, qword ptr [rsp + 96]",
        "mov r13, qword ptr [rsp + 104]",
        "mov r14, qword ptr [rsp + 112]",
        "mov r15, qword ptr [rsp + 120]",
        "mov rsp, qword ptr [rsp + {sp}]",
        "lea rsp, [rsp - 8]",
        "ret",
        words = const CONTEXT_WORDS,
        ip = const IP_OFFSET,
        sp = const SP_OFFSET,
        flags = const FLAGS_OFFSET,
    )
}
