//! Crossing a native transition frame.

use crate::frame::{FrameType, NativeTransitionFrame};
use log::trace;
use strata_jit::backend::{ArchDescriptor, Reg, RegLocation, RegisterContext};

/// Reposition `ctx` from the native code above `frame` to the managed (or
/// native) caller below it.
///
/// # Safety
///
/// `frame` must be a live frame in the chain of a thread that is the current
/// thread or is parked, and must stay live while `ctx` is used.
pub(crate) unsafe fn cross_transition_frame(
    frame: &NativeTransitionFrame,
    arch: &ArchDescriptor,
    ctx: &mut RegisterContext,
) {
    match frame.frame_type() {
        FrameType::Normal => {
            for (index, reg) in arch.callee_saved.iter().enumerate() {
                // SAFETY: the frame outlives the context per the caller.
                ctx.set_location(*reg, unsafe { RegLocation::saved_at(frame.saved_addr(index)) });
            }
            for reg in arch.caller_saved() {
                ctx.invalidate(reg);
            }
            // SAFETY: as above.
            ctx.set_location(Reg::Ip, unsafe { RegLocation::saved_at(frame.return_ip_addr()) });
            let frame_addr = frame as *const NativeTransitionFrame as usize;
            ctx.set_sp(frame_addr + NativeTransitionFrame::STATIC_SIZE);
            ctx.set_ip_past(true);
        }
        FrameType::Suspended => {
            if let Some(snapshot) = frame.snapshot() {
                ctx.load_snapshot(snapshot);
            }
            ctx.set_ip_past(false);
        }
        FrameType::DebuggerPopped => {
            if let Some(snapshot) = frame.snapshot() {
                ctx.load_snapshot(snapshot);
            }
        }
    }

    trace!(
        "crossed {:?} transition frame {:p}: ip={:#x} sp={:#x} past={}",
        frame.frame_type(),
        frame,
        ctx.ip(),
        ctx.sp(),
        ctx.is_ip_past()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_jit::backend::{RegisterSnapshot, X86_64};

    #[test]
    fn test_normal_frame_points_into_fields() {
        let frame = NativeTransitionFrame::new(0x4242, &[0x7000, 0xb, 0xc, 0xd, 0xe, 0xf]);
        let mut ctx = RegisterContext::new();
        ctx.set(Reg::Gpr(0), 99);
        ctx.set(Reg::Gpr(1), 98);

        unsafe { cross_transition_frame(&frame, &X86_64, &mut ctx) };

        assert_eq!(ctx.ip(), 0x4242);
        assert_eq!(ctx.fp(), 0x7000);
        assert_eq!(ctx.get(Reg::Gpr(3)), 0xb);
        assert_eq!(ctx.get(Reg::Gpr(15)), 0xf);
        assert!(ctx.is_ip_past());
        assert!(ctx.try_get(Reg::Gpr(0)).is_none());
        assert!(ctx.try_get(Reg::Gpr(1)).is_none());
        let addr = &frame as *const _ as usize;
        assert_eq!(ctx.sp(), addr + NativeTransitionFrame::STATIC_SIZE);

        // Locations alias the frame, so later writes are observed.
        frame.set_saved(2, 0x1212);
        assert_eq!(ctx.get(Reg::Gpr(12)), 0x1212);
        assert_eq!(
            ctx.location(Reg::Ip),
            unsafe { RegLocation::saved_at(frame.return_ip_addr()) }
        );
    }

    #[test]
    fn test_suspended_frame_uses_exact_pc() {
        let snapshot = RegisterSnapshot::new()
            .with(Reg::Ip, 0x5000)
            .with(Reg::Sp, 0x8000)
            .with(Reg::Gpr(0), 7)
            .with_ip_past(true);
        let frame = NativeTransitionFrame::suspended(snapshot);
        let mut ctx = RegisterContext::new();

        unsafe { cross_transition_frame(&frame, &X86_64, &mut ctx) };

        assert_eq!(ctx.ip(), 0x5000);
        assert_eq!(ctx.sp(), 0x8000);
        assert_eq!(ctx.get(Reg::Gpr(0)), 7);
        assert!(!ctx.is_ip_past());
        assert_eq!(ctx.location(Reg::Gpr(0)), RegLocation::Snapshot);
    }

    #[test]
    fn test_popped_frame_keeps_recorded_flag() {
        let mut frame = NativeTransitionFrame::new(0x1111, &[0x2222]);
        frame.mark_popped(
            RegisterSnapshot::new()
                .with(Reg::Ip, 0x6000)
                .with(Reg::Fp, 0x9000)
                .with_ip_past(true),
        );
        let mut ctx = RegisterContext::new();

        unsafe { cross_transition_frame(&frame, &X86_64, &mut ctx) };

        assert_eq!(ctx.ip(), 0x6000);
        assert_eq!(ctx.fp(), 0x9000);
        assert!(ctx.is_ip_past());
    }
}
