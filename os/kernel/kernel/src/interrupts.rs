//! # Exception Vectors
//!
//! `VBAR_EL1` points at [`exception_vectors`]: sixteen 128-byte slots, four
//! per origin.
//!
//! | Origin              | Sync               | IRQ              | FIQ, `SError` |
//! |---------------------|--------------------|------------------|---------------|
//! | EL1 with `SP_EL0`   | unexpected         | unexpected       | unexpected    |
//! | EL1 with `SP_EL1`   | [`el1_sync`]       | [`el1_irq`]      | unexpected    |
//! | EL0, AArch64        | [`el0_sync`]       | [`el0_irq`]      | unexpected    |
//! | EL0, AArch32        | unexpected         | unexpected       | unexpected    |
//!
//! Every entry pushes a full [`TrapFrame`] on the current kernel stack and
//! hands its address to Rust. Entries from EL0 leave through
//! `return_to_user`, which delivers pending signals before the frame is
//! restored and `eret` drops back to EL0. A forked child's first switch-in
//! lands there too, on the frame `fork` copied onto its kernel stack.

pub mod page_fault;
pub mod timer;

use crate::{init, syscall, task};
use core::arch::{asm, global_asm};
use kernel_info::thread::SIGKILL;
use kernel_sched::{Esr, ExceptionClass, SignalAction, TrapFrame};
use kernel_memory_addresses::VirtualAddress;
use log::{error, warn};

global_asm!(
    r#"
.macro SAVE_FRAME
    sub     sp, sp, #{frame}
    stp     x0, x1, [sp, #16 * 0]
    stp     x2, x3, [sp, #16 * 1]
    stp     x4, x5, [sp, #16 * 2]
    stp     x6, x7, [sp, #16 * 3]
    stp     x8, x9, [sp, #16 * 4]
    stp     x10, x11, [sp, #16 * 5]
    stp     x12, x13, [sp, #16 * 6]
    stp     x14, x15, [sp, #16 * 7]
    stp     x16, x17, [sp, #16 * 8]
    stp     x18, x19, [sp, #16 * 9]
    stp     x20, x21, [sp, #16 * 10]
    stp     x22, x23, [sp, #16 * 11]
    stp     x24, x25, [sp, #16 * 12]
    stp     x26, x27, [sp, #16 * 13]
    stp     x28, x29, [sp, #16 * 14]
    mrs     x21, sp_el0
    stp     x30, x21, [sp, #16 * 15]
    mrs     x22, elr_el1
    mrs     x23, spsr_el1
    stp     x22, x23, [sp, #16 * 16]
.endm

.macro RESTORE_FRAME
    ldp     x22, x23, [sp, #16 * 16]
    msr     elr_el1, x22
    msr     spsr_el1, x23
    ldp     x30, x21, [sp, #16 * 15]
    msr     sp_el0, x21
    ldp     x0, x1, [sp, #16 * 0]
    ldp     x2, x3, [sp, #16 * 1]
    ldp     x4, x5, [sp, #16 * 2]
    ldp     x6, x7, [sp, #16 * 3]
    ldp     x8, x9, [sp, #16 * 4]
    ldp     x10, x11, [sp, #16 * 5]
    ldp     x12, x13, [sp, #16 * 6]
    ldp     x14, x15, [sp, #16 * 7]
    ldp     x16, x17, [sp, #16 * 8]
    ldp     x18, x19, [sp, #16 * 9]
    ldp     x20, x21, [sp, #16 * 10]
    ldp     x22, x23, [sp, #16 * 11]
    ldp     x24, x25, [sp, #16 * 12]
    ldp     x26, x27, [sp, #16 * 13]
    ldp     x28, x29, [sp, #16 * 14]
    add     sp, sp, #{frame}
    eret
.endm

.macro UNEXPECTED index
    .balign 0x80
    SAVE_FRAME
    mov     x0, sp
    mov     x1, #\index
    bl      {unexpected}
.endm

.macro ENTRY target
    .balign 0x80
    b       \target
.endm

.section .text.vectors, "ax"
.balign 0x800
.global {vectors}
{vectors}:
    UNEXPECTED 0
    UNEXPECTED 1
    UNEXPECTED 2
    UNEXPECTED 3

    ENTRY   __el1_sync
    ENTRY   __el1_irq
    UNEXPECTED 6
    UNEXPECTED 7

    ENTRY   __el0_sync
    ENTRY   __el0_irq
    UNEXPECTED 10
    UNEXPECTED 11

    UNEXPECTED 12
    UNEXPECTED 13
    UNEXPECTED 14
    UNEXPECTED 15

.section .text, "ax"
__el1_sync:
    SAVE_FRAME
    mov     x0, sp
    bl      {el1_sync}
    RESTORE_FRAME

__el1_irq:
    SAVE_FRAME
    mov     x0, sp
    bl      {el1_irq}
    RESTORE_FRAME

__el0_sync:
    SAVE_FRAME
    mov     x0, sp
    bl      {el0_sync}
    b       {return_to_user}

__el0_irq:
    SAVE_FRAME
    mov     x0, sp
    bl      {el0_irq}
    b       {return_to_user}

.global {return_to_user}
{return_to_user}:
    mov     x0, sp
    bl      {before_user_return}
    RESTORE_FRAME
"#,
    frame = const TrapFrame::SIZE,
    vectors = sym exception_vectors,
    return_to_user = sym return_to_user,
    unexpected = sym unexpected,
    el1_sync = sym el1_sync,
    el1_irq = sym el1_irq,
    el0_sync = sym el0_sync,
    el0_irq = sym el0_irq,
    before_user_return = sym before_user_return,
);

unsafe extern "C" {
    /// The vector table; only its address is meaningful.
    pub fn exception_vectors();

    /// Restore the [`TrapFrame`] at `sp` and `eret` to EL0.
    pub fn return_to_user();
}

const VECTOR_NAMES: [&str; 16] = [
    "EL1t sync",
    "EL1t IRQ",
    "EL1t FIQ",
    "EL1t SError",
    "EL1h sync",
    "EL1h IRQ",
    "EL1h FIQ",
    "EL1h SError",
    "EL0 sync",
    "EL0 IRQ",
    "EL0 FIQ",
    "EL0 SError",
    "EL0 (AArch32) sync",
    "EL0 (AArch32) IRQ",
    "EL0 (AArch32) FIQ",
    "EL0 (AArch32) SError",
];

fn esr() -> Esr {
    let v: u64;
    unsafe { asm!("mrs {}, esr_el1", out(reg) v, options(nomem, nostack, preserves_flags)) };
    Esr::from_bits(v)
}

fn far() -> VirtualAddress {
    let v: u64;
    unsafe { asm!("mrs {}, far_el1", out(reg) v, options(nomem, nostack, preserves_flags)) };
    VirtualAddress::new(v)
}

extern "C" fn unexpected(tf: &TrapFrame, index: usize) -> ! {
    let name = VECTOR_NAMES.get(index).copied().unwrap_or("?");
    error!(
        "unexpected exception ({name}): esr {:#x}, far {}, elr {:#x}",
        esr().into_bits(),
        far(),
        tf.elr
    );
    init::halt()
}

/// The kernel itself faulted; nothing to recover.
extern "C" fn el1_sync(tf: &mut TrapFrame) {
    let esr = esr();
    error!(
        "kernel exception {:?}: esr {:#x}, far {}, elr {:#x}",
        esr.class(),
        esr.into_bits(),
        far(),
        tf.elr
    );
    init::halt()
}

extern "C" fn el1_irq(_tf: &mut TrapFrame) {
    if timer::acknowledge() {
        task::reschedule();
    }
}

extern "C" fn el0_sync(tf: &mut TrapFrame) {
    let esr = esr();
    match esr.class() {
        ExceptionClass::Svc64 => syscall::handle(tf),
        ExceptionClass::DataAbortLower | ExceptionClass::InstructionAbortLower => {
            page_fault::handle(far(), esr);
        }
        #[allow(clippy::cast_possible_wrap)]
        other => {
            warn!("killing thread on {other:?} at {:#x}", tf.elr);
            task::exit_current(SIGKILL as i64);
        }
    }
}

extern "C" fn el0_irq(_tf: &mut TrapFrame) {
    if timer::acknowledge() {
        task::reschedule();
    }
}

/// Last stop before `eret` to EL0.
extern "C" fn before_user_return(tf: &mut TrapFrame) {
    match task::deliver_signal(tf) {
        Ok(SignalAction::None) => {}
        Ok(SignalAction::Handler { .. }) => task::flush_user_mappings(),
        #[allow(clippy::cast_possible_wrap)]
        Ok(SignalAction::Terminate(signum)) => task::exit_current(signum as i64),
        Err(e) => warn!("signal delivery deferred: {e}"),
    }
}
