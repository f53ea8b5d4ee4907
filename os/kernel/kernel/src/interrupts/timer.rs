//! # Core Timer
//!
//! The EL1 physical timer of core 0, routed to the core's IRQ line through
//! the ARM local peripherals. It fires every `cntfrq >> TIMER_SHIFT` ticks
//! (1/32 s) and drives preemption.

use bitfield_struct::bitfield;
use core::arch::asm;
use core::ptr::{read_volatile, with_exposed_provenance_mut, write_volatile};
use kernel_info::memory::{KERNEL_VIRTUAL_BASE, LOCAL_PERIPHERAL_BASE};
use kernel_info::thread::TIMER_SHIFT;
use log::debug;

/// `CORE0_TIMER_IRQCNTL`: which timer outputs raise core 0's IRQ.
const CORE0_TIMER_IRQ_CTRL: u64 = LOCAL_PERIPHERAL_BASE + 0x40;
/// `CORE0_IRQ_SOURCE`: pending interrupt sources of core 0.
const CORE0_IRQ_SOURCE: u64 = LOCAL_PERIPHERAL_BASE + 0x60;

/// `nCNTPNSIRQ`: the non-secure EL1 physical timer.
const CNTPNS_IRQ: u32 = 1 << 1;

/// `CNTP_CTL_EL0`.
#[bitfield(u64)]
struct TimerControl {
    enable: bool,
    /// Interrupt masked; never set here.
    __imask: bool,
    /// Read only: the timer condition is met.
    istatus: bool,
    #[bits(61)]
    __res0: u64,
}

#[allow(clippy::cast_possible_truncation)]
fn local(register: u64) -> *mut u32 {
    with_exposed_provenance_mut((KERNEL_VIRTUAL_BASE + register) as usize)
}

fn interval() -> u64 {
    let freq: u64;
    unsafe { asm!("mrs {}, cntfrq_el0", out(reg) freq, options(nomem, nostack, preserves_flags)) };
    freq >> TIMER_SHIFT
}

fn control() -> TimerControl {
    let v: u64;
    unsafe { asm!("mrs {}, cntp_ctl_el0", out(reg) v, options(nomem, nostack, preserves_flags)) };
    TimerControl::from_bits(v)
}

fn rearm() {
    unsafe { asm!("msr cntp_tval_el0, {}", in(reg) interval(), options(nomem, nostack, preserves_flags)) };
}

/// Start the periodic tick.
pub fn init() {
    rearm();
    let ctl = TimerControl::new().with_enable(true);
    unsafe {
        asm!("msr cntp_ctl_el0, {}", in(reg) ctl.into_bits(), options(nomem, nostack, preserves_flags));
        write_volatile(local(CORE0_TIMER_IRQ_CTRL), CNTPNS_IRQ);
    }
    debug!("core timer every {} ticks", interval());
}

/// If the timer raised the current IRQ, rearm it and return `true`.
pub fn acknowledge() -> bool {
    let pending = unsafe { read_volatile(local(CORE0_IRQ_SOURCE)) };
    if pending & CNTPNS_IRQ == 0 || !control().istatus() {
        return false;
    }
    rearm();
    true
}
