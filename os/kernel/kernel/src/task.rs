//! # Threads on the CPU
//!
//! The kernel's [`Scheduler`] instance and the architecture half of a
//! context switch. The scheduler decides; [`switch_to`] moves the CPU:
//!
//! ```text
//! reschedule()
//!   IrqGuard ────────────────────────────────────────────┐
//!   SCHED.lock() ─► schedule() ─► Switch ─► unlock        │ masked
//!   switch_to(prev, next, ttbr0)                          │
//!     save x19..x28, fp, lr, sp ─► prev                   │
//!     load x19..x28, fp, lr, sp ◄─ next                   │
//!     TTBR0_EL1 = ttbr0, TLB flush                        │
//!     ret ─► where `next` last called switch_to,          │
//!            or thread_start / return_to_user             │
//! ```
//!
//! No lock is held across the switch; the incoming thread restores its own
//! interrupt state when its guard drops.

use crate::allocator::KernelMemory;
use crate::vfs::{self, Devfs};
use crate::{init, interrupts, userland};
use core::arch::{asm, naked_asm};
use kernel_info::thread::KERNEL_STACK_SIZE;
use kernel_info::memory::USER_STACK_TOP;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::{
    CpuContext, Env, Esr, FaultOutcome, Priority, SchedError, Scheduler, SchedulerConfig,
    SignalAction, TrapFrame,
};
use kernel_sync::{InterruptWindow, IrqGuard, SpinLock};
use kernel_vmem::{LinearMapper, PhysMapper};
use log::{debug, error, info, warn};

/// Name of the first user program inside the initramfs.
const INIT_PROGRAM: &str = "init";

pub static MAPPER: LinearMapper = LinearMapper::kernel();

pub static SCHED: SpinLock<Scheduler> = SpinLock::new(Scheduler::new(SchedulerConfig {
    thread_start,
    return_to_user: interrupts::return_to_user,
    idle_entry: idle_thread,
    stdio: SchedulerConfig::STDIO,
}));

pub type KernelEnv<'e> = Env<'e, LinearMapper, KernelMemory, Devfs>;

/// Run `f` with the kernel's allocator, mapper and file system.
pub fn with_env<R>(f: impl FnOnce(&mut KernelEnv<'_>) -> R) -> R {
    let mut alloc = KernelMemory;
    let mut fs = Devfs;
    f(&mut Env {
        mapper: &MAPPER,
        alloc: &mut alloc,
        fs: &mut fs,
    })
}

/// Turn the boot flow into the lowest-priority thread.
pub fn init() {
    let id = SCHED.lock_irq().init(Priority::Low);
    info!("scheduler up, boot thread is {id}");
}

/// Start the first user program, or the built-in demo without one.
pub fn spawn_init() {
    let program = vfs::program(INIT_PROGRAM).unwrap_or_else(|| {
        warn!("no /initramfs/{INIT_PROGRAM}, running the built-in demo");
        userland::demo()
    });
    let created = with_env(|env| {
        SCHED
            .lock_irq()
            .thread_create(env, 0, Priority::Medium, Some(program))
    });
    match created {
        Ok(id) => info!("{INIT_PROGRAM} is thread {id} ({} bytes)", program.len()),
        Err(e) => error!("cannot start {INIT_PROGRAM}: {e}"),
    }
}

/// Give the CPU to the best ready thread, possibly this one.
pub fn reschedule() {
    let _irq = IrqGuard::new();
    let switch = with_env(|env| SCHED.lock().schedule(env));
    match switch {
        Ok(Some(switch)) => {
            let ttbr0 = switch.ttbr0.map_or_else(init::boot_tables, |pa| pa.as_u64());
            // Safety: both contexts belong to live, boxed control blocks.
            unsafe { switch_to(switch.prev, switch.next, ttbr0) };
        }
        Ok(None) => {}
        Err(e) => error!("schedule: {e}"),
    }
}

/// Leave a thread that is already dead.
pub fn switch_away() -> ! {
    reschedule();
    error!("a dead thread was scheduled again");
    init::halt()
}

/// Terminate the running thread with `code`.
pub fn exit_current(code: i64) -> ! {
    let _irq = IrqGuard::new();
    if let Err(e) = with_env(|env| SCHED.lock().retire_current(env, code)) {
        error!("exit: {e}");
    }
    switch_away()
}

pub fn deliver_signal(tf: &mut TrapFrame) -> Result<SignalAction, SchedError> {
    with_env(|env| SCHED.lock_irq().deliver_signal(env, tf))
}

pub fn handle_fault(far: VirtualAddress, esr: Esr) -> Result<FaultOutcome, SchedError> {
    with_env(|env| SCHED.lock_irq().handle_fault(env, far, esr))
}

/// After the running thread's tables or code changed under it.
pub fn flush_user_mappings() {
    unsafe {
        asm!(
            "dsb ishst",
            "tlbi vmalle1is",
            "dsb ish",
            "ic iallu",
            "dsb ish",
            "isb",
            options(nostack, preserves_flags)
        );
    }
}

/// Reap zombies, yield, sleep until the next interrupt. Forever.
pub fn idle() -> ! {
    loop {
        let reaped = with_env(|env| SCHED.lock_irq().reap_zombies(env));
        if reaped > 0 {
            debug!("reaped {reaped} threads");
        }
        reschedule();
        // Safety: no kernel state is borrowed here.
        let _window = unsafe { InterruptWindow::open() };
        unsafe { asm!("wfi", options(nomem, nostack)) };
    }
}

extern "C" fn idle_thread() {
    idle()
}

/// First code of every new thread, on its empty kernel stack.
#[unsafe(naked)]
unsafe extern "C" fn thread_start() {
    naked_asm!("bl {main}", main = sym thread_main)
}

#[allow(clippy::cast_possible_truncation)]
extern "C" fn thread_main() -> ! {
    let start = SCHED
        .lock_irq()
        .current()
        .map(|t| (t.entry(), t.program().is_some(), t.kernel_stack()));
    match start {
        Some((entry, true, Some(kstack))) => {
            let top = MAPPER.phys_to_virt(kstack).as_u64() + KERNEL_STACK_SIZE;
            flush_user_mappings();
            // Safety: the program is mapped at `entry` and the stack below
            // USER_STACK_TOP in the tables switch_to just loaded.
            unsafe { enter_user(entry, USER_STACK_TOP, top) }
        }
        Some((entry, false, _)) if entry != 0 => {
            // Safety: kernel threads are only ever created with the address
            // of an `extern "C" fn()`.
            let f = unsafe { core::mem::transmute::<usize, extern "C" fn()>(entry as usize) };
            f();
            exit_current(0)
        }
        _ => exit_current(-1),
    }
}

/// `eret` to EL0 at `entry` with IRQs unmasked, leaving `kernel_sp` as the
/// stack the next exception lands on.
unsafe fn enter_user(entry: u64, user_sp: u64, kernel_sp: u64) -> ! {
    unsafe {
        asm!(
            "msr elr_el1, {entry}",
            "msr sp_el0, {user_sp}",
            "msr spsr_el1, xzr",
            "mov sp, {kernel_sp}",
            "mov x0, xzr",
            "mov x1, xzr",
            "mov x30, xzr",
            "eret",
            entry = in(reg) entry,
            user_sp = in(reg) user_sp,
            kernel_sp = in(reg) kernel_sp,
            options(noreturn)
        )
    }
}

/// Save the callee-saved state into `prev`, load `next`, switch `TTBR0_EL1`.
#[unsafe(naked)]
unsafe extern "C" fn switch_to(prev: *mut CpuContext, next: *const CpuContext, ttbr0: u64) {
    naked_asm!(
        "stp x19, x20, [x0, #16 * 0]",
        "stp x21, x22, [x0, #16 * 1]",
        "stp x23, x24, [x0, #16 * 2]",
        "stp x25, x26, [x0, #16 * 3]",
        "stp x27, x28, [x0, #16 * 4]",
        "stp x29, x30, [x0, #{fp}]",
        "mov x9, sp",
        "str x9, [x0, #{sp}]",
        "ldp x19, x20, [x1, #16 * 0]",
        "ldp x21, x22, [x1, #16 * 1]",
        "ldp x23, x24, [x1, #16 * 2]",
        "ldp x25, x26, [x1, #16 * 3]",
        "ldp x27, x28, [x1, #16 * 4]",
        "ldp x29, x30, [x1, #{fp}]",
        "ldr x9, [x1, #{sp}]",
        "mov sp, x9",
        "dsb ish",
        "msr ttbr0_el1, x2",
        "tlbi vmalle1is",
        "dsb ish",
        "isb",
        "ret",
        fp = const CpuContext::FP_OFFSET,
        sp = const CpuContext::SP_OFFSET,
    )
}
