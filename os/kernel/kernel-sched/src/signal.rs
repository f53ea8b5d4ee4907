//! # Signals
//!
//! One pending slot per thread: sending a second signal before the first is
//! delivered replaces it. Handlers are per thread and inherited by `fork`.
//!
//! Delivery happens on the way back to user mode. With a handler
//! registered, the thread's trap frame is parked, a one-page signal stack is
//! mapped at [`SIGNAL_STACK_BASE`](kernel_info::memory::SIGNAL_STACK_BASE)
//! and the handler is entered with `lr` pointing at a two-instruction
//! trampoline at the bottom of that page:
//!
//! ```text
//! SIGNAL_STACK_BASE + 0x000   mov x8, #20     // sigreturn
//! SIGNAL_STACK_BASE + 0x004   svc #0
//!                     ...
//! SIGNAL_STACK_BASE + 0x1000  <- initial sp
//! ```
//!
//! `sigreturn` restores the parked frame and releases the page. Without a
//! handler the signal terminates the thread.

use crate::trap::TrapFrame;
use kernel_info::thread::NSIG;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Syscall number the trampoline issues.
pub const SIGRETURN_SYSCALL: u16 = 20;

/// `mov x8, #SIGRETURN_SYSCALL; svc #0`
pub const SIGRETURN_TRAMPOLINE: [u32; 2] = [
    0xD280_0008 | ((SIGRETURN_SYSCALL as u32) << 5),
    0xD400_0001,
];

/// What the return-to-user path has to do about signals.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SignalAction {
    /// Nothing pending.
    None,
    /// The trap frame now enters `handler` on the signal stack.
    Handler { signum: u64, handler: VirtualAddress },
    /// No handler; the thread must exit.
    Terminate(u64),
}

pub(crate) struct SignalState {
    pub(crate) pending: Option<u64>,
    pub(crate) handlers: [Option<VirtualAddress>; NSIG],
    /// User state to resume after the handler returns.
    pub(crate) saved: Option<TrapFrame>,
    /// Page backing the signal stack while a handler runs.
    pub(crate) stack: Option<PhysicalAddress>,
}

impl SignalState {
    pub(crate) const fn new() -> Self {
        Self {
            pending: None,
            handlers: [None; NSIG],
            saved: None,
            stack: None,
        }
    }

    /// Index of `signum` in the handler table.
    #[allow(clippy::cast_possible_truncation)]
    pub(crate) const fn slot(signum: u64) -> Option<usize> {
        if signum < NSIG as u64 {
            Some(signum as usize)
        } else {
            None
        }
    }
}
