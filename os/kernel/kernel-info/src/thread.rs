//! # Thread Sizing

use crate::memory::{PAGE_SIZE, USER_STACK_TOP};

/// Pages in a user stack.
pub const USER_STACK_PAGES: u64 = 4;

/// Size of a user stack in bytes.
pub const USER_STACK_SIZE: u64 = USER_STACK_PAGES * PAGE_SIZE;

/// Lowest address of the user stack mapping.
pub const USER_STACK_BASE: u64 = USER_STACK_TOP - USER_STACK_SIZE;

/// Size of a kernel stack: one trap frame plus the nested call chain.
pub const KERNEL_STACK_SIZE: u64 = PAGE_SIZE;

/// Entries in a thread's open-file table.
pub const MAX_FD: usize = 16;

/// Number of signal handler slots per thread.
pub const NSIG: usize = 10;

/// Default terminating signal.
pub const SIGKILL: usize = 9;

/// The core timer is rearmed to `CNTFRQ_EL0 >> TIMER_SHIFT` ticks.
pub const TIMER_SHIFT: u32 = 5;

const _: () = {
    assert!(USER_STACK_BASE.is_multiple_of(PAGE_SIZE));
    assert!(SIGKILL < NSIG);
};
