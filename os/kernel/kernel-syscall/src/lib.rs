//! # System Calls
//!
//! User space enters the kernel with `svc #0`, the syscall number in `x8`
//! and up to six arguments in `x0..x5`. The vector stub saves a
//! [`TrapFrame`] and hands it to [`Syscalls::dispatch`], which writes the
//! result back into `x0`. Every failure, including an unknown number, reads
//! as `-1` in user space.
//!
//! ```text
//!   svc #0 ──► vector stub ──► Syscalls::dispatch(tf) ──► Outcome
//!                                   │                       │
//!                      SpinLock<Scheduler> + Env            ├─ Resume
//!                      Console, Firmware                    ├─ FlushAndResume
//!                                                           └─ Exited
//! ```
//!
//! The dispatcher never holds the scheduler lock while it talks to the UART
//! or the file system; data moves through small bounce buffers instead.

#![cfg_attr(not(test), no_std)]

mod dispatch;
mod error;
mod sysno;

pub use crate::dispatch::{Console, Firmware, MAILBOX_BYTES, MailboxBuffer, Outcome, Syscalls};
pub use crate::error::SyscallError;
pub use crate::sysno::Sysno;
pub use kernel_sched::TrapFrame;
