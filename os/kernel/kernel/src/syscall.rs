//! # Syscall Entry
//!
//! `svc #0` from EL0 ends up here with the caller's trap frame. The
//! dispatcher borrows the scheduler lock only for as long as each call
//! needs it; device I/O runs unlocked.

use crate::allocator::KernelMemory;
use crate::console::UartConsole;
use crate::mailbox::VideoCoreMailbox;
use crate::task::{self, MAPPER, SCHED};
use crate::vfs::Devfs;
use kernel_sched::{Env, TrapFrame};
use kernel_syscall::{Outcome, Syscalls};

pub fn handle(tf: &mut TrapFrame) {
    let mut alloc = KernelMemory;
    let mut fs = Devfs;
    let mut console = UartConsole;
    let mut firmware = VideoCoreMailbox;
    let mut calls = Syscalls {
        sched: &SCHED,
        env: Env {
            mapper: &MAPPER,
            alloc: &mut alloc,
            fs: &mut fs,
        },
        console: &mut console,
        firmware: &mut firmware,
    };
    match calls.dispatch(tf) {
        Outcome::Resume => {}
        Outcome::FlushAndResume => task::flush_user_mappings(),
        Outcome::Exited => task::switch_away(),
    }
}
