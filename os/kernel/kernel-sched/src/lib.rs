//! # Threads and Scheduling
//!
//! Thread control blocks, the three priority run queues plus the zombie
//! queue, and everything that acts on "the current thread": creation, fork,
//! exec, kill, signals, `mmap` regions and demand-paging faults.
//!
//! ## Shape
//!
//! ```text
//!            thread_create / fork
//!                    │
//!                    ▼
//!   Waiting ──► Ready ◄──────────► Running ──► Dead ──► (reaped)
//!               run[High]   schedule()         │
//!               run[Medium]                    ▼
//!               run[Low]                    zombies
//! ```
//!
//! The [`Scheduler`] is a plain value. It never touches CPU registers: a
//! call to [`Scheduler::schedule`] only picks the next thread and returns a
//! [`Switch`] describing which saved contexts and which translation table the
//! architecture code has to swap. The kernel keeps one instance behind an
//! interrupt-masking lock, tests build as many as they like.
//!
//! Memory, page tables and files come in through an [`Env`]: the allocator
//! (`kernel_alloc::MemoryAllocator`), a physical-memory mapper
//! (`kernel_vmem::PhysMapper`) and a [`FileSystem`].

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod context;
mod error;
pub mod fault;
pub mod fs;
pub mod memory;
mod queue;
mod scheduler;
pub mod signal;
mod thread;
mod trap;
pub mod uaccess;

pub use crate::context::{CpuContext, Switch};
pub use crate::error::SchedError;
pub use crate::fault::{Esr, ExceptionClass, FaultOutcome, FaultStatus};
pub use crate::fs::{FileHandle, FileSystem, FsError, OpenFlags, Whence};
pub use crate::memory::{MemoryRegion, Protection, RegionList};
pub use crate::scheduler::{Env, KillOutcome, Scheduler, SchedulerConfig, Trampoline};
pub use crate::signal::SignalAction;
pub use crate::thread::{Priority, Program, Thread, ThreadId, ThreadState};
pub use crate::trap::TrapFrame;
