//! # Thread Control Block

use crate::context::CpuContext;
use crate::fs::FileHandle;
use crate::memory::RegionList;
use crate::signal::SignalState;
use alloc::vec::Vec;
use core::fmt;
use kernel_info::memory::MMAP_BASE;
use kernel_info::thread::MAX_FD;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, pages_for};

/// Index into the scheduler's thread table.
pub(crate) type Slot = usize;

/// Thread identifier; unique and monotonically increasing.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    Medium = 1,
    High = 2,
}

impl Priority {
    /// Scan order of the scheduler.
    pub const DESCENDING: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Low),
            1 => Some(Self::Medium),
            2 => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ThreadState {
    /// Created, not yet on a run queue.
    Waiting,
    /// On its priority's run queue.
    Ready,
    /// On the CPU; on no queue.
    Running,
    /// On the zombie queue until reaped.
    Dead,
}

/// A user program image: page-aligned, mapped at virtual address zero.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Program {
    pub base: PhysicalAddress,
    pub len: usize,
}

impl Program {
    #[must_use]
    pub const fn pages(&self) -> u64 {
        pages_for(self.len as u64)
    }
}

pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) priority: Priority,
    pub(crate) state: ThreadState,
    pub(crate) exit_code: i64,
    pub(crate) context: CpuContext,
    /// Function the start trampoline calls.
    pub(crate) entry: u64,
    pub(crate) kernel_stack: Option<PhysicalAddress>,
    pub(crate) user_stack: Option<PhysicalAddress>,
    pub(crate) root: Option<PhysicalAddress>,
    pub(crate) program: Option<Program>,
    pub(crate) signals: SignalState,
    pub(crate) regions: RegionList,
    /// Next `mmap` placement when the caller gives no address.
    pub(crate) mmap_cursor: VirtualAddress,
    /// Pages populated by `mmap` or by faults, with where they are mapped.
    pub(crate) pages: Vec<(VirtualAddress, PhysicalAddress)>,
    pub(crate) files: [Option<FileHandle>; MAX_FD],
    pub(crate) prev: Option<Slot>,
    pub(crate) next: Option<Slot>,
}

impl Thread {
    pub(crate) fn new(id: ThreadId, priority: Priority, entry: u64) -> Self {
        Self {
            id,
            priority,
            state: ThreadState::Waiting,
            exit_code: 0,
            context: CpuContext::new(),
            entry,
            kernel_stack: None,
            user_stack: None,
            root: None,
            program: None,
            signals: SignalState::new(),
            regions: RegionList::new(),
            mmap_cursor: VirtualAddress::new(MMAP_BASE),
            pages: Vec::new(),
            files: [None; MAX_FD],
            prev: None,
            next: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    #[inline]
    #[must_use]
    pub const fn state(&self) -> ThreadState {
        self.state
    }

    #[inline]
    #[must_use]
    pub const fn exit_code(&self) -> i64 {
        self.exit_code
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> u64 {
        self.entry
    }

    #[inline]
    #[must_use]
    pub const fn context(&self) -> &CpuContext {
        &self.context
    }

    /// Translation table root (the `TTBR0_EL1` value).
    #[inline]
    #[must_use]
    pub const fn root(&self) -> Option<PhysicalAddress> {
        self.root
    }

    #[inline]
    #[must_use]
    pub const fn kernel_stack(&self) -> Option<PhysicalAddress> {
        self.kernel_stack
    }

    #[inline]
    #[must_use]
    pub const fn user_stack(&self) -> Option<PhysicalAddress> {
        self.user_stack
    }

    #[inline]
    #[must_use]
    pub const fn program(&self) -> Option<Program> {
        self.program
    }

    #[inline]
    #[must_use]
    pub const fn regions(&self) -> &RegionList {
        &self.regions
    }

    /// Pages populated on demand or by `MAP_POPULATE`.
    #[must_use]
    pub fn populated_pages(&self) -> &[(VirtualAddress, PhysicalAddress)] {
        &self.pages
    }

    #[inline]
    #[must_use]
    pub const fn pending_signal(&self) -> Option<u64> {
        self.signals.pending
    }

    #[must_use]
    pub fn signal_handler(&self, signum: usize) -> Option<VirtualAddress> {
        self.signals.handlers.get(signum).copied().flatten()
    }

    #[must_use]
    pub fn file(&self, fd: usize) -> Option<FileHandle> {
        self.files.get(fd).copied().flatten()
    }

    /// Whether a signal handler is running (a `sigreturn` is outstanding).
    #[inline]
    #[must_use]
    pub const fn in_signal_handler(&self) -> bool {
        self.signals.saved.is_some()
    }
}
