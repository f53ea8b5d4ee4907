use crate::fs::FsError;
use crate::thread::ThreadId;
use kernel_alloc::AllocError;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::MapError;

/// Why a thread or scheduler operation failed.
///
/// The syscall layer turns every one of these into `-1`; only
/// [`SegmentationFault`](Self::SegmentationFault) is fatal, and only to the
/// faulting thread.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedError {
    #[error("no live thread with id {0}")]
    ThreadNotFound(ThreadId),
    #[error("segmentation fault at {0}")]
    SegmentationFault(VirtualAddress),
    #[error(transparent)]
    OutOfMemory(#[from] AllocError),
    #[error(transparent)]
    Map(#[from] MapError),
    #[error(transparent)]
    FileSystem(#[from] FsError),
    #[error("bad user address {0}")]
    BadAddress(VirtualAddress),
    #[error("bad file descriptor {0}")]
    BadDescriptor(usize),
    #[error("file descriptor table is full")]
    TooManyFiles,
    #[error("signal {0} out of range")]
    BadSignal(u64),
    #[error("sigreturn outside a signal handler")]
    NotInSignalHandler,
    #[error("no thread is running")]
    NoCurrentThread,
}
