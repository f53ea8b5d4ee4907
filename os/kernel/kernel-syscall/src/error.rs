use kernel_sched::{FsError, SchedError};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error("unknown syscall {0}")]
    UnknownSyscall(u64),
    #[error(transparent)]
    Sched(#[from] SchedError),
    #[error(transparent)]
    FileSystem(#[from] FsError),
    #[error("invalid argument {0:#x}")]
    InvalidArgument(u64),
}
