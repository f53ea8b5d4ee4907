use crate::SyscallError;
use kernel_sched::signal::SIGRETURN_SYSCALL;

/// Syscall numbers as passed in `x8`. These are ABI.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u64)]
pub enum Sysno {
    GetPid = 0,
    UartRead = 1,
    UartWrite = 2,
    Exec = 3,
    Fork = 4,
    Exit = 5,
    MboxCall = 6,
    Kill = 7,
    Signal = 8,
    SigKill = 9,
    Mmap = 10,
    Open = 11,
    Close = 12,
    Write = 13,
    Read = 14,
    Mkdir = 15,
    Mount = 16,
    Chdir = 17,
    Lseek64 = 18,
    Ioctl = 19,
    SigReturn = 20,
}

impl Sysno {
    pub const ALL: [Self; 21] = [
        Self::GetPid,
        Self::UartRead,
        Self::UartWrite,
        Self::Exec,
        Self::Fork,
        Self::Exit,
        Self::MboxCall,
        Self::Kill,
        Self::Signal,
        Self::SigKill,
        Self::Mmap,
        Self::Open,
        Self::Close,
        Self::Write,
        Self::Read,
        Self::Mkdir,
        Self::Mount,
        Self::Chdir,
        Self::Lseek64,
        Self::Ioctl,
        Self::SigReturn,
    ];

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        if raw < Self::ALL.len() as u64 {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }
}

impl TryFrom<u64> for Sysno {
    type Error = SyscallError;

    fn try_from(raw: u64) -> Result<Self, Self::Error> {
        Self::from_raw(raw).ok_or(SyscallError::UnknownSyscall(raw))
    }
}

// The signal trampoline encodes this number into its `mov x8` instruction.
const _: () = assert!(Sysno::SigReturn as u64 == SIGRETURN_SYSCALL as u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_discriminants() {
        for (i, sysno) in Sysno::ALL.iter().enumerate() {
            assert_eq!(*sysno as u64, i as u64);
            assert_eq!(Sysno::from_raw(i as u64), Some(*sysno));
        }
    }

    #[test]
    fn unknown_numbers() {
        assert_eq!(Sysno::from_raw(21), None);
        assert_eq!(
            Sysno::try_from(u64::MAX),
            Err(SyscallError::UnknownSyscall(u64::MAX))
        );
    }
}
