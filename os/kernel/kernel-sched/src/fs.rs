//! # File System Contract
//!
//! The scheduler owns each thread's descriptor table; what a descriptor
//! points at belongs to whichever [`FileSystem`] the kernel plugs in. The
//! trait is the whole contract: open files are opaque [`FileHandle`]s.

/// An open file as seen by the file system.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct FileHandle(u64);

impl FileHandle {
    #[inline]
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// `open` flags as passed in by user space.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const RDONLY: Self = Self(0);
    pub const WRONLY: Self = Self(1);
    pub const RDWR: Self = Self(2);
    pub const CREAT: Self = Self(0o100);

    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Origin of an `lseek64`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Whence {
    Set,
    Current,
    End,
}

impl Whence {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Set),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("file exists")]
    Exists,
    #[error("operation not supported")]
    NotSupported,
    #[error("stale file handle")]
    BadHandle,
    #[error("invalid argument")]
    Invalid,
    #[error("i/o error")]
    Io,
}

pub trait FileSystem {
    /// # Errors
    /// [`FsError::NotFound`] unless the path exists (or `CREAT` is given).
    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<FileHandle, FsError>;

    /// # Errors
    /// [`FsError::BadHandle`] for a handle that is not open.
    fn close(&mut self, file: FileHandle) -> Result<(), FsError>;

    /// Read from the current position; returns the byte count.
    ///
    /// # Errors
    /// Implementation specific.
    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Write at the current position; returns the byte count.
    ///
    /// # Errors
    /// Implementation specific.
    fn write(&mut self, file: FileHandle, buf: &[u8]) -> Result<usize, FsError>;

    /// Size of the file in bytes.
    ///
    /// # Errors
    /// Implementation specific.
    fn size(&mut self, file: FileHandle) -> Result<usize, FsError>;

    /// # Errors
    /// [`FsError::Invalid`] if the new position would be negative.
    fn lseek64(&mut self, file: FileHandle, offset: i64, whence: Whence) -> Result<u64, FsError>;

    /// # Errors
    /// [`FsError::NotSupported`] unless the file is a device that knows `request`.
    fn ioctl(&mut self, file: FileHandle, request: u64, arg: u64) -> Result<u64, FsError> {
        let _ = (file, request, arg);
        Err(FsError::NotSupported)
    }

    /// # Errors
    /// Implementation specific.
    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        let _ = path;
        Err(FsError::NotSupported)
    }

    /// # Errors
    /// Implementation specific.
    fn mount(&mut self, target: &str, filesystem: &str) -> Result<(), FsError> {
        let _ = (target, filesystem);
        Err(FsError::NotSupported)
    }

    /// # Errors
    /// Implementation specific.
    fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        let _ = path;
        Err(FsError::NotSupported)
    }
}
