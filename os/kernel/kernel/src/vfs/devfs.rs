//! # Device and Initramfs Nodes
//!
//! The kernel's [`FileSystem`]: the three UART nodes every thread gets as
//! descriptors 0..2, plus read-only access to initramfs members under
//! `/initramfs/`.
//!
//! Open files live in a fixed table behind its own lock. The lock is only
//! held to look up or update an entry, never while waiting on the UART.

use crate::console::UartConsole;
use crate::vfs::initramfs::Archive;
use kernel_sched::{FileHandle, FileSystem, FsError, OpenFlags, SchedulerConfig, Whence};
use kernel_sync::SpinLock;
use kernel_syscall::Console;

const MAX_OPEN: usize = 64;
const INITRAMFS_PREFIX: &str = "/initramfs/";

pub(super) static ARCHIVE: SpinLock<Archive<'static>> = SpinLock::new(Archive::empty());

static OPEN: SpinLock<[Option<OpenFile>; MAX_OPEN]> = SpinLock::new([None; MAX_OPEN]);

#[derive(Debug, Copy, Clone)]
enum Node {
    Stdin,
    Stdout,
    Stderr,
    File(&'static [u8]),
}

#[derive(Debug, Copy, Clone)]
struct OpenFile {
    node: Node,
    pos: usize,
}

#[derive(Debug, Copy, Clone, Default)]
pub struct Devfs;

impl Devfs {
    fn lookup(path: &str) -> Option<Node> {
        let [stdin, stdout, stderr] = SchedulerConfig::STDIO;
        match path {
            p if p == stdin => Some(Node::Stdin),
            p if p == stdout => Some(Node::Stdout),
            p if p == stderr => Some(Node::Stderr),
            p => {
                let name = p.strip_prefix(INITRAMFS_PREFIX)?;
                ARCHIVE.lock_irq().find(name).map(Node::File)
            }
        }
    }

    fn slot(file: FileHandle) -> Result<usize, FsError> {
        usize::try_from(file.raw())
            .ok()
            .filter(|&i| i < MAX_OPEN)
            .ok_or(FsError::BadHandle)
    }

    fn get(file: FileHandle) -> Result<OpenFile, FsError> {
        let slot = Self::slot(file)?;
        OPEN.lock_irq()[slot].ok_or(FsError::BadHandle)
    }
}

impl FileSystem for Devfs {
    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<FileHandle, FsError> {
        let node = match Self::lookup(path) {
            Some(node) => node,
            None if flags.contains(OpenFlags::CREAT) => return Err(FsError::NotSupported),
            None => return Err(FsError::NotFound),
        };
        let mut open = OPEN.lock_irq();
        let slot = open.iter().position(Option::is_none).ok_or(FsError::Io)?;
        open[slot] = Some(OpenFile { node, pos: 0 });
        Ok(FileHandle::new(slot as u64))
    }

    fn close(&mut self, file: FileHandle) -> Result<(), FsError> {
        let slot = Self::slot(file)?;
        OPEN.lock_irq()[slot].take().ok_or(FsError::BadHandle)?;
        Ok(())
    }

    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        match Self::get(file)?.node {
            Node::Stdin => {
                let mut console = UartConsole;
                buf.iter_mut().for_each(|b| *b = console.read_byte());
                Ok(buf.len())
            }
            Node::File(data) => {
                let slot = Self::slot(file)?;
                let mut open = OPEN.lock_irq();
                let entry = open[slot].as_mut().ok_or(FsError::BadHandle)?;
                let rest = data.get(entry.pos..).unwrap_or_default();
                let n = rest.len().min(buf.len());
                buf[..n].copy_from_slice(&rest[..n]);
                entry.pos += n;
                Ok(n)
            }
            Node::Stdout | Node::Stderr => Err(FsError::NotSupported),
        }
    }

    fn write(&mut self, file: FileHandle, buf: &[u8]) -> Result<usize, FsError> {
        match Self::get(file)?.node {
            Node::Stdout | Node::Stderr => {
                let mut console = UartConsole;
                buf.iter().for_each(|&b| console.write_byte(b));
                Ok(buf.len())
            }
            Node::Stdin | Node::File(_) => Err(FsError::NotSupported),
        }
    }

    fn size(&mut self, file: FileHandle) -> Result<usize, FsError> {
        match Self::get(file)?.node {
            Node::File(data) => Ok(data.len()),
            Node::Stdin | Node::Stdout | Node::Stderr => Ok(0),
        }
    }

    fn lseek64(&mut self, file: FileHandle, offset: i64, whence: Whence) -> Result<u64, FsError> {
        let slot = Self::slot(file)?;
        let mut open = OPEN.lock_irq();
        let entry = open[slot].as_mut().ok_or(FsError::BadHandle)?;
        let Node::File(data) = entry.node else {
            return Err(FsError::NotSupported);
        };
        let base = match whence {
            Whence::Set => 0,
            Whence::Current => entry.pos,
            Whence::End => data.len(),
        };
        let pos = i64::try_from(base)
            .ok()
            .and_then(|b| b.checked_add(offset))
            .and_then(|p| usize::try_from(p).ok())
            .ok_or(FsError::Invalid)?;
        entry.pos = pos;
        Ok(pos as u64)
    }
}
