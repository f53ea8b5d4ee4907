//! A single user process over host memory, with fake devices.

#![allow(dead_code)]

use kernel_alloc::{Allocator, PageDescriptor, WindowConfig};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sched::memory::{MAP_ANONYMOUS, MAP_POPULATE, PROT_READ, PROT_WRITE};
use kernel_sched::{
    Env, FileHandle, FileSystem, FsError, OpenFlags, Priority, Scheduler, SchedulerConfig,
    ThreadId, TrapFrame, Whence,
};
use kernel_sync::SpinLock;
use kernel_syscall::{Console, Firmware, MailboxBuffer, Outcome, Syscalls, Sysno};
use kernel_vmem::host::HostMemory;
use std::collections::{BTreeMap, VecDeque};

pub const BASE: u64 = 0x4000_0000;
pub const PAGES: usize = 1024;

unsafe extern "C" fn thread_start() {}
unsafe extern "C" fn return_to_user() {}
unsafe extern "C" fn idle() {}

pub const CONFIG: SchedulerConfig = SchedulerConfig {
    thread_start,
    return_to_user,
    idle_entry: idle,
    stdio: SchedulerConfig::STDIO,
};

pub type TestCalls<'k, 'a> =
    Syscalls<'k, HostMemory, Allocator<'a, &'a HostMemory>, MemFs, Uart, Mailbox>;

/// Run `f` with a `High` user thread running a small program. Returns that
/// thread's id through `f`'s second argument.
pub fn with_process(f: impl FnOnce(&mut TestCalls<'_, '_>, ThreadId)) {
    let mem = HostMemory::new(BASE, PAGES);
    let mut table = vec![PageDescriptor::new(); PAGES];
    let mut alloc = Allocator::new(&mem, WindowConfig::new(PhysicalAddress::new(BASE), PAGES), &mut table);
    alloc.init();
    let mut fs = MemFs::new();
    let sched = SpinLock::new(Scheduler::new(CONFIG));
    let mut console = Uart::default();
    let mut firmware = Mailbox::new();
    let mut calls = Syscalls {
        sched: &sched,
        env: Env {
            mapper: &mem,
            alloc: &mut alloc,
            fs: &mut fs,
        },
        console: &mut console,
        firmware: &mut firmware,
    };

    let id = {
        let mut s = sched.lock_irq();
        s.init(Priority::Low);
        let id = s
            .thread_create(&mut calls.env, 0, Priority::High, Some(&[0xAA; 64][..]))
            .unwrap();
        assert_eq!(s.schedule(&mut calls.env).unwrap().unwrap().to, id);
        id
    };
    f(&mut calls, id);
}

/// Trap into `nr` with `args`; returns what the trap handler sees.
pub fn trap(calls: &mut TestCalls<'_, '_>, nr: Sysno, args: &[u64]) -> (Outcome, TrapFrame) {
    let mut tf = TrapFrame::zeroed();
    tf.x[8] = nr as u64;
    tf.x[..args.len()].copy_from_slice(args);
    let outcome = calls.dispatch(&mut tf);
    (outcome, tf)
}

/// `x0` of a syscall that returns to its caller.
pub fn ret(calls: &mut TestCalls<'_, '_>, nr: Sysno, args: &[u64]) -> i64 {
    let (outcome, tf) = trap(calls, nr, args);
    assert_eq!(outcome, Outcome::Resume, "{nr:?}");
    tf.x[0].cast_signed()
}

/// Two populated read/write pages of user memory.
pub fn scratch(calls: &mut TestCalls<'_, '_>) -> u64 {
    let len = 2 * kernel_memory_addresses::PAGE_SIZE;
    let va = ret(
        calls,
        Sysno::Mmap,
        &[0, len, PROT_READ | PROT_WRITE, MAP_ANONYMOUS | MAP_POPULATE],
    );
    assert!(va > 0);
    va.cast_unsigned()
}

pub fn poke(calls: &TestCalls<'_, '_>, va: u64, bytes: &[u8]) {
    calls
        .sched
        .lock_irq()
        .copy_to_user(calls.env.mapper, VirtualAddress::new(va), bytes)
        .unwrap();
}

pub fn peek(calls: &TestCalls<'_, '_>, va: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0; len];
    calls
        .sched
        .lock_irq()
        .copy_from_user(calls.env.mapper, VirtualAddress::new(va), &mut out)
        .unwrap();
    out
}

/// Write `s` NUL-terminated at `va`.
pub fn poke_str(calls: &TestCalls<'_, '_>, va: u64, s: &str) {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    poke(calls, va, &bytes);
}

#[derive(Default)]
pub struct Uart {
    pub input: VecDeque<u8>,
    pub output: Vec<u8>,
}

impl Console for Uart {
    fn read_byte(&mut self) -> u8 {
        self.input.pop_front().expect("console input starved")
    }

    fn write_byte(&mut self, byte: u8) {
        self.output.push(byte);
    }
}

/// Answers every request with the response code and records the channel.
pub struct Mailbox {
    pub accept: bool,
    pub channels: Vec<u8>,
    pub requests: Vec<Vec<u32>>,
}

impl Mailbox {
    pub const RESPONSE_OK: u32 = 0x8000_0000;
    pub const RESPONSE_ERR: u32 = 0x8000_0001;

    pub fn new() -> Self {
        Self {
            accept: true,
            channels: Vec::new(),
            requests: Vec::new(),
        }
    }
}

impl Firmware for Mailbox {
    fn mailbox_call(&mut self, channel: u8, buffer: &mut MailboxBuffer) -> bool {
        let words = (buffer.0[0] / 4) as usize;
        self.channels.push(channel);
        self.requests.push(buffer.0[..words].to_vec());
        buffer.0[1] = if self.accept {
            Self::RESPONSE_OK
        } else {
            Self::RESPONSE_ERR
        };
        self.accept
    }
}

/// Flat file system that also records directory operations.
#[derive(Default)]
pub struct MemFs {
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: Vec<String>,
    pub cwd: String,
    pub mounts: Vec<(String, String)>,
    open: Vec<Option<(String, usize)>>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut fs = Self {
            cwd: "/".into(),
            ..Self::default()
        };
        for path in SchedulerConfig::STDIO {
            fs.files.insert(path.into(), Vec::new());
        }
        fs
    }

    pub fn add(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.into(), data.to_vec());
    }

    pub fn open_count(&self) -> usize {
        self.open.iter().flatten().count()
    }

    fn entry(&mut self, file: FileHandle) -> Result<&mut (String, usize), FsError> {
        self.open
            .get_mut(file.raw() as usize)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadHandle)
    }
}

impl FileSystem for MemFs {
    fn open(&mut self, path: &str, flags: OpenFlags) -> Result<FileHandle, FsError> {
        if !self.files.contains_key(path) {
            if !flags.contains(OpenFlags::CREAT) {
                return Err(FsError::NotFound);
            }
            self.files.insert(path.into(), Vec::new());
        }
        let entry = Some((path.to_string(), 0));
        let index = match self.open.iter().position(Option::is_none) {
            Some(i) => {
                self.open[i] = entry;
                i
            }
            None => {
                self.open.push(entry);
                self.open.len() - 1
            }
        };
        Ok(FileHandle::new(index as u64))
    }

    fn close(&mut self, file: FileHandle) -> Result<(), FsError> {
        self.open
            .get_mut(file.raw() as usize)
            .and_then(Option::take)
            .map(drop)
            .ok_or(FsError::BadHandle)
    }

    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        let (path, pos) = self.entry(file)?.clone();
        let data = &self.files[&path];
        let n = buf.len().min(data.len().saturating_sub(pos));
        buf[..n].copy_from_slice(&data[pos..pos + n]);
        self.entry(file)?.1 += n;
        Ok(n)
    }

    fn write(&mut self, file: FileHandle, buf: &[u8]) -> Result<usize, FsError> {
        let (path, pos) = self.entry(file)?.clone();
        let data = self.files.get_mut(&path).ok_or(FsError::NotFound)?;
        if data.len() < pos + buf.len() {
            data.resize(pos + buf.len(), 0);
        }
        data[pos..pos + buf.len()].copy_from_slice(buf);
        self.entry(file)?.1 += buf.len();
        Ok(buf.len())
    }

    fn size(&mut self, file: FileHandle) -> Result<usize, FsError> {
        let path = self.entry(file)?.0.clone();
        Ok(self.files[&path].len())
    }

    fn lseek64(&mut self, file: FileHandle, offset: i64, whence: Whence) -> Result<u64, FsError> {
        let size = self.size(file)? as i64;
        let entry = self.entry(file)?;
        let origin = match whence {
            Whence::Set => 0,
            Whence::Current => entry.1 as i64,
            Whence::End => size,
        };
        let pos = origin.checked_add(offset).filter(|p| *p >= 0).ok_or(FsError::Invalid)?;
        entry.1 = pos as usize;
        Ok(pos as u64)
    }

    fn ioctl(&mut self, file: FileHandle, request: u64, arg: u64) -> Result<u64, FsError> {
        self.entry(file)?;
        match request {
            1 => Ok(arg * 2),
            _ => Err(FsError::NotSupported),
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        if self.dirs.iter().any(|d| d == path) {
            return Err(FsError::Exists);
        }
        self.dirs.push(path.into());
        Ok(())
    }

    fn mount(&mut self, target: &str, filesystem: &str) -> Result<(), FsError> {
        self.mounts.push((target.into(), filesystem.into()));
        Ok(())
    }

    fn chdir(&mut self, path: &str) -> Result<(), FsError> {
        if !self.dirs.iter().any(|d| d == path) {
            return Err(FsError::NotFound);
        }
        self.cwd = path.into();
        Ok(())
    }
}
