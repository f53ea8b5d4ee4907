//! A scheduler over host memory with an in-memory file system.

#![allow(dead_code)]

use kernel_alloc::{Allocator, PageDescriptor, WindowConfig};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_sched::{
    Env, Esr, FileHandle, FileSystem, FsError, OpenFlags, Priority, Scheduler, SchedulerConfig,
    ThreadId, Whence,
};
use kernel_vmem::AddressSpace;
use kernel_vmem::host::HostMemory;
use std::collections::BTreeMap;

pub const BASE: u64 = 0x4000_0000;
pub const PAGES: usize = 1024;
pub const PAGE: usize = PAGE_SIZE as usize;

unsafe extern "C" fn thread_start() {}
unsafe extern "C" fn return_to_user() {}
unsafe extern "C" fn idle() {}

pub const CONFIG: SchedulerConfig = SchedulerConfig {
    thread_start,
    return_to_user,
    idle_entry: idle,
    stdio: SchedulerConfig::STDIO,
};

pub fn addr(trampoline: kernel_sched::Trampoline) -> u64 {
    SchedulerConfig::address(trampoline)
}

pub type TestEnv<'e, 'a> = Env<'e, HostMemory, Allocator<'a, &'a HostMemory>, MemFs>;

/// Run `f` against a fresh scheduler whose boot thread (priority `Low`)
/// is already adopted.
pub fn with_kernel(f: impl FnOnce(&mut Scheduler, &mut TestEnv<'_, '_>)) {
    let mem = HostMemory::new(BASE, PAGES);
    let mut table = vec![PageDescriptor::new(); PAGES];
    let mut alloc = Allocator::new(&mem, WindowConfig::new(PhysicalAddress::new(BASE), PAGES), &mut table);
    alloc.init();
    let mut fs = MemFs::new();
    let mut env = Env {
        mapper: &mem,
        alloc: &mut alloc,
        fs: &mut fs,
    };
    let mut sched = Scheduler::new(CONFIG);
    sched.init(Priority::Low);
    f(&mut sched, &mut env);
}

/// Create a `High` thread running `program` and switch to it.
pub fn enter(sched: &mut Scheduler, env: &mut TestEnv<'_, '_>, program: &[u8]) -> ThreadId {
    let id = sched
        .thread_create(env, 0, Priority::High, Some(program))
        .unwrap();
    let switch = sched.schedule(env).unwrap().unwrap();
    assert_eq!(switch.to, id);
    id
}

pub fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

/// The current thread's address space.
pub fn space<'m>(sched: &Scheduler, mem: &'m HostMemory) -> AddressSpace<'m, HostMemory> {
    sched.address_space(mem).unwrap()
}

/// A user data abort with fault status `fsc`.
pub fn data_abort(fsc: u32, write: bool) -> Esr {
    Esr::new()
        .with_ec(Esr::EC_DABT_LOWER)
        .with_il(true)
        .with_iss(fsc | if write { 1 << 6 } else { 0 })
}

pub fn instruction_abort(fsc: u32) -> Esr {
    Esr::new().with_ec(Esr::EC_IABT_LOWER).with_il(true).with_iss(fsc)
}

/// Level 3 translation fault.
pub const TRANSLATION_L3: u32 = 0b00_0111;
/// Level 3 permission fault.
pub const PERMISSION_L3: u32 = 0b00_1111;

pub fn program(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Flat file system: paths map to byte vectors, handles to `(path, pos)`.
#[derive(Default)]
pub struct MemFs {
    pub files: BTreeMap<String, Vec<u8>>,
    open: Vec<Option<(String, usize)>>,
}

impl MemFs {
    pub fn new() -> Self {
        let mut fs = Self::default();
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
}
