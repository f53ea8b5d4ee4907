use crate::{Sysno, SyscallError};
use kernel_alloc::MemoryAllocator;
use kernel_memory_addresses::VirtualAddress;
use kernel_sched::uaccess::MAX_PATH;
use kernel_sched::{
    Env, FileSystem, KillOutcome, OpenFlags, SchedError, Scheduler, ThreadId, TrapFrame, Whence,
};
use kernel_sync::SpinLock;
use kernel_vmem::PhysMapper;
use log::{debug, trace, warn};

type Result<T> = core::result::Result<T, SyscallError>;

/// Bytes moved between user memory and a device per lock acquisition.
const BOUNCE: usize = 256;

/// Largest property-channel request accepted from user space.
pub const MAILBOX_BYTES: usize = 256;

/// The byte stream behind `uart_read` and `uart_write`.
pub trait Console {
    /// Wait for the next received byte.
    fn read_byte(&mut self) -> u8;

    fn write_byte(&mut self, byte: u8);
}

/// The VideoCore mailbox.
pub trait Firmware {
    /// Run the request in `buffer` on `channel` and wait for the answer,
    /// which overwrites the request. `false` if the firmware rejected it.
    fn mailbox_call(&mut self, channel: u8, buffer: &mut MailboxBuffer) -> bool;
}

/// A property-channel message. The first word is its size in bytes.
#[derive(Debug, Clone, Eq, PartialEq)]
#[repr(C, align(16))]
pub struct MailboxBuffer(pub [u32; MAILBOX_BYTES / 4]);

impl MailboxBuffer {
    fn from_le_bytes(bytes: &[u8]) -> Self {
        let mut words = [0; MAILBOX_BYTES / 4];
        for (word, b) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        }
        Self(words)
    }

    fn write_le_bytes(&self, bytes: &mut [u8]) {
        for (b, word) in bytes.chunks_exact_mut(4).zip(self.0) {
            b.copy_from_slice(&word.to_le_bytes());
        }
    }
}

/// What the trap handler has to do after [`Syscalls::dispatch`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Return to the caller; `x0` holds the result.
    Resume,
    /// The frame or the caller's translation tables were replaced. Flush
    /// the TLB and instruction cache, then return through the new frame.
    FlushAndResume,
    /// The caller is dead. Schedule and switch away; never return to it.
    Exited,
}

enum Reply {
    Value(u64),
    Replaced,
    Exited,
}

/// Everything a syscall may touch, borrowed for the duration of one trap.
pub struct Syscalls<'k, M, A, F, C, W> {
    pub sched: &'k SpinLock<Scheduler>,
    pub env: Env<'k, M, A, F>,
    pub console: &'k mut C,
    pub firmware: &'k mut W,
}

impl<M, A, F, C, W> Syscalls<'_, M, A, F, C, W>
where
    M: PhysMapper,
    A: MemoryAllocator,
    F: FileSystem,
    C: Console,
    W: Firmware,
{
    /// Run the syscall described by `tf` and store its result in `x0`.
    pub fn dispatch(&mut self, tf: &mut TrapFrame) -> Outcome {
        let nr = tf.syscall_number();
        let reply = Sysno::try_from(nr).and_then(|sysno| {
            trace!(
                "{sysno:?}({:#x}, {:#x}, {:#x})",
                tf.arg(0),
                tf.arg(1),
                tf.arg(2)
            );
            self.call(sysno, tf)
        });

        match reply {
            Ok(Reply::Value(value)) => {
                tf.x[0] = value;
                Outcome::Resume
            }
            Ok(Reply::Replaced) => Outcome::FlushAndResume,
            Ok(Reply::Exited) => Outcome::Exited,
            Err(e @ SyscallError::UnknownSyscall(_)) => {
                warn!("{e}");
                tf.set_return(-1);
                Outcome::Resume
            }
            Err(e) => {
                debug!("syscall {nr}: {e}");
                tf.set_return(-1);
                Outcome::Resume
            }
        }
    }

    #[allow(clippy::too_many_lines)]
    fn call(&mut self, sysno: Sysno, tf: &mut TrapFrame) -> Result<Reply> {
        let [a0, a1, a2, a3, ..] = core::array::from_fn::<u64, 6, _>(|n| tf.arg(n));
        match sysno {
            Sysno::GetPid => {
                let id = self.sched.lock_irq().current_id().ok_or(SchedError::NoCurrentThread)?;
                Ok(Reply::Value(id.as_u64()))
            }
            Sysno::UartRead => self.uart_read(user(a0), length(a1)),
            Sysno::UartWrite => self.uart_write(user(a0), length(a1)),
            Sysno::Exec => {
                let mut buf = [0; MAX_PATH];
                let mut sched = self.sched.lock_irq();
                let path = sched.read_user_str(self.env.mapper, user(a0), &mut buf)?;
                sched.exec(&mut self.env, path, tf)?;
                Ok(Reply::Replaced)
            }
            Sysno::Fork => {
                let child = self.sched.lock_irq().fork(&mut self.env, tf)?;
                Ok(Reply::Value(child.as_u64()))
            }
            Sysno::Exit => {
                self.sched.lock_irq().retire_current(&mut self.env, a0.cast_signed())?;
                Ok(Reply::Exited)
            }
            Sysno::MboxCall => self.mbox_call(a0, user(a1)),
            Sysno::Kill => {
                let outcome = self
                    .sched
                    .lock_irq()
                    .kill(&mut self.env, ThreadId::new(a0), a1.cast_signed())?;
                Ok(match outcome {
                    KillOutcome::Other => Reply::Value(0),
                    KillOutcome::SelfKilled => Reply::Exited,
                })
            }
            Sysno::Signal => {
                self.sched.lock_irq().register_signal(a0, user(a1))?;
                Ok(Reply::Value(0))
            }
            Sysno::SigKill => {
                self.sched.lock_irq().send_signal(ThreadId::new(a0), a1)?;
                Ok(Reply::Value(0))
            }
            Sysno::Mmap => {
                let va = self.sched.lock_irq().mmap(&mut self.env, a0, a1, a2, a3)?;
                Ok(Reply::Value(va.as_u64()))
            }
            Sysno::Open => {
                let flags = OpenFlags(u32::try_from(a1).map_err(|_| SyscallError::InvalidArgument(a1))?);
                let mut buf = [0; MAX_PATH];
                let mut sched = self.sched.lock_irq();
                let path = sched.read_user_str(self.env.mapper, user(a0), &mut buf)?;
                let fd = sched.open(&mut *self.env.fs, path, flags)?;
                Ok(Reply::Value(fd as u64))
            }
            Sysno::Close => {
                self.sched.lock_irq().close(&mut *self.env.fs, length(a0))?;
                Ok(Reply::Value(0))
            }
            Sysno::Write => self.write(length(a0), user(a1), length(a2)),
            Sysno::Read => self.read(length(a0), user(a1), length(a2)),
            Sysno::Mkdir => {
                let mut buf = [0; MAX_PATH];
                let path = self.path(a0, &mut buf)?;
                self.env.fs.mkdir(path)?;
                Ok(Reply::Value(0))
            }
            Sysno::Mount => {
                let (mut target, mut filesystem) = ([0; MAX_PATH], [0; MAX_PATH]);
                let target = self.path(a1, &mut target)?;
                let filesystem = self.path(a2, &mut filesystem)?;
                self.env.fs.mount(target, filesystem)?;
                Ok(Reply::Value(0))
            }
            Sysno::Chdir => {
                let mut buf = [0; MAX_PATH];
                let path = self.path(a0, &mut buf)?;
                self.env.fs.chdir(path)?;
                Ok(Reply::Value(0))
            }
            Sysno::Lseek64 => {
                let whence = Whence::from_raw(a2).ok_or(SyscallError::InvalidArgument(a2))?;
                let file = self.sched.lock_irq().file(length(a0))?;
                let pos = self.env.fs.lseek64(file, a1.cast_signed(), whence)?;
                Ok(Reply::Value(pos))
            }
            Sysno::Ioctl => {
                let file = self.sched.lock_irq().file(length(a0))?;
                Ok(Reply::Value(self.env.fs.ioctl(file, a1, a2)?))
            }
            Sysno::SigReturn => {
                self.sched.lock_irq().sigreturn(&mut self.env, tf)?;
                Ok(Reply::Replaced)
            }
        }
    }

    fn path<'b>(&self, va: u64, buf: &'b mut [u8]) -> Result<&'b str> {
        let path = self.sched.lock_irq().read_user_str(self.env.mapper, user(va), buf)?;
        Ok(path)
    }

    fn uart_read(&mut self, buf: VirtualAddress, len: usize) -> Result<Reply> {
        self.sched.lock_irq().check_user_writable(self.env.mapper, buf, len)?;
        let mut bounce = [0; BOUNCE];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(BOUNCE);
            for byte in &mut bounce[..n] {
                *byte = self.console.read_byte();
            }
            self.sched
                .lock_irq()
                .copy_to_user(self.env.mapper, buf + done as u64, &bounce[..n])?;
            done += n;
        }
        Ok(Reply::Value(done as u64))
    }

    fn uart_write(&mut self, buf: VirtualAddress, len: usize) -> Result<Reply> {
        let mut bounce = [0; BOUNCE];
        let mut done = 0;
        while done < len {
            let n = (len - done).min(BOUNCE);
            self.sched
                .lock_irq()
                .copy_from_user(self.env.mapper, buf + done as u64, &mut bounce[..n])?;
            for &byte in &bounce[..n] {
                self.console.write_byte(byte);
            }
            done += n;
        }
        Ok(Reply::Value(done as u64))
    }

    fn write(&mut self, fd: usize, buf: VirtualAddress, len: usize) -> Result<Reply> {
        let mut bounce = [0; BOUNCE];
        let mut done = 0;
        while done < len {
            let want = (len - done).min(BOUNCE);
            let file = {
                let sched = self.sched.lock_irq();
                let file = sched.file(fd)?;
                sched.copy_from_user(self.env.mapper, buf + done as u64, &mut bounce[..want])?;
                file
            };
            let n = self.env.fs.write(file, &bounce[..want])?.min(want);
            done += n;
            if n < want {
                break;
            }
        }
        Ok(Reply::Value(done as u64))
    }

    fn read(&mut self, fd: usize, buf: VirtualAddress, len: usize) -> Result<Reply> {
        self.sched.lock_irq().check_user_writable(self.env.mapper, buf, len)?;
        let mut bounce = [0; BOUNCE];
        let mut done = 0;
        while done < len {
            let want = (len - done).min(BOUNCE);
            let file = self.sched.lock_irq().file(fd)?;
            let n = self.env.fs.read(file, &mut bounce[..want])?.min(want);
            self.sched
                .lock_irq()
                .copy_to_user(self.env.mapper, buf + done as u64, &bounce[..n])?;
            done += n;
            if n < want {
                break;
            }
        }
        Ok(Reply::Value(done as u64))
    }

    fn mbox_call(&mut self, channel: u64, mbox: VirtualAddress) -> Result<Reply> {
        let invalid = SyscallError::InvalidArgument;
        let channel = u8::try_from(channel)
            .ok()
            .filter(|c| *c < 16)
            .ok_or(invalid(channel))?;

        let mut raw = [0; MAILBOX_BYTES];
        let size = {
            let sched = self.sched.lock_irq();
            sched.copy_from_user(self.env.mapper, mbox, &mut raw[..4])?;
            let size = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let size = usize::try_from(size).map_err(|_| invalid(u64::from(size)))?;
            if !(8..=MAILBOX_BYTES).contains(&size) || !size.is_multiple_of(4) {
                return Err(invalid(size as u64));
            }
            sched.copy_from_user(self.env.mapper, mbox, &mut raw[..size])?;
            size
        };

        let mut buffer = MailboxBuffer::from_le_bytes(&raw[..size]);
        let ok = self.firmware.mailbox_call(channel, &mut buffer);
        buffer.write_le_bytes(&mut raw[..size]);
        self.sched
            .lock_irq()
            .copy_to_user(self.env.mapper, mbox, &raw[..size])?;
        Ok(Reply::Value(u64::from(ok)))
    }
}

const fn user(raw: u64) -> VirtualAddress {
    VirtualAddress::new(raw)
}

/// Lengths and descriptors beyond `usize` saturate and fail further down.
fn length(raw: u64) -> usize {
    usize::try_from(raw).unwrap_or(usize::MAX)
}
