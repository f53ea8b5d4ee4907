//! # Scheduler
//!
//! Owns every thread control block and the queues linking them. Exactly one
//! thread is `Running` at a time and it sits on no queue; `schedule` puts it
//! back at the tail of its priority's queue (unless it died) before picking
//! the head of the highest non-empty queue.
//!
//! Dead threads wait on the zombie queue until [`Scheduler::reap_zombies`]
//! runs from the idle loop; their stacks stay valid until then, which is what
//! lets a thread retire itself and still switch away on its own stack.

use crate::context::{CpuContext, Switch};
use crate::error::SchedError;
use crate::fault::{Esr, ExceptionClass, FaultOutcome, FaultStatus};
use crate::fs::{FileHandle, FileSystem, FsError, OpenFlags};
use crate::memory::{MAP_POPULATE, MemoryRegion, POPULATE_FILL, Protection, RegionList};
use crate::queue::{ThreadQueue, ThreadTable};
use crate::signal::{SIGRETURN_TRAMPOLINE, SignalAction, SignalState};
use crate::thread::{Priority, Program, Slot, Thread, ThreadId, ThreadState};
use crate::trap::TrapFrame;
use crate::uaccess;
use alloc::boxed::Box;
use alloc::vec::Vec;
use kernel_alloc::MemoryAllocator;
use kernel_info::memory::{MMAP_BASE, SIGNAL_STACK_BASE, USER_STACK_TOP};
use kernel_info::thread::{KERNEL_STACK_SIZE, NSIG, USER_STACK_BASE, USER_STACK_SIZE};
use kernel_memory_addresses::{
    PAGE_SIZE, PhysicalAddress, VirtualAddress, page_align_down, page_align_up, pages_for,
};
use kernel_vmem::{AddressSpace, MapAttributes, MemoryType, PhysMapper};
use log::{debug, info, trace, warn};

#[allow(clippy::cast_possible_truncation)]
const PAGE: usize = PAGE_SIZE as usize;

#[allow(clippy::cast_possible_truncation)]
const fn bytes(len: u64) -> usize {
    len as usize
}

/// Everything outside the scheduler that thread operations touch.
pub struct Env<'e, M, A, F> {
    pub mapper: &'e M,
    pub alloc: &'e mut A,
    pub fs: &'e mut F,
}

/// Code a fresh context "returns" into on its first switch-in.
pub type Trampoline = unsafe extern "C" fn();

#[derive(Debug, Copy, Clone)]
pub struct SchedulerConfig {
    /// First switch-in of a new thread lands here; it calls the thread's
    /// entry and exits the thread when that returns.
    pub thread_start: Trampoline,
    /// First switch-in of a forked child lands here; it restores the trap
    /// frame at the top of the kernel stack and `eret`s.
    pub return_to_user: Trampoline,
    /// Entry of the idle thread made up when nothing else can run.
    pub idle_entry: Trampoline,
    /// Opened as descriptors 0, 1 and 2 of every new thread.
    pub stdio: [&'static str; 3],
}

impl SchedulerConfig {
    /// Address of a trampoline, as stored in a saved `lr`.
    #[must_use]
    pub fn address(trampoline: Trampoline) -> u64 {
        trampoline as usize as u64
    }

    pub const STDIO: [&'static str; 3] = ["/dev/uart/stdin", "/dev/uart/stdout", "/dev/uart/stderr"];
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KillOutcome {
    /// Another thread was killed; the caller keeps running.
    Other,
    /// The caller killed itself and must switch away without returning.
    SelfKilled,
}

/// What `fork` duplicates from the parent.
struct Image {
    user_stack: Option<PhysicalAddress>,
    program: Option<Program>,
    pages: Vec<(VirtualAddress, PhysicalAddress)>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    threads: ThreadTable,
    run: [ThreadQueue; 3],
    zombies: ThreadQueue,
    current: Option<Slot>,
    next_id: u64,
}

impl Scheduler {
    #[must_use]
    pub const fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            threads: ThreadTable::new(),
            run: [ThreadQueue::new(); 3],
            zombies: ThreadQueue::new(),
            current: None,
            next_id: 0,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Adopt the flow of control that calls this as the running thread.
    ///
    /// It owns no stacks or tables: its context is only filled in the first
    /// time it is switched away from. Calling `init` twice returns the
    /// thread adopted first.
    pub fn init(&mut self, priority: Priority) -> ThreadId {
        if let Some(t) = self.current() {
            return t.id;
        }
        let id = self.allocate_id();
        let mut thread = Box::new(Thread::new(id, priority, 0));
        thread.state = ThreadState::Running;
        self.current = Some(self.threads.insert(thread));
        info!("adopted boot flow as thread {id}");
        id
    }

    #[must_use]
    pub fn current_id(&self) -> Option<ThreadId> {
        self.current().map(Thread::id)
    }

    #[must_use]
    pub fn current(&self) -> Option<&Thread> {
        self.current.and_then(|s| self.threads.get(s))
    }

    /// A thread that has not been reaped yet.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.find(id).and_then(|s| self.threads.get(s))
    }

    /// All threads not reaped yet, in table order.
    pub fn threads(&self) -> impl Iterator<Item = &Thread> + '_ {
        self.threads.iter()
    }

    /// Ready threads of `priority`, head first.
    #[must_use]
    pub fn ready(&self, priority: Priority) -> Vec<ThreadId> {
        self.ids(&self.run[priority.index()])
    }

    /// Dead threads waiting to be reaped, oldest first.
    #[must_use]
    pub fn zombies(&self) -> Vec<ThreadId> {
        self.ids(&self.zombies)
    }

    fn ids(&self, queue: &ThreadQueue) -> Vec<ThreadId> {
        queue
            .iter(&self.threads)
            .filter_map(|s| self.threads.get(s).map(Thread::id))
            .collect()
    }

    const fn allocate_id(&mut self) -> ThreadId {
        let id = ThreadId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn current_slot(&self) -> Result<Slot, SchedError> {
        self.current.ok_or(SchedError::NoCurrentThread)
    }

    fn current_mut(&mut self) -> Result<&mut Thread, SchedError> {
        let slot = self.current_slot()?;
        self.threads.get_mut(slot).ok_or(SchedError::NoCurrentThread)
    }

    fn enqueue(&mut self, slot: Slot) {
        let Some(t) = self.threads.get_mut(slot) else {
            return;
        };
        t.state = ThreadState::Ready;
        let queue = t.priority.index();
        self.run[queue].push_back(&mut self.threads, slot);
    }

    fn dequeue(&mut self) -> Option<Slot> {
        Priority::DESCENDING
            .into_iter()
            .find_map(|p| self.run[p.index()].pop_front(&mut self.threads))
    }

    /// Create a thread and put it on its run queue.
    ///
    /// With a `program`, the image is copied into fresh pages mapped
    /// read/execute at address zero. Every thread gets a kernel stack, a user
    /// stack mapped below [`USER_STACK_TOP`], its own translation tables and
    /// the three standard descriptors.
    ///
    /// # Errors
    /// Allocation or mapping failures; nothing is left allocated.
    pub fn thread_create<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        entry: u64,
        priority: Priority,
        program: Option<&[u8]>,
    ) -> Result<ThreadId, SchedError> {
        let slot = self.spawn(env, entry, priority, program)?;
        self.enqueue(slot);
        let id = self.threads.get(slot).map(Thread::id).ok_or(SchedError::NoCurrentThread)?;
        debug!("created thread {id} ({priority:?}, entry {entry:#x})");
        Ok(id)
    }

    fn spawn<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        entry: u64,
        priority: Priority,
        program: Option<&[u8]>,
    ) -> Result<Slot, SchedError> {
        let id = self.allocate_id();
        let mut thread = Box::new(Thread::new(id, priority, entry));
        if let Err(e) = build_thread(env, &mut thread, program, &self.config) {
            warn!("thread {id}: {e}");
            release(env, &mut thread);
            return Err(e);
        }
        Ok(self.threads.insert(thread))
    }

    /// Pick the next thread and make it current.
    ///
    /// The running thread goes back on its queue first unless it is dead, so
    /// `Ok(None)` means it is still the best choice. When nothing at all is
    /// runnable a fresh idle thread is created and run without being queued.
    ///
    /// # Errors
    /// - [`SchedError::NoCurrentThread`] before [`init`](Self::init).
    /// - Allocation failures while creating the idle thread.
    pub fn schedule<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
    ) -> Result<Option<Switch>, SchedError> {
        let prev = self.current_slot()?;
        if self.threads.get(prev).is_some_and(|t| t.state != ThreadState::Dead) {
            self.enqueue(prev);
        }

        let next = match self.dequeue() {
            Some(next) => next,
            None => {
                let entry = SchedulerConfig::address(self.config.idle_entry);
                let idle = self.spawn(env, entry, Priority::Low, None)?;
                debug!("nothing runnable, made idle thread in slot {idle}");
                idle
            }
        };

        if let Some(t) = self.threads.get_mut(next) {
            t.state = ThreadState::Running;
        }
        self.current = Some(next);
        if next == prev {
            return Ok(None);
        }

        let (from, prev_ctx) = {
            let t = self.threads.get_mut(prev).ok_or(SchedError::NoCurrentThread)?;
            (t.id, core::ptr::from_mut::<CpuContext>(&mut t.context))
        };
        let t = self.threads.get(next).ok_or(SchedError::NoCurrentThread)?;
        trace!("switch {from:?} -> {:?}", t.id);
        Ok(Some(Switch {
            from,
            to: t.id,
            prev: prev_ctx,
            next: core::ptr::from_ref(&t.context),
            ttbr0: t.root,
        }))
    }

    /// Mark the running thread dead and queue it for reaping.
    ///
    /// The caller must [`schedule`](Self::schedule) and switch away before
    /// returning anywhere.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`] before [`init`](Self::init).
    pub fn retire_current<M, A, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        code: i64,
    ) -> Result<ThreadId, SchedError> {
        let slot = self.current_slot()?;
        self.retire(env.fs, slot, code)
    }

    fn retire<F: FileSystem>(&mut self, fs: &mut F, slot: Slot, code: i64) -> Result<ThreadId, SchedError> {
        let t = self.threads.get_mut(slot).ok_or(SchedError::NoCurrentThread)?;
        close_files(fs, t);
        t.state = ThreadState::Dead;
        t.exit_code = code;
        let id = t.id;
        self.zombies.push_back(&mut self.threads, slot);
        debug!("thread {id} exited with {code}");
        Ok(id)
    }

    /// Kill thread `id` with exit code `code`.
    ///
    /// # Errors
    /// [`SchedError::ThreadNotFound`] if `id` is unknown or already dead.
    pub fn kill<M, A, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        id: ThreadId,
        code: i64,
    ) -> Result<KillOutcome, SchedError> {
        let slot = self
            .threads
            .find(id)
            .filter(|&s| self.threads.get(s).is_some_and(|t| t.state != ThreadState::Dead))
            .ok_or(SchedError::ThreadNotFound(id))?;

        if Some(slot) == self.current {
            self.retire(env.fs, slot, code)?;
            return Ok(KillOutcome::SelfKilled);
        }
        if let Some(t) = self.threads.get(slot)
            && t.state == ThreadState::Ready
        {
            let queue = t.priority.index();
            self.run[queue].remove(&mut self.threads, slot);
        }
        self.retire(env.fs, slot, code)?;
        Ok(KillOutcome::Other)
    }

    /// Free everything owned by dead threads other than the running one.
    /// Returns how many were reaped.
    pub fn reap_zombies<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
    ) -> usize {
        let mut kept = ThreadQueue::new();
        let mut reaped = 0;
        while let Some(slot) = self.zombies.pop_front(&mut self.threads) {
            if Some(slot) == self.current {
                kept.push_back(&mut self.threads, slot);
                continue;
            }
            if let Some(mut t) = self.threads.take(slot) {
                trace!("reaping thread {}", t.id);
                release(env, &mut t);
                reaped += 1;
            }
        }
        self.zombies = kept;
        reaped
    }

    /// Duplicate the running thread. The child resumes from `tf` with a
    /// return value of zero.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`] or allocation/mapping failures.
    pub fn fork<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        tf: &TrapFrame,
    ) -> Result<ThreadId, SchedError> {
        let parent = self.current.and_then(|s| self.threads.get(s)).ok_or(SchedError::NoCurrentThread)?;
        let id = ThreadId::new(self.next_id);
        let mut child = Box::new(Thread::new(id, parent.priority, parent.entry));
        child.signals.handlers = parent.signals.handlers;
        child.regions = parent.regions.clone();
        child.mmap_cursor = parent.mmap_cursor;
        let image = Image {
            user_stack: parent.user_stack,
            program: parent.program,
            pages: parent.pages.clone(),
        };
        let parent_id = parent.id;
        self.next_id += 1;

        if let Err(e) = build_fork(env, &mut child, &image, tf, &self.config) {
            warn!("fork of {parent_id}: {e}");
            release(env, &mut child);
            return Err(e);
        }
        let slot = self.threads.insert(child);
        self.enqueue(slot);
        debug!("thread {parent_id} forked {id}");
        Ok(id)
    }

    /// Replace the running thread's program with the file at `path` and
    /// reset `tf` to start it at address zero on an empty stack.
    ///
    /// The caller must invalidate the TLB before returning to user space.
    ///
    /// # Errors
    /// File system errors, an empty file, or allocation failures. The old
    /// program is left intact unless the new image was read in full.
    pub fn exec<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        path: &str,
        tf: &mut TrapFrame,
    ) -> Result<(), SchedError> {
        let slot = self.current_slot()?;
        let program = read_program(env, path)?;
        let Some(t) = self.threads.get_mut(slot) else {
            free_logged(env.alloc, program.base);
            return Err(SchedError::NoCurrentThread);
        };

        if let Err(e) = replace_image(env, t, program) {
            warn!("exec {path} in thread {}: {e}", t.id);
            return Err(e);
        }

        *tf = TrapFrame::zeroed();
        tf.sp_el0 = USER_STACK_TOP;
        tf.elr = 0;
        tf.spsr = 0;
        info!("thread {} exec {path} ({} bytes)", t.id, program.len);
        Ok(())
    }

    /// Reserve `len` bytes of the running thread's address space.
    ///
    /// `addr == 0` places the mapping at the thread's cursor and advances it;
    /// any other `addr` is a page-aligned-down hint. Either way the start
    /// slides past existing regions. Pages are populated on first touch
    /// unless `flags` has [`MAP_POPULATE`].
    ///
    /// # Errors
    /// [`SchedError::BadAddress`] for a zero length or no room; allocation
    /// failures when populating, after which nothing stays mapped.
    pub fn mmap<M: PhysMapper, A: MemoryAllocator, F>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        addr: u64,
        len: u64,
        prot: u64,
        flags: u64,
    ) -> Result<VirtualAddress, SchedError> {
        let bad = SchedError::BadAddress(VirtualAddress::new(addr));
        if len == 0 || len > MMAP_BASE {
            return Err(bad);
        }
        let len = page_align_up(len);
        let t = self.current_mut()?;
        let hint = if addr == 0 {
            t.mmap_cursor
        } else {
            VirtualAddress::new(page_align_down(addr))
        };
        let start = t.regions.place(hint, len).ok_or(bad)?;
        let prot = Protection::from_prot(prot);
        t.regions.push(MemoryRegion::new(start, start + len, prot));
        if addr == 0 {
            t.mmap_cursor = start + len;
        }

        if flags & MAP_POPULATE != 0
            && let Err(e) = populate(env, t, start, len, prot)
        {
            t.regions.remove(start);
            return Err(e);
        }
        debug!("thread {} mmap {start}+{len:#x} {prot:?}", t.id);
        Ok(start)
    }

    /// Resolve a user abort at `far`.
    ///
    /// A translation fault inside one of the thread's regions that the
    /// region's protection allows gets a fresh zeroed page.
    ///
    /// # Errors
    /// [`SchedError::SegmentationFault`] for anything else; allocation
    /// failures otherwise.
    pub fn handle_fault<M: PhysMapper, A: MemoryAllocator, F>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        far: VirtualAddress,
        esr: Esr,
    ) -> Result<FaultOutcome, SchedError> {
        let segv = SchedError::SegmentationFault(far);
        let t = self.current_mut()?;
        if !esr.is_user_abort() || !matches!(esr.fault_status(), FaultStatus::Translation(_)) {
            return Err(segv);
        }
        let region = *t.regions.find(far).ok_or(segv)?;
        let instruction = matches!(esr.class(), ExceptionClass::InstructionAbortLower);
        if (esr.is_write() && !region.prot.write()) || (instruction && !region.prot.exec()) {
            return Err(segv);
        }
        let root = t.root.ok_or(segv)?;

        let va = far.page_base();
        let space = AddressSpace::from_root(env.mapper, root);
        if space.leaf(va).is_some() {
            return Ok(FaultOutcome::AlreadyMapped(va));
        }
        let pa = zeroed_page(env.mapper, env.alloc)?;
        if let Err(e) = space.map_page(env.alloc, va, pa, region.prot.attributes()) {
            free_logged(env.alloc, pa);
            return Err(e.into());
        }
        t.pages.push((va, pa));
        trace!("thread {} demand page {va} -> {pa}", t.id);
        Ok(FaultOutcome::Populated { va, pa })
    }

    /// Install `handler` for `signum` in the running thread; a zero handler
    /// restores the default.
    ///
    /// # Errors
    /// [`SchedError::BadSignal`] for `signum >= NSIG`.
    pub fn register_signal(&mut self, signum: u64, handler: VirtualAddress) -> Result<(), SchedError> {
        let index = SignalState::slot(signum).ok_or(SchedError::BadSignal(signum))?;
        let t = self.current_mut()?;
        t.signals.handlers[index] = (handler.as_u64() != 0).then_some(handler);
        Ok(())
    }

    /// Make `signum` pending on thread `id`, replacing whatever was pending.
    ///
    /// # Errors
    /// [`SchedError::BadSignal`] or [`SchedError::ThreadNotFound`].
    pub fn send_signal(&mut self, id: ThreadId, signum: u64) -> Result<(), SchedError> {
        if signum >= NSIG as u64 {
            return Err(SchedError::BadSignal(signum));
        }
        let t = self
            .threads
            .find(id)
            .and_then(|s| self.threads.get_mut(s))
            .filter(|t| t.state != ThreadState::Dead)
            .ok_or(SchedError::ThreadNotFound(id))?;
        if let Some(old) = t.signals.pending.replace(signum) {
            debug!("thread {id}: signal {old} overwritten by {signum}");
        }
        Ok(())
    }

    /// Act on the running thread's pending signal before it returns to user
    /// space through `tf`.
    ///
    /// With a handler registered, `tf` is saved and rewritten to enter the
    /// handler on a one-page signal stack at [`SIGNAL_STACK_BASE`] whose
    /// bottom holds the `sigreturn` trampoline; `x30` points there. Without
    /// one the thread must be terminated. Nothing happens while a handler is
    /// already running.
    ///
    /// # Errors
    /// Allocation or mapping failures; the signal stays pending.
    pub fn deliver_signal<M: PhysMapper, A: MemoryAllocator, F>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        tf: &mut TrapFrame,
    ) -> Result<SignalAction, SchedError> {
        let t = self.current_mut()?;
        if t.signals.saved.is_some() {
            return Ok(SignalAction::None);
        }
        let Some(signum) = t.signals.pending else {
            return Ok(SignalAction::None);
        };
        let handler = SignalState::slot(signum).and_then(|i| t.signals.handlers[i]);
        let Some(handler) = handler else {
            t.signals.pending = None;
            return Ok(SignalAction::Terminate(signum));
        };
        let root = t.root.ok_or(SchedError::NoCurrentThread)?;

        let pa = zeroed_page(env.mapper, env.alloc)?;
        let page = unsafe { env.mapper.phys_bytes_mut(pa, PAGE) };
        for (word, insn) in page.chunks_exact_mut(4).zip(SIGRETURN_TRAMPOLINE) {
            word.copy_from_slice(&insn.to_le_bytes());
        }
        let base = VirtualAddress::new(SIGNAL_STACK_BASE);
        let space = AddressSpace::from_root(env.mapper, root);
        if let Err(e) = space.map_page(env.alloc, base, pa, MapAttributes::user_rwx()) {
            free_logged(env.alloc, pa);
            return Err(e.into());
        }

        t.signals.pending = None;
        t.signals.stack = Some(pa);
        t.signals.saved = Some(*tf);
        tf.x[0] = signum;
        tf.x[30] = SIGNAL_STACK_BASE;
        tf.elr = handler.as_u64();
        tf.sp_el0 = SIGNAL_STACK_BASE + PAGE_SIZE;
        tf.spsr = 0;
        debug!("thread {}: signal {signum} -> handler {handler}", t.id);
        Ok(SignalAction::Handler { signum, handler })
    }

    /// Leave a signal handler: restore the frame saved at delivery and drop
    /// the signal stack.
    ///
    /// The caller must invalidate the TLB before returning to user space.
    ///
    /// # Errors
    /// [`SchedError::NotInSignalHandler`] outside a handler.
    pub fn sigreturn<M: PhysMapper, A: MemoryAllocator, F>(
        &mut self,
        env: &mut Env<'_, M, A, F>,
        tf: &mut TrapFrame,
    ) -> Result<(), SchedError> {
        let t = self.current_mut()?;
        let saved = t.signals.saved.take().ok_or(SchedError::NotInSignalHandler)?;
        *tf = saved;
        drop_signal_stack(env, t);
        Ok(())
    }

    /// Open `path` on the lowest free descriptor of the running thread.
    ///
    /// # Errors
    /// [`SchedError::TooManyFiles`] or the file system's error.
    pub fn open<F: FileSystem>(&mut self, fs: &mut F, path: &str, flags: OpenFlags) -> Result<usize, SchedError> {
        let t = self.current_mut()?;
        let fd = t.files.iter().position(Option::is_none).ok_or(SchedError::TooManyFiles)?;
        t.files[fd] = Some(fs.open(path, flags)?);
        Ok(fd)
    }

    /// # Errors
    /// [`SchedError::BadDescriptor`] or the file system's error.
    pub fn close<F: FileSystem>(&mut self, fs: &mut F, fd: usize) -> Result<(), SchedError> {
        let t = self.current_mut()?;
        let file = t
            .files
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(SchedError::BadDescriptor(fd))?;
        fs.close(file)?;
        Ok(())
    }

    /// The open file behind descriptor `fd` of the running thread.
    ///
    /// # Errors
    /// [`SchedError::BadDescriptor`].
    pub fn file(&self, fd: usize) -> Result<FileHandle, SchedError> {
        self.current()
            .ok_or(SchedError::NoCurrentThread)?
            .file(fd)
            .ok_or(SchedError::BadDescriptor(fd))
    }

    /// The running thread's address space.
    ///
    /// # Errors
    /// [`SchedError::NoCurrentThread`] if it has no translation tables.
    pub fn address_space<'m, M: PhysMapper>(&self, mapper: &'m M) -> Result<AddressSpace<'m, M>, SchedError> {
        let root = self
            .current()
            .and_then(Thread::root)
            .ok_or(SchedError::NoCurrentThread)?;
        Ok(AddressSpace::from_root(mapper, root))
    }

    /// Copy from the running thread's memory.
    ///
    /// # Errors
    /// See [`uaccess::copy_from_user`].
    pub fn copy_from_user<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        dst: &mut [u8],
    ) -> Result<(), SchedError> {
        uaccess::copy_from_user(&self.address_space(mapper)?, mapper, va, dst)
    }

    /// Copy into the running thread's memory.
    ///
    /// # Errors
    /// See [`uaccess::copy_to_user`].
    pub fn copy_to_user<M: PhysMapper>(&self, mapper: &M, va: VirtualAddress, src: &[u8]) -> Result<(), SchedError> {
        uaccess::copy_to_user(&self.address_space(mapper)?, mapper, va, src)
    }

    /// Whether the running thread could receive `len` bytes at `va`.
    ///
    /// # Errors
    /// See [`uaccess::check_user`].
    pub fn check_user_writable<M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        len: usize,
    ) -> Result<(), SchedError> {
        uaccess::check_user(&self.address_space(mapper)?, va, len, true)
    }

    /// Read a NUL-terminated string from the running thread's memory.
    ///
    /// # Errors
    /// See [`uaccess::read_user_str`].
    pub fn read_user_str<'b, M: PhysMapper>(
        &self,
        mapper: &M,
        va: VirtualAddress,
        buf: &'b mut [u8],
    ) -> Result<&'b str, SchedError> {
        uaccess::read_user_str(&self.address_space(mapper)?, mapper, va, buf)
    }
}

fn zeroed_page<M: PhysMapper, A: MemoryAllocator>(mapper: &M, alloc: &mut A) -> Result<PhysicalAddress, SchedError> {
    let pa = alloc.allocate(PAGE)?;
    unsafe { mapper.phys_bytes_mut(pa, PAGE) }.fill(0);
    Ok(pa)
}

fn zeroed<M: PhysMapper, A: MemoryAllocator>(
    mapper: &M,
    alloc: &mut A,
    len: u64,
) -> Result<PhysicalAddress, SchedError> {
    let pa = alloc.allocate(bytes(len))?;
    unsafe { mapper.phys_bytes_mut(pa, bytes(len)) }.fill(0);
    Ok(pa)
}

fn copy_phys<M: PhysMapper>(mapper: &M, dst: PhysicalAddress, src: PhysicalAddress, len: u64) {
    let from = unsafe { mapper.phys_bytes_mut(src, bytes(len)) };
    let to = unsafe { mapper.phys_bytes_mut(dst, bytes(len)) };
    to.copy_from_slice(from);
}

fn free_logged<A: MemoryAllocator>(alloc: &mut A, pa: PhysicalAddress) {
    if let Err(e) = alloc.free(pa) {
        warn!("leaking {pa}: {e}");
    }
}

fn close_files<F: FileSystem>(fs: &mut F, t: &mut Thread) {
    for (fd, slot) in t.files.iter_mut().enumerate() {
        if let Some(file) = slot.take()
            && let Err(e) = fs.close(file)
        {
            warn!("thread {}: closing fd {fd}: {e}", t.id);
        }
    }
}

fn open_stdio<F: FileSystem>(fs: &mut F, t: &mut Thread, config: &SchedulerConfig) {
    for (fd, path) in config.stdio.iter().enumerate() {
        match fs.open(path, OpenFlags::RDWR) {
            Ok(file) => t.files[fd] = Some(file),
            Err(e) => warn!("thread {}: {path}: {e}", t.id),
        }
    }
}

/// Kernel stack, user stack and tables shared by new and forked threads.
/// Returns the kernel stack and its virtual top.
fn build_stacks<M: PhysMapper, A: MemoryAllocator, F>(
    env: &mut Env<'_, M, A, F>,
    t: &mut Thread,
) -> Result<(PhysicalAddress, u64), SchedError> {
    let kstack = zeroed(env.mapper, env.alloc, KERNEL_STACK_SIZE)?;
    t.kernel_stack = Some(kstack);
    let ustack = zeroed(env.mapper, env.alloc, USER_STACK_SIZE)?;
    t.user_stack = Some(ustack);

    let space = AddressSpace::new(env.mapper, env.alloc)?;
    t.root = Some(space.root());
    space.map_range(
        env.alloc,
        VirtualAddress::new(USER_STACK_BASE),
        ustack,
        USER_STACK_SIZE,
        MapAttributes::user_data(),
        MemoryType::Normal,
    )?;
    if t.regions.find(VirtualAddress::new(USER_STACK_BASE)).is_none() {
        t.regions.push(stack_region());
    }
    let top = env.mapper.phys_to_virt(kstack).as_u64() + KERNEL_STACK_SIZE;
    Ok((kstack, top))
}

const fn stack_region() -> MemoryRegion {
    MemoryRegion::new(
        VirtualAddress::new(USER_STACK_BASE),
        VirtualAddress::new(USER_STACK_TOP),
        Protection::read_write(),
    )
}

fn build_thread<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
    env: &mut Env<'_, M, A, F>,
    t: &mut Thread,
    program: Option<&[u8]>,
    config: &SchedulerConfig,
) -> Result<(), SchedError> {
    let (_, top) = build_stacks(env, t)?;
    if let Some(image) = program.filter(|p| !p.is_empty()) {
        let size = pages_for(image.len() as u64) * PAGE_SIZE;
        let base = zeroed(env.mapper, env.alloc, size)?;
        unsafe { env.mapper.phys_bytes_mut(base, image.len()) }.copy_from_slice(image);
        let program = Program {
            base,
            len: image.len(),
        };
        t.program = Some(program);
        map_program(env, t, program)?;
    }
    t.context = CpuContext::starting_at(SchedulerConfig::address(config.thread_start), top, top);
    open_stdio(env.fs, t, config);
    Ok(())
}

fn build_fork<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
    env: &mut Env<'_, M, A, F>,
    child: &mut Thread,
    image: &Image,
    tf: &TrapFrame,
    config: &SchedulerConfig,
) -> Result<(), SchedError> {
    let (kstack, top) = build_stacks(env, child)?;
    if let (Some(from), Some(to)) = (image.user_stack, child.user_stack) {
        copy_phys(env.mapper, to, from, USER_STACK_SIZE);
    }

    if let Some(program) = image.program {
        let size = program.pages() * PAGE_SIZE;
        let base = env.alloc.allocate(bytes(size))?;
        copy_phys(env.mapper, base, program.base, size);
        let copy = Program { base, ..program };
        child.program = Some(copy);
        map_program(env, child, copy)?;
    }

    let root = child.root.ok_or(SchedError::NoCurrentThread)?;
    let space = AddressSpace::from_root(env.mapper, root);
    for &(va, from) in &image.pages {
        let pa = env.alloc.allocate(PAGE)?;
        copy_phys(env.mapper, pa, from, PAGE_SIZE);
        child.pages.push((va, pa));
        let attrs = child
            .regions
            .find(va)
            .map_or_else(MapAttributes::user_data, |r| r.prot.attributes());
        space.map_page(env.alloc, va, pa, attrs)?;
    }

    let frame_pa = kstack + (KERNEL_STACK_SIZE - TrapFrame::SIZE as u64);
    let frame = unsafe { env.mapper.phys_to_mut::<TrapFrame>(frame_pa) };
    *frame = *tf;
    frame.x[0] = 0;

    let sp = env.mapper.phys_to_virt(frame_pa).as_u64();
    child.context = CpuContext::starting_at(SchedulerConfig::address(config.return_to_user), top, sp);
    open_stdio(env.fs, child, config);
    Ok(())
}

/// Map `program` at address zero and record its region unless a forked
/// child already inherited it.
fn map_program<M: PhysMapper, A: MemoryAllocator, F>(
    env: &mut Env<'_, M, A, F>,
    t: &mut Thread,
    program: Program,
) -> Result<(), SchedError> {
    let root = t.root.ok_or(SchedError::NoCurrentThread)?;
    let size = program.pages() * PAGE_SIZE;
    let space = AddressSpace::from_root(env.mapper, root);
    space.map_range(
        env.alloc,
        VirtualAddress::new(0),
        program.base,
        size,
        MapAttributes::user_text(),
        MemoryType::Normal,
    )?;
    if t.regions.find(VirtualAddress::new(0)).is_none() {
        t.regions.push(MemoryRegion::new(
            VirtualAddress::new(0),
            VirtualAddress::new(size),
            Protection::read_exec(),
        ));
    }
    Ok(())
}

/// Read the whole file at `path` into fresh pages.
fn read_program<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
    env: &mut Env<'_, M, A, F>,
    path: &str,
) -> Result<Program, SchedError> {
    let file = env.fs.open(path, OpenFlags::RDONLY)?;
    let result = read_file(env, file);
    if let Err(e) = env.fs.close(file) {
        warn!("{path}: close: {e}");
    }
    result
}

fn read_file<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(
    env: &mut Env<'_, M, A, F>,
    file: FileHandle,
) -> Result<Program, SchedError> {
    let len = env.fs.size(file)?;
    if len == 0 {
        return Err(FsError::Invalid.into());
    }
    let base = zeroed(env.mapper, env.alloc, pages_for(len as u64) * PAGE_SIZE)?;
    let buf = unsafe { env.mapper.phys_bytes_mut(base, len) };
    let mut done = 0;
    while done < len {
        match env.fs.read(file, &mut buf[done..]) {
            Ok(0) => {
                free_logged(env.alloc, base);
                return Err(FsError::Io.into());
            }
            Ok(n) => done += n,
            Err(e) => {
                free_logged(env.alloc, base);
                return Err(e.into());
            }
        }
    }
    Ok(Program { base, len })
}

/// Tear down everything but the stack and map `program` in its place.
fn replace_image<M: PhysMapper, A: MemoryAllocator, F>(
    env: &mut Env<'_, M, A, F>,
    t: &mut Thread,
    program: Program,
) -> Result<(), SchedError> {
    if t.root.is_none() {
        match AddressSpace::new(env.mapper, env.alloc) {
            Ok(space) => t.root = Some(space.root()),
            Err(e) => {
                free_logged(env.alloc, program.base);
                return Err(e.into());
            }
        }
    }
    let Some(root) = t.root else {
        return Err(SchedError::NoCurrentThread);
    };
    let space = AddressSpace::from_root(env.mapper, root);

    if let Some(old) = t.program.take() {
        for page in 0..old.pages() {
            space.unmap_page(VirtualAddress::new(page * PAGE_SIZE));
        }
        free_logged(env.alloc, old.base);
    }
    t.program = Some(program);
    for (va, pa) in core::mem::take(&mut t.pages) {
        space.unmap_page(va);
        free_logged(env.alloc, pa);
    }
    drop_signal_stack(env, t);
    t.signals = SignalState::new();
    t.regions = RegionList::new();
    t.regions.push(MemoryRegion::new(
        VirtualAddress::new(0),
        VirtualAddress::new(program.pages() * PAGE_SIZE),
        Protection::read_exec(),
    ));
    t.mmap_cursor = VirtualAddress::new(MMAP_BASE);

    match t.user_stack {
        Some(ustack) => {
            unsafe { env.mapper.phys_bytes_mut(ustack, bytes(USER_STACK_SIZE)) }.fill(0);
            t.regions.push(stack_region());
        }
        None => {
            let ustack = zeroed(env.mapper, env.alloc, USER_STACK_SIZE)?;
            t.user_stack = Some(ustack);
            space.map_range(
                env.alloc,
                VirtualAddress::new(USER_STACK_BASE),
                ustack,
                USER_STACK_SIZE,
                MapAttributes::user_data(),
                MemoryType::Normal,
            )?;
            t.regions.push(stack_region());
        }
    }

    space.map_range(
        env.alloc,
        VirtualAddress::new(0),
        program.base,
        program.pages() * PAGE_SIZE,
        MapAttributes::user_text(),
        MemoryType::Normal,
    )?;
    Ok(())
}

fn populate<M: PhysMapper, A: MemoryAllocator, F>(
    env: &mut Env<'_, M, A, F>,
    t: &mut Thread,
    start: VirtualAddress,
    len: u64,
    prot: Protection,
) -> Result<(), SchedError> {
    let root = t.root.ok_or(SchedError::NoCurrentThread)?;
    let space = AddressSpace::from_root(env.mapper, root);
    let first = t.pages.len();
    let mut offset = 0;
    let result = loop {
        if offset >= len {
            break Ok(());
        }
        let pa = match env.alloc.allocate(PAGE) {
            Ok(pa) => pa,
            Err(e) => break Err(SchedError::from(e)),
        };
        unsafe { env.mapper.phys_bytes_mut(pa, PAGE) }.fill(POPULATE_FILL);
        t.pages.push((start + offset, pa));
        if let Err(e) = space.map_page(env.alloc, start + offset, pa, prot.attributes()) {
            break Err(e.into());
        }
        offset += PAGE_SIZE;
    };

    if result.is_err() {
        for (va, pa) in t.pages.drain(first..) {
            space.unmap_page(va);
            free_logged(env.alloc, pa);
        }
    }
    result
}

fn drop_signal_stack<M: PhysMapper, A: MemoryAllocator, F>(env: &mut Env<'_, M, A, F>, t: &mut Thread) {
    let Some(pa) = t.signals.stack.take() else {
        return;
    };
    if let Some(root) = t.root {
        AddressSpace::from_root(env.mapper, root).unmap_page(VirtualAddress::new(SIGNAL_STACK_BASE));
    }
    free_logged(env.alloc, pa);
}

/// Give back everything `t` owns. Safe on a partially built thread.
fn release<M: PhysMapper, A: MemoryAllocator, F: FileSystem>(env: &mut Env<'_, M, A, F>, t: &mut Thread) {
    close_files(env.fs, t);
    for (_, pa) in core::mem::take(&mut t.pages) {
        free_logged(env.alloc, pa);
    }
    if let Some(pa) = t.signals.stack.take() {
        free_logged(env.alloc, pa);
    }
    if let Some(program) = t.program.take() {
        free_logged(env.alloc, program.base);
    }
    if let Some(pa) = t.user_stack.take() {
        free_logged(env.alloc, pa);
    }
    if let Some(pa) = t.kernel_stack.take() {
        free_logged(env.alloc, pa);
    }
    if let Some(root) = t.root.take() {
        AddressSpace::from_root(env.mapper, root).free_tables(env.alloc);
    }
}
