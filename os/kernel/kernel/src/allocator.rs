//! # Physical Memory
//!
//! The one [`Allocator`] instance of the kernel, over the window
//! [`ALLOC_BASE`](kernel_info::memory::ALLOC_BASE)..[`ALLOC_END`](kernel_info::memory::ALLOC_END).
//!
//! ```text
//! StartupAllocator ──► PageDescriptor table (startup region)
//!                               │
//!                      Allocator::new ─► memory_reserve × n ─► init
//!                               │
//!          ┌────────────────────┼─────────────────────┐
//!    KernelMemory          KernelHeap            page tables,
//!    (scheduler, vfs)      (#[global_allocator])  stacks, programs
//! ```
//!
//! Everything reaches it through [`ALLOCATOR`], one short critical section
//! per call, so no caller ever holds it across another lock.

mod kernel_allocator;

use kernel_alloc::{AllocError, Allocator, MemoryAllocator, PageDescriptor, StartupAllocator, WindowConfig};
use kernel_info::boot::FixedRegion;
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, LinearMapper};
use log::{info, warn};

pub static ALLOCATOR: SpinLock<Option<Allocator<'static, LinearMapper>>> = SpinLock::new(None);

/// Place the descriptor table, withhold `reserved`, build the free lists.
///
/// # Errors
/// The startup region cannot hold the table, or a reservation conflicts.
pub fn init<'r>(reserved: impl IntoIterator<Item = &'r FixedRegion>) -> Result<(), AllocError> {
    let mapper = LinearMapper::kernel();
    let window = WindowConfig::kernel();
    let mut startup = StartupAllocator::kernel();
    // Safety: the startup region is linear mapped and nothing else uses it.
    let table = unsafe { startup.alloc_slice(&mapper, window.pages, PageDescriptor::new())? };
    let mut alloc = Allocator::new(mapper, window, table);

    for region in reserved {
        alloc.memory_reserve(region.start, region.end)?;
        info!("reserved {} {:#x}..{:#x}", region.name, region.start, region.end);
    }
    let (start, end) = startup.used();
    alloc.memory_reserve(start.as_u64(), end.as_u64())?;

    alloc.init();
    info!(
        "{} of {} pages free, descriptor table at {start}",
        alloc.free_pages(),
        window.pages
    );
    *ALLOCATOR.lock_irq() = Some(alloc);
    Ok(())
}

/// The kernel allocator as a value, for interfaces that take one.
#[derive(Debug, Copy, Clone, Default)]
pub struct KernelMemory;

impl MemoryAllocator for KernelMemory {
    fn allocate(&mut self, size: usize) -> Result<PhysicalAddress, AllocError> {
        ALLOCATOR
            .lock_irq()
            .as_mut()
            .ok_or(AllocError::AllocationFailure(0))?
            .allocate(size)
    }

    fn free(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        ALLOCATOR
            .lock_irq()
            .as_mut()
            .ok_or(AllocError::InvalidFree(pa))?
            .free(pa)
    }
}

impl FrameAlloc for KernelMemory {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        ALLOCATOR.lock_irq().as_mut()?.page_alloc(1).ok()
    }

    fn free_4k(&mut self, pa: PhysicalAddress) {
        match ALLOCATOR.lock_irq().as_mut() {
            Some(alloc) => {
                if let Err(e) = alloc.free_page(pa) {
                    warn!("free_4k: {e}");
                }
            }
            None => warn!("free_4k({pa}) before the allocator is up"),
        }
    }
}
