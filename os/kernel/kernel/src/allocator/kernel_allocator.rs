//! # Kernel Global Allocator
//!
//! `alloc` collections (thread control blocks, queues, region lists) draw
//! from the same buddy/chunk allocator as everything else. Chunks are
//! naturally aligned and pages are page aligned, so any request whose
//! alignment does not exceed a page is served by asking for at least
//! `align` bytes.

use crate::allocator::ALLOCATOR;
use core::alloc::{GlobalAlloc, Layout};
use core::ptr;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress};
use kernel_vmem::{LinearMapper, PhysMapper};

pub(super) struct KernelHeap;

#[global_allocator]
static GLOBAL_ALLOCATOR: KernelHeap = KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() as u64 > PAGE_SIZE {
            return ptr::null_mut();
        }
        let size = layout.size().max(layout.align());
        ALLOCATOR
            .lock_irq()
            .as_mut()
            .and_then(|alloc| alloc.allocate(size).ok())
            .map_or(ptr::null_mut(), |pa| {
                LinearMapper::kernel().phys_to_virt(pa).as_mut_ptr::<u8>()
            })
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if ptr.is_null() {
            return;
        }
        let pa = LinearMapper::kernel().virt_to_phys(VirtualAddress::from_ptr(ptr));
        if let Some(alloc) = ALLOCATOR.lock_irq().as_mut() {
            // An invalid free is already logged by the allocator.
            let _ = alloc.free(pa);
        }
    }
}
