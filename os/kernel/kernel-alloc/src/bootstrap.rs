//! # Startup-Only Bump Allocator
//!
//! Hands out memory from the fixed startup region before the buddy
//! allocator exists. Its one job is placing the page descriptor table, which
//! the buddy allocator cannot allocate for itself.
//!
//! ## WARNING
//!
//! - Never frees.
//! - Do not use after the buddy allocator is online.

use crate::error::AllocError;
use kernel_info::memory::{STARTUP_BASE, STARTUP_END};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use log::debug;

pub struct StartupAllocator {
    start: u64,
    next: u64,
    end: u64,
}

impl StartupAllocator {
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self {
            start: start.as_u64(),
            next: start.as_u64(),
            end: end.as_u64(),
        }
    }

    /// The region from the kernel memory layout.
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(
            PhysicalAddress::new(STARTUP_BASE),
            PhysicalAddress::new(STARTUP_END),
        )
    }

    /// Bump out `size` bytes aligned to `align` (a power of two).
    ///
    /// # Errors
    /// [`AllocError::StartupExhausted`] when the region is used up.
    pub fn alloc(&mut self, size: usize, align: usize) -> Result<PhysicalAddress, AllocError> {
        let align = align.max(1) as u64;
        let start = self.next.next_multiple_of(align);
        let end = start
            .checked_add(size as u64)
            .filter(|&e| e <= self.end)
            .ok_or(AllocError::StartupExhausted(size))?;
        self.next = end;
        debug!("startup_alloc({size}) = {start:#x}");
        Ok(PhysicalAddress::new(start))
    }

    /// Place `len` copies of `value` and return them as a slice.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    ///
    /// # Safety
    /// The region must be mapped writable through `mapper` for `'a`, and
    /// nothing else may use it.
    pub unsafe fn alloc_slice<'a, T: Copy, M: PhysMapper>(
        &mut self,
        mapper: &M,
        len: usize,
        value: T,
    ) -> Result<&'a mut [T], AllocError> {
        let pa = self.alloc(len * size_of::<T>(), align_of::<T>())?;
        let ptr = mapper.phys_to_virt(pa).as_mut_ptr::<T>();
        for i in 0..len {
            unsafe { ptr.add(i).write(value) };
        }
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr, len) })
    }

    /// `[start, next)`: everything handed out so far.
    #[must_use]
    pub const fn used(&self) -> (PhysicalAddress, PhysicalAddress) {
        (
            PhysicalAddress::new(self.start),
            PhysicalAddress::new(self.next),
        )
    }
}
