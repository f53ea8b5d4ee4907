//! Heap-backed "physical memory" for host tests.
//!
//! [`HostMemory`] owns a zeroed, page-aligned buffer that stands in for the
//! physical range `[phys_base, phys_base + len)`. Allocator, page-table and
//! scheduler code run against it unchanged through [`PhysMapper`].

extern crate std;

use crate::PhysMapper;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

pub struct HostMemory {
    base: NonNull<u8>,
    phys_base: u64,
    len: usize,
}

impl HostMemory {
    /// Back `pages` pages of physical memory starting at `phys_base`.
    ///
    /// # Panics
    /// If `phys_base` is not page aligned or the host is out of memory.
    #[must_use]
    pub fn new(phys_base: u64, pages: usize) -> Self {
        assert_eq!(phys_base % PAGE_SIZE, 0, "phys_base must be page aligned");
        let len = pages * PAGE_SIZE as usize;
        let ptr = unsafe { alloc_zeroed(Self::layout(len)) };
        let base = NonNull::new(ptr).expect("host allocation failed");
        Self {
            base,
            phys_base,
            len,
        }
    }

    fn layout(len: usize) -> Layout {
        Layout::from_size_align(len.max(PAGE_SIZE as usize), PAGE_SIZE as usize)
            .expect("valid layout")
    }

    #[must_use]
    pub const fn phys_base(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_base)
    }

    #[must_use]
    pub const fn phys_end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.phys_base + self.len as u64)
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.phys_base() && pa < self.phys_end()
    }

    /// Read a native-endian `u64` at `pa`.
    #[must_use]
    pub fn read_u64(&self, pa: PhysicalAddress) -> u64 {
        unsafe { self.phys_to_virt(pa).as_mut_ptr::<u64>().read_unaligned() }
    }

    /// Copy of `len` bytes starting at `pa`.
    #[must_use]
    pub fn bytes(&self, pa: PhysicalAddress, len: usize) -> std::vec::Vec<u8> {
        unsafe { self.phys_bytes_mut(pa, len) }.to_vec()
    }
}

impl PhysMapper for HostMemory {
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        assert!(self.contains(pa), "{pa:?} outside host memory");
        let offset = pa - self.phys_base();
        VirtualAddress::from_ptr(unsafe { self.base.as_ptr().add(offset as usize) })
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        unsafe { dealloc(self.base.as_ptr(), Self::layout(self.len)) };
    }
}
