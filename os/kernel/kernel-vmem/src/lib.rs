//! # Virtual Memory Support
//!
//! ARMv8-A (4 KiB granule, 48-bit VA) translation tables for the kernel and
//! for per-thread user address spaces.
//!
//! ## What you get
//! - An [`AddressSpace`] rooted at a level-0 table, with [`AddressSpace::map_page`]
//!   (walk, allocate and zero missing tables, write the leaf) and bulk
//!   [`AddressSpace::map_range`].
//! - The [`PageTableEntry`] descriptor as a `bitfield-struct` overlay and the
//!   [`MapAttributes`] a caller may request.
//! - A tiny allocator/mapper interface ([`FrameAlloc`], [`PhysMapper`]).
//!
//! ## AArch64 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  L3   | Offset |
//! ```
//!
//! Each level holds 512 eight-byte descriptors. Levels 0‒2 always hold table
//! descriptors (`0b11`) here; only level 3 holds page descriptors (`0b11` at
//! that level), so there are no block mappings.
//!
//! ```text
//!  TTBR0 → L0 → L1 → L2 → L3 → 4 KiB page
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod address_space;
pub mod descriptor;
#[cfg(any(test, feature = "test-utils"))]
pub mod host;
pub mod page_table;

pub use crate::address_space::{AddressSpace, MapError};
pub use crate::descriptor::{MapAttributes, MemoryType, PageTableEntry};
pub use crate::page_table::PageTable;
pub use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Source of zeroable 4 KiB physical frames for translation tables.
///
/// Returned frames **must** be page aligned. `None` means out of memory.
pub trait FrameAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress>;

    /// Give a frame obtained from [`alloc_4k`](Self::alloc_4k) back.
    fn free_4k(&mut self, pa: PhysicalAddress);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        (**self).alloc_4k()
    }

    fn free_4k(&mut self, pa: PhysicalAddress) {
        (**self).free_4k(pa);
    }
}

/// Converts physical addresses to usable pointers in the current address space.
///
/// The kernel uses its linear map at
/// [`KERNEL_VIRTUAL_BASE`](kernel_info::memory::KERNEL_VIRTUAL_BASE); host
/// tests hand out pointers into a heap buffer.
pub trait PhysMapper {
    /// The virtual address through which `pa` is reachable right now.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// # Safety
    /// - `pa` must be mapped writable for the lifetime `'a`.
    /// - The bytes at `pa` must be a valid `T`, and nothing else may hold a
    ///   reference to them while the returned one lives.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_virt(pa).as_mut_ptr::<T>() }
    }

    /// # Safety
    /// Same as [`phys_to_mut`](Self::phys_to_mut) for `len` bytes starting at `pa`.
    #[inline]
    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.phys_to_virt(pa).as_mut_ptr::<u8>(), len) }
    }
}

impl<M: PhysMapper + ?Sized> PhysMapper for &M {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        (**self).phys_to_virt(pa)
    }
}

/// Physical memory reachable at a fixed offset (the kernel's linear map).
#[derive(Debug, Copy, Clone)]
pub struct LinearMapper {
    offset: u64,
}

impl LinearMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// The upper-half linear map every kernel thread shares.
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(kernel_info::memory::KERNEL_VIRTUAL_BASE)
    }

    /// Inverse of [`PhysMapper::phys_to_virt`].
    #[must_use]
    pub const fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }
}

impl PhysMapper for LinearMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64().wrapping_add(self.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_mapper_round_trips() {
        let m = LinearMapper::kernel();
        let pa = PhysicalAddress::new(0x1000_2000);
        let va = m.phys_to_virt(pa);
        assert_eq!(va.as_u64(), 0xFFFF_0000_1000_2000);
        assert_eq!(m.virt_to_phys(va), pa);
    }
}
