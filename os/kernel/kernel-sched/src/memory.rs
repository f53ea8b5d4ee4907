//! # User Memory Regions
//!
//! Every thread keeps a list of the virtual ranges it may touch: its program
//! image, its stack and everything it `mmap`ed. A page fault inside a region
//! is a request for a page; a fault anywhere else is a segmentation fault.

use alloc::vec::Vec;
use bitfield_struct::bitfield;
use kernel_info::memory::SIGNAL_STACK_BASE;
use kernel_memory_addresses::{VirtualAddress, page_align_up};
use kernel_vmem::MapAttributes;

pub const PROT_NONE: u64 = 0;
pub const PROT_READ: u64 = 1;
pub const PROT_WRITE: u64 = 2;
pub const PROT_EXEC: u64 = 4;

pub const MAP_ANONYMOUS: u64 = 0x20;
/// Back the whole mapping with pages right away instead of on first touch.
pub const MAP_POPULATE: u64 = 0x8000;

/// Byte written into every page of a `MAP_POPULATE` mapping.
pub const POPULATE_FILL: u8 = 123;

/// `mmap` placements must end below this address.
pub const MMAP_LIMIT: u64 = SIGNAL_STACK_BASE;

/// `PROT_*` bits of a region.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    #[bits(5)]
    __: u8,
}

impl Protection {
    /// From the `prot` argument of `mmap`; unknown bits are dropped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_prot(prot: u64) -> Self {
        Self::from_bits((prot & (PROT_READ | PROT_WRITE | PROT_EXEC)) as u8)
    }

    #[must_use]
    pub const fn read_write() -> Self {
        Self::new().with_read(true).with_write(true)
    }

    #[must_use]
    pub const fn read_exec() -> Self {
        Self::new().with_read(true).with_exec(true)
    }

    /// Leaf attributes for a user page with this protection.
    #[must_use]
    pub const fn attributes(self) -> MapAttributes {
        MapAttributes::new()
            .with_user(true)
            .with_read_only(!self.write())
            .with_user_no_exec(!self.exec())
            .with_kernel_no_exec(true)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
    pub prot: Protection,
}

impl MemoryRegion {
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress, prot: Protection) -> Self {
        Self { start, end, prot }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        va >= self.start && va < self.end
    }

    #[inline]
    #[must_use]
    pub fn overlaps(&self, start: VirtualAddress, end: VirtualAddress) -> bool {
        start < self.end && self.start < end
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

#[derive(Debug, Default, Clone)]
pub struct RegionList {
    regions: Vec<MemoryRegion>,
}

impl RegionList {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    pub fn push(&mut self, region: MemoryRegion) {
        self.regions.push(region);
    }

    /// The region containing `va`.
    #[must_use]
    pub fn find(&self, va: VirtualAddress) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(va))
    }

    /// Some region intersecting `[start, end)`.
    #[must_use]
    pub fn overlapping(&self, start: VirtualAddress, end: VirtualAddress) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.overlaps(start, end))
    }

    /// Drop the region starting at `start`.
    pub fn remove(&mut self, start: VirtualAddress) -> Option<MemoryRegion> {
        let index = self.regions.iter().position(|r| r.start == start)?;
        Some(self.regions.swap_remove(index))
    }

    pub fn retain(&mut self, f: impl FnMut(&MemoryRegion) -> bool) {
        self.regions.retain(f);
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> + '_ {
        self.regions.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// First page-aligned start at or above `hint` where `len` bytes fit
    /// without touching another region, sliding past each one in the way.
    ///
    /// `None` if the placement would cross [`MMAP_LIMIT`].
    #[must_use]
    pub fn place(&self, hint: VirtualAddress, len: u64) -> Option<VirtualAddress> {
        let mut start = hint.page_base();
        loop {
            let end = start.as_u64().checked_add(len)?;
            if end > MMAP_LIMIT {
                return None;
            }
            match self.overlapping(start, VirtualAddress::new(end)) {
                Some(r) => start = VirtualAddress::new(page_align_up(r.end.as_u64())),
                None => return Some(start),
            }
        }
    }
}
