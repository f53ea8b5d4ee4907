//! # Translation Table

use crate::descriptor::PageTableEntry;

/// Number of descriptors per table (9 index bits).
pub const ENTRIES: usize = 512;

/// Deepest level; its descriptors map pages.
pub const LEAF_LEVEL: u8 = 3;

/// A 4 KiB-aligned translation table of 512 descriptors, any level.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; ENTRIES],
}

impl PageTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, index: usize) -> PageTableEntry {
        self.entries[index]
    }

    #[inline]
    pub const fn set(&mut self, index: usize, entry: PageTableEntry) {
        self.entries[index] = entry;
    }

    /// Invalidate every descriptor.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    /// Iterate over `(index, entry)` for present descriptors.
    pub fn present(&self) -> impl Iterator<Item = (usize, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, e)| e.is_present())
    }
}

const _: () = {
    assert!(size_of::<PageTable>() == 4096);
    assert!(align_of::<PageTable>() == 4096);
};
