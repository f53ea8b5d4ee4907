//! # Address Space (AArch64, L0-rooted)
//!
//! A handle on one translation tree. User threads each own one (loaded into
//! `TTBR0_EL1` on every switch); the kernel builds its upper-half tree with
//! the same code at boot.
//!
//! ## Invariants
//!
//! - Levels 0‒2 only ever hold table descriptors; leaves live at level 3.
//! - Missing tables are allocated from the caller's [`FrameAlloc`] and zeroed
//!   before they are linked, so a half-built walk never exposes garbage.
//! - Mutating an active tree needs TLB maintenance by the caller.

use crate::descriptor::{MapAttributes, MemoryType, PageTableEntry};
use crate::page_table::{LEAF_LEVEL, PageTable};
use crate::{FrameAlloc, PhysMapper};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use log::trace;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapError {
    #[error("out of memory while allocating a translation table")]
    OutOfMemory,
    #[error("address {0:#x} is not page aligned")]
    Misaligned(u64),
}

/// Handle to a single translation tree.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalAddress,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and zero a fresh root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available.
    pub fn new<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc_table(mapper, alloc)?;
        Ok(Self { root, mapper })
    }

    /// Wrap an existing root table.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalAddress) -> Self {
        Self { root, mapper }
    }

    /// Physical address of the level-0 table (the `TTBR` value).
    #[inline]
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        self.root
    }

    #[inline]
    fn table(&self, pa: PhysicalAddress) -> &'m mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(pa) }
    }

    /// Map one 4 KiB page `va → pa` with `attrs` as normal memory.
    ///
    /// Walks levels 0‒2, creating tables as needed, and overwrites whatever
    /// leaf was there.
    ///
    /// # Errors
    /// - [`MapError::Misaligned`] if either address has offset bits.
    /// - [`MapError::OutOfMemory`] if an intermediate table cannot be allocated.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        attrs: MapAttributes,
    ) -> Result<(), MapError> {
        self.map_page_as(alloc, va, pa, attrs, MemoryType::Normal)
    }

    /// Like [`map_page`](Self::map_page) with an explicit memory type.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page).
    pub fn map_page_as<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        attrs: MapAttributes,
        memory: MemoryType,
    ) -> Result<(), MapError> {
        if !va.is_page_aligned() {
            return Err(MapError::Misaligned(va.as_u64()));
        }
        if !pa.is_page_aligned() {
            return Err(MapError::Misaligned(pa.as_u64()));
        }

        let mut table = self.root;
        for level in 0..LEAF_LEVEL {
            let index = va.table_index(level);
            let entry = self.table(table).get(index);
            table = if entry.is_present() {
                entry.address()
            } else {
                let next = alloc_table(self.mapper, alloc)?;
                self.table(table).set(index, PageTableEntry::table(next));
                next
            };
        }

        let leaf = PageTableEntry::page(pa, attrs, memory);
        self.table(table).set(va.table_index(LEAF_LEVEL), leaf);
        trace!("mapped {va} -> {pa} ({:#x})", leaf.into_bits());
        Ok(())
    }

    /// Map `len` bytes (rounded up to pages) starting at `va → pa`.
    ///
    /// # Errors
    /// See [`map_page`](Self::map_page); pages mapped before the failure stay mapped.
    pub fn map_range<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        len: u64,
        attrs: MapAttributes,
        memory: MemoryType,
    ) -> Result<(), MapError> {
        let mut offset = 0;
        while offset < len {
            self.map_page_as(alloc, va + offset, pa + offset, attrs, memory)?;
            offset += PAGE_SIZE;
        }
        Ok(())
    }

    /// The level-3 descriptor for `va`, if the walk reaches one.
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<PageTableEntry> {
        let mut table = self.root;
        for level in 0..LEAF_LEVEL {
            let entry = self.table(table).get(va.table_index(level));
            if !entry.is_present() {
                return None;
            }
            table = entry.address();
        }
        let leaf = self.table(table).get(va.table_index(LEAF_LEVEL));
        leaf.is_present().then_some(leaf)
    }

    /// Translate `va` to a physical address if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.leaf(va).map(|e| e.address() + va.page_offset())
    }

    /// Clear the leaf for `va`. Returns the page it pointed at.
    pub fn unmap_page(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let mut table = self.root;
        for level in 0..LEAF_LEVEL {
            let entry = self.table(table).get(va.table_index(level));
            if !entry.is_present() {
                return None;
            }
            table = entry.address();
        }
        let index = va.table_index(LEAF_LEVEL);
        let leaf = self.table(table).get(index);
        if !leaf.is_present() {
            return None;
        }
        self.table(table).set(index, PageTableEntry::zero());
        Some(leaf.address())
    }

    /// Free every table of this tree, root included. Mapped pages are not
    /// touched; they belong to whoever mapped them.
    pub fn free_tables<A: FrameAlloc>(self, alloc: &mut A) {
        self.free_level(alloc, self.root, 0);
    }

    fn free_level<A: FrameAlloc>(&self, alloc: &mut A, table: PhysicalAddress, level: u8) {
        if level < LEAF_LEVEL {
            for (_, entry) in self.table(table).present() {
                self.free_level(alloc, entry.address(), level + 1);
            }
        }
        alloc.free_4k(table);
    }
}

fn alloc_table<M: PhysMapper, A: FrameAlloc>(
    mapper: &M,
    alloc: &mut A,
) -> Result<PhysicalAddress, MapError> {
    let pa = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
    unsafe { mapper.phys_to_mut::<PageTable>(pa) }.zero();
    Ok(pa)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostMemory;
    use std::vec::Vec;

    /// Hands out frames front to back and remembers what came back.
    struct BumpFrames {
        next: u64,
        end: u64,
        freed: Vec<PhysicalAddress>,
    }

    impl BumpFrames {
        fn over(mem: &HostMemory) -> Self {
            Self {
                next: mem.phys_base().as_u64(),
                end: mem.phys_end().as_u64(),
                freed: Vec::new(),
            }
        }

        fn used(&self, mem: &HostMemory) -> u64 {
            (self.next - mem.phys_base().as_u64()) / PAGE_SIZE
        }
    }

    impl FrameAlloc for BumpFrames {
        fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
            if self.next + PAGE_SIZE > self.end {
                return None;
            }
            let pa = PhysicalAddress::new(self.next);
            self.next += PAGE_SIZE;
            Some(pa)
        }

        fn free_4k(&mut self, pa: PhysicalAddress) {
            self.freed.push(pa);
        }
    }

    #[test]
    fn map_page_creates_tables_and_leaf() {
        let mem = HostMemory::new(0x1000_0000, 16);
        let mut frames = BumpFrames::over(&mem);
        let space = AddressSpace::new(&mem, &mut frames).unwrap();

        let va = VirtualAddress::new(0x0000_FFFF_FFFF_B000);
        let pa = PhysicalAddress::new(0x2000_0000);
        space
            .map_page(&mut frames, va, pa, MapAttributes::user_data())
            .unwrap();

        // Root plus one table each for L1, L2, L3.
        assert_eq!(frames.used(&mem), 4);

        let mut table = space.root();
        for level in 0..LEAF_LEVEL {
            let entry = space.table(table).get(va.table_index(level));
            assert_eq!(entry.into_bits() & 0b11, 0b11, "level {level} is a table");
            table = entry.address();
        }
        let leaf = space.table(table).get(va.table_index(LEAF_LEVEL));
        assert_eq!(
            leaf.into_bits(),
            0x2000_0000 | (1 << 54) | (1 << 53) | (1 << 10) | (1 << 6) | (1 << 2) | 0b11
        );
        assert_eq!(space.query(va + 0x123), Some(pa + 0x123));
    }

    #[test]
    fn neighbouring_pages_share_tables() {
        let mem = HostMemory::new(0x1000_0000, 16);
        let mut frames = BumpFrames::over(&mem);
        let space = AddressSpace::new(&mem, &mut frames).unwrap();

        let base = VirtualAddress::new(0);
        space
            .map_range(
                &mut frames,
                base,
                PhysicalAddress::new(0x3000_0000),
                3 * PAGE_SIZE,
                MapAttributes::user_text(),
                MemoryType::Normal,
            )
            .unwrap();
        assert_eq!(frames.used(&mem), 4);
        assert_eq!(
            space.query(base + 2 * PAGE_SIZE),
            Some(PhysicalAddress::new(0x3000_2000))
        );
        assert!(space.leaf(base).unwrap().read_only());
        assert_eq!(space.query(base + 3 * PAGE_SIZE), None);
    }

    #[test]
    fn remapping_overwrites_the_leaf() {
        let mem = HostMemory::new(0x1000_0000, 8);
        let mut frames = BumpFrames::over(&mem);
        let space = AddressSpace::new(&mem, &mut frames).unwrap();
        let va = VirtualAddress::new(0x4000);

        space
            .map_page(&mut frames, va, PhysicalAddress::new(0x5000), MapAttributes::user_data())
            .unwrap();
        space
            .map_page(&mut frames, va, PhysicalAddress::new(0x6000), MapAttributes::user_text())
            .unwrap();
        assert_eq!(space.query(va), Some(PhysicalAddress::new(0x6000)));
        assert_eq!(space.unmap_page(va), Some(PhysicalAddress::new(0x6000)));
        assert_eq!(space.query(va), None);
        assert_eq!(space.unmap_page(va), None);
    }

    #[test]
    fn misaligned_and_out_of_memory() {
        let mem = HostMemory::new(0x1000_0000, 2);
        let mut frames = BumpFrames::over(&mem);
        let space = AddressSpace::new(&mem, &mut frames).unwrap();

        assert_eq!(
            space.map_page(
                &mut frames,
                VirtualAddress::new(0x1001),
                PhysicalAddress::new(0x2000),
                MapAttributes::user_data()
            ),
            Err(MapError::Misaligned(0x1001))
        );
        // Only one frame left; the walk needs three.
        assert_eq!(
            space.map_page(
                &mut frames,
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x2000),
                MapAttributes::user_data()
            ),
            Err(MapError::OutOfMemory)
        );
    }

    #[test]
    fn free_tables_returns_every_table() {
        let mem = HostMemory::new(0x1000_0000, 16);
        let mut frames = BumpFrames::over(&mem);
        let space = AddressSpace::new(&mem, &mut frames).unwrap();
        for va in [0x0, 0x0000_FFFF_FFFF_B000, 0x0000_FFFF_0000_0000] {
            space
                .map_page(
                    &mut frames,
                    VirtualAddress::new(va),
                    PhysicalAddress::new(0x7000),
                    MapAttributes::user_data(),
                )
                .unwrap();
        }
        let used = frames.used(&mem);
        space.free_tables(&mut frames);
        assert_eq!(frames.freed.len() as u64, used);
    }
}
