//! # AArch64 Translation Table Descriptors
//!
//! One layout serves all levels with the 4 KiB granule:
//!
//! ```text
//! 63      55 54  53  52 51 48 47            12 11 10 9 8 7  6  5  4 2 1 0
//! | ignored |UXN|PXN|C | res0 |  output frame  |nG|AF|SH |AP2|AP1|NS|Idx|T|V|
//! ```
//!
//! At levels 0‒2, `T|V = 0b11` marks a table descriptor whose frame is the
//! next table. At level 3, `T|V = 0b11` marks a page descriptor.

use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// `MAIR_EL1` slot for Device-nGnRnE memory (MMIO).
pub const MAIR_IDX_DEVICE_NGNRNE: u8 = 0;

/// `MAIR_EL1` slot for Normal, non-cacheable memory.
pub const MAIR_IDX_NORMAL_NOCACHE: u8 = 1;

/// `MAIR_EL1` value matching the two slots above (slot 0 stays `0x00`).
pub const MAIR_VALUE: u64 = 0x44 << (8 * MAIR_IDX_NORMAL_NOCACHE as u64);

/// Memory type selected through `MAIR_EL1`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryType {
    Device,
    Normal,
}

impl MemoryType {
    #[must_use]
    pub const fn mair_index(self) -> u8 {
        match self {
            Self::Device => MAIR_IDX_DEVICE_NGNRNE,
            Self::Normal => MAIR_IDX_NORMAL_NOCACHE,
        }
    }
}

/// A translation table descriptor.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageTableEntry {
    /// Valid (bit 0).
    pub valid: bool,
    /// Table (L0‒L2) or page (L3) descriptor (bit 1).
    pub table_or_page: bool,
    /// `MAIR_EL1` index (bits 2..4).
    #[bits(3)]
    pub attr_index: u8,
    /// Non-secure (bit 5).
    pub non_secure: bool,
    /// AP\[1\]: accessible from EL0 (bit 6).
    pub user: bool,
    /// AP\[2\]: read-only (bit 7).
    pub read_only: bool,
    /// Shareability (bits 8..9).
    #[bits(2)]
    pub shareability: u8,
    /// Access flag (bit 10); an access with AF clear faults.
    pub access: bool,
    /// Not global (bit 11).
    pub not_global: bool,
    /// Output address bits 47..12.
    #[bits(36)]
    frame: u64,
    #[bits(4)]
    __res0: u8,
    /// Contiguous hint (bit 52).
    pub contiguous: bool,
    /// Privileged execute-never (bit 53).
    pub pxn: bool,
    /// Unprivileged execute-never (bit 54).
    pub uxn: bool,
    /// Software-defined (bits 55..58).
    #[bits(4)]
    pub software: u8,
    #[bits(5)]
    __ignored: u8,
}

impl PageTableEntry {
    /// The physical address this descriptor points at.
    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame() << 12)
    }

    #[inline]
    #[must_use]
    pub const fn with_address(self, pa: PhysicalAddress) -> Self {
        self.with_frame(pa.as_u64() >> 12)
    }

    /// Table descriptor pointing at the next-level table `pa`.
    #[inline]
    #[must_use]
    pub const fn table(pa: PhysicalAddress) -> Self {
        Self::new()
            .with_valid(true)
            .with_table_or_page(true)
            .with_address(pa)
    }

    /// Level-3 page descriptor for `pa` with `attrs`, access flag set.
    #[inline]
    #[must_use]
    pub const fn page(pa: PhysicalAddress, attrs: MapAttributes, memory: MemoryType) -> Self {
        Self::from_bits(attrs.into_bits())
            .with_valid(true)
            .with_table_or_page(true)
            .with_attr_index(memory.mair_index())
            .with_access(true)
            .with_address(pa)
    }

    /// Whether the entry is `0b11` (table at L0‒L2, page at L3).
    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.valid() && self.table_or_page()
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }
}

/// Permission bits a caller may request for a leaf mapping.
///
/// The bits sit at their hardware positions so a leaf is `pa | attrs | fixed`.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct MapAttributes {
    #[bits(6)]
    __low: u8,
    /// Accessible from EL0.
    pub user: bool,
    /// Writes fault.
    pub read_only: bool,
    #[bits(45)]
    __mid: u64,
    /// EL1 may not execute.
    pub kernel_no_exec: bool,
    /// EL0 may not execute.
    pub user_no_exec: bool,
    #[bits(9)]
    __high: u16,
}

impl MapAttributes {
    /// User read/write data.
    #[must_use]
    pub const fn user_data() -> Self {
        Self::new()
            .with_user(true)
            .with_user_no_exec(true)
            .with_kernel_no_exec(true)
    }

    /// User read/execute program text.
    #[must_use]
    pub const fn user_text() -> Self {
        Self::new()
            .with_user(true)
            .with_read_only(true)
            .with_kernel_no_exec(true)
    }

    /// User read/write/execute.
    #[must_use]
    pub const fn user_rwx() -> Self {
        Self::new().with_user(true).with_kernel_no_exec(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_match_the_architecture() {
        assert_eq!(MapAttributes::new().with_read_only(true).into_bits(), 1 << 7);
        assert_eq!(MapAttributes::new().with_user(true).into_bits(), 1 << 6);
        assert_eq!(MapAttributes::new().with_user_no_exec(true).into_bits(), 1 << 54);
        assert_eq!(MapAttributes::new().with_kernel_no_exec(true).into_bits(), 1 << 53);
        assert_eq!(MAIR_VALUE, 0x4400);
    }

    #[test]
    fn table_descriptor_layout() {
        let e = PageTableEntry::table(PhysicalAddress::new(0x1234_5000));
        assert_eq!(e.into_bits(), 0x1234_5000 | 0b11);
        assert!(e.is_present());
        assert_eq!(e.address().as_u64(), 0x1234_5000);
    }

    #[test]
    fn page_descriptor_layout() {
        let pa = PhysicalAddress::new(0x2000_0000);
        let e = PageTableEntry::page(pa, MapAttributes::user_text(), MemoryType::Normal);
        let expected = 0x2000_0000
            | (1 << 53)
            | (1 << 10)
            | (1 << 7)
            | (1 << 6)
            | (1 << 2)
            | 0b11;
        assert_eq!(e.into_bits(), expected);
        assert!(e.user());
        assert!(e.read_only());
        assert!(!e.uxn());
    }
}
