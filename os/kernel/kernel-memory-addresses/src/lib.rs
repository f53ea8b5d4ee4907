//! # Physical and Virtual Address Types
//!
//! Strongly typed wrappers for raw 64-bit addresses used by the allocator,
//! the page-table builder and the scheduler.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A location in RAM or MMIO as seen by the bus. |
//! | [`VirtualAddress`] | A location translated through a page table (`TTBR0`/`TTBR1`). |
//!
//! Both are `#[repr(transparent)]` over `u64` and only carry intent; mixing them
//! up requires an explicit conversion. The kernel uses a single translation
//! granule of 4 KiB, so page helpers are fixed to [`PAGE_SIZE`].
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x1000_2345);
//! assert_eq!(pa.page_base().as_u64(), 0x1000_2000);
//! assert_eq!(pa.page_offset(), 0x345);
//! assert!(!pa.is_page_aligned());
//!
//! let va = VirtualAddress::new(0x0000_FFFF_0000_0001);
//! assert_eq!(va.page_align_up().as_u64(), 0x0000_FFFF_0000_1000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod virtual_address;

pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Number of address bits covered by the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

/// Size of the (only) translation granule in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Align `value` down to the page boundary.
#[inline]
#[must_use]
pub const fn page_align_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Align `value` up to the next page boundary.
///
/// Saturates at the last page boundary instead of wrapping.
#[inline]
#[must_use]
pub const fn page_align_up(value: u64) -> u64 {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => page_align_down(v),
        None => page_align_down(u64::MAX),
    }
}

/// Number of pages needed to hold `bytes`.
///
/// ```rust
/// # use kernel_memory_addresses::pages_for;
/// assert_eq!(pages_for(0), 0);
/// assert_eq!(pages_for(1), 1);
/// assert_eq!(pages_for(4096), 1);
/// assert_eq!(pages_for(4097), 2);
/// ```
#[inline]
#[must_use]
pub const fn pages_for(bytes: u64) -> u64 {
    bytes.div_ceil(PAGE_SIZE)
}
