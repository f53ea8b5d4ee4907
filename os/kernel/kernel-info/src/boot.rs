//! # Fixed Boot-Time Reservations

use crate::memory::{INITRAMFS_BASE, INITRAMFS_END, STARTUP_BASE, STARTUP_END};

/// A physical range `[start, end)` withheld from the allocator at boot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FixedRegion {
    pub name: &'static str,
    pub start: u64,
    pub end: u64,
}

/// Multicore spin tables written by the firmware.
pub const SPIN_TABLES: FixedRegion = FixedRegion {
    name: "spin tables",
    start: 0,
    end: 0x1000,
};

/// Startup bump region that hosts the page descriptor table.
pub const STARTUP_REGION: FixedRegion = FixedRegion {
    name: "startup region",
    start: STARTUP_BASE,
    end: STARTUP_END,
};

/// Largest initramfs the kernel looks at; the archive itself decides how
/// much of it is actually reserved.
pub const INITRAMFS_REGION: FixedRegion = FixedRegion {
    name: "initramfs",
    start: INITRAMFS_BASE,
    end: INITRAMFS_END,
};
