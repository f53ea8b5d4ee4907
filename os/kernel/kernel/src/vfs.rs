//! # File Systems
//!
//! The initramfs parser is plain data handling and builds everywhere; the
//! node table on top of it needs the UART and only exists in the kernel.

pub mod initramfs;

#[cfg(target_os = "none")]
mod devfs;

#[cfg(target_os = "none")]
pub use devfs::Devfs;

#[cfg(target_os = "none")]
use {
    initramfs::Archive,
    kernel_info::boot::{FixedRegion, INITRAMFS_REGION},
    log::{info, warn},
};

/// Look for an archive where the boot loader puts the initramfs. Returns
/// the range it occupies so the allocator keeps its hands off.
#[cfg(target_os = "none")]
#[allow(clippy::cast_possible_truncation)]
pub fn init() -> Option<FixedRegion> {
    use kernel_info::memory::KERNEL_VIRTUAL_BASE;

    let start = INITRAMFS_REGION.start;
    let len = (INITRAMFS_REGION.end - start) as usize;
    let base = core::ptr::with_exposed_provenance::<u8>((KERNEL_VIRTUAL_BASE + start) as usize);
    // Safety: the linear map covers the region and nothing writes to it.
    let window: &'static [u8] = unsafe { core::slice::from_raw_parts(base, len) };
    match Archive::parse(window) {
        Ok(archive) => {
            info!(
                "initramfs: {} members, {} bytes",
                archive.entries().count(),
                archive.len()
            );
            *devfs::ARCHIVE.lock_irq() = archive;
            Some(FixedRegion {
                name: INITRAMFS_REGION.name,
                start,
                end: start + archive.len() as u64,
            })
        }
        Err(e) => {
            warn!("no initramfs: {e}");
            None
        }
    }
}

/// An initramfs member by name.
#[cfg(target_os = "none")]
pub fn program(name: &str) -> Option<&'static [u8]> {
    devfs::ARCHIVE.lock_irq().find(name)
}
