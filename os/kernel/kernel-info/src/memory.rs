//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE};

/// Offset of the kernel's linear map of physical memory.
pub const KERNEL_VIRTUAL_BASE: u64 = 0xFFFF_0000_0000_0000;

/// Physical load address of the kernel image.
pub const KERNEL_LOAD: u64 = 0x0008_0000;

/// First byte of the buddy-managed physical window.
pub const ALLOC_BASE: u64 = 0x1000_0000;

/// One past the last byte of the buddy-managed physical window.
pub const ALLOC_END: u64 = 0x3B40_0000;

/// Number of pages in the managed window.
pub const ALLOC_PAGES: usize = ((ALLOC_END - ALLOC_BASE) / PAGE_SIZE) as usize;

/// Where the boot loader places the cpio initramfs (`initramfs_addr` in
/// `config.txt`, `-initrd` under QEMU).
pub const INITRAMFS_BASE: u64 = 0x0800_0000;

/// The initramfs may use everything up to the startup region.
pub const INITRAMFS_END: u64 = STARTUP_BASE;

/// First byte of the startup-only bump region.
pub const STARTUP_BASE: u64 = 0x0900_0000;

/// One past the last byte of the startup-only bump region.
pub const STARTUP_END: u64 = 0x1000_0000;

/// Largest buddy order; a single allocation is at most `2^MAX_ORDER` pages.
pub const MAX_ORDER: usize = 7;

/// Smallest chunk is `2^MIN_CHUNK_ORDER` bytes.
pub const MIN_CHUNK_ORDER: usize = 4;

/// Largest chunk is `2^MAX_CHUNK_ORDER` bytes; anything bigger uses pages.
pub const MAX_CHUNK_ORDER: usize = 11;

/// Start of the BCM2837 peripheral MMIO window.
pub const PERIPHERAL_BASE: u64 = 0x3F00_0000;

/// ARM local peripherals (core timers, mailboxes).
pub const LOCAL_PERIPHERAL_BASE: u64 = 0x4000_0000;

/// Top of every user stack; the stack grows down from here.
pub const USER_STACK_TOP: u64 = 0x0000_FFFF_FFFF_F000;

/// Initial placement cursor for `mmap` calls without an address hint.
pub const MMAP_BASE: u64 = 0x0000_FFFF_0000_0000;

/// Where the signal stack (and its `sigreturn` trampoline) is mapped.
pub const SIGNAL_STACK_BASE: u64 = 0x0000_FFFF_FFFF_0000;

const _: () = {
    assert!(ALLOC_BASE.is_multiple_of(PAGE_SIZE << MAX_ORDER));
    assert!(ALLOC_END.is_multiple_of(PAGE_SIZE));
    assert!(STARTUP_END <= ALLOC_BASE);
    assert!(INITRAMFS_BASE < INITRAMFS_END);
    assert!(MIN_CHUNK_ORDER < MAX_CHUNK_ORDER);
    assert!((1 << MAX_CHUNK_ORDER) < PAGE_SIZE);
    assert!(SIGNAL_STACK_BASE < USER_STACK_TOP);
};
