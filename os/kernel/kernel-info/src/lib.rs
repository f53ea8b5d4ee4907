//! # Kernel Configuration
//!
//! Compile-time layout and sizing constants shared by the allocator, the
//! page-table builder, the scheduler and the kernel binary (including its
//! `build.rs`). Keeping them here gives a single source of truth for the
//! physical window the allocator manages and for the fixed virtual addresses
//! user threads see.
//!
//! ## Physical Memory Layout (Raspberry Pi 3 / QEMU `raspi3b`)
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Spin tables (secondary cores)  │
//! 0x0008_0000 ├─────────────────────────────────┤ KERNEL_LOAD
//!             │        Kernel Image             │
//!             ├─────────────────────────────────┤
//!             │   (initramfs, device tree)      │
//! 0x0900_0000 ├─────────────────────────────────┤ STARTUP_BASE
//!             │   Startup bump region           │
//!             │   (page descriptor table)       │
//! 0x1000_0000 ├─────────────────────────────────┤ ALLOC_BASE
//!             │   Buddy-managed window          │
//! 0x3B40_0000 ├─────────────────────────────────┤ ALLOC_END
//!             │   GPU / framebuffer memory      │
//! 0x3F00_0000 ├─────────────────────────────────┤ PERIPHERAL_BASE
//!             │   MMIO                          │
//! 0x4000_0000 └─────────────────────────────────┘
//! ```
//!
//! ## Virtual Memory Layout
//!
//! The kernel runs in the upper half (`TTBR1`) with a linear map of all of
//! physical memory at [`memory::KERNEL_VIRTUAL_BASE`]. Every thread owns a
//! lower-half (`TTBR0`) table with its program at address zero, its stack
//! just below [`memory::USER_STACK_TOP`] and anonymous mappings starting at
//! [`memory::MMAP_BASE`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod thread;
