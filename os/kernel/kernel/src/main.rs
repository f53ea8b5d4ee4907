//! # Kernel Entry Point
//!
//! Raspberry Pi 3 (`raspi3b`) kernel: boot on core 0, bring up the console,
//! the page allocator and the scheduler, start `/initramfs/init` as the first
//! user thread and fall into the idle loop.
//!
//! ```text
//! _start (EL2/EL1, MMU off)
//!   └─► boot tables, MMU on, upper half
//!         └─► kernel_main
//!               ├─ console + logger
//!               ├─ vfs::init (initramfs, so it can be reserved)
//!               ├─ allocator::init (descriptor table, reservations, free lists)
//!               ├─ task::init (boot flow becomes a thread)
//!               ├─ first user thread
//!               ├─ core timer
//!               └─ task::idle
//! ```

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![cfg_attr(not(target_os = "none"), allow(dead_code, unused_imports))]
#![allow(unsafe_code)]

extern crate alloc;

#[cfg(target_os = "none")]
mod allocator;
#[cfg(target_os = "none")]
mod console;
#[cfg(target_os = "none")]
mod init;
#[cfg(target_os = "none")]
mod interrupts;
#[cfg(target_os = "none")]
mod mailbox;
#[cfg(target_os = "none")]
mod syscall;
#[cfg(target_os = "none")]
mod task;
#[cfg(target_os = "none")]
mod userland;
mod vfs;

#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kernel_uart::uart_trace!("kernel panic: {info}\n");
    init::halt()
}

/// The kernel only links for `aarch64-unknown-none`; on the host this binary
/// exists so the pure parts can be unit tested.
#[cfg(not(target_os = "none"))]
fn main() {}
