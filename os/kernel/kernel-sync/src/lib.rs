//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core. The only hazard is an interrupt handler
//! re-entering code that was in the middle of mutating shared state, so the
//! primitives here are built around masking interrupts:
//!
//! * [`IrqGuard`] saves the full `DAIF` register, masks everything and writes
//!   the saved value back on drop. Nested guards therefore never unmask early;
//!   only the outermost drop restores the pre-critical-section state.
//! * [`SpinLock`] hands out exclusive access to kernel-global state.
//!   [`SpinLock::lock_irq`] pairs the lock with an [`IrqGuard`].
//!
//! On anything other than bare-metal AArch64 the `DAIF` register is emulated
//! so the nesting rules can be exercised by host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

pub use irq::{IrqGuard, InterruptWindow};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};
