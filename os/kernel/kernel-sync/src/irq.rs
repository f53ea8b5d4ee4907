//! Interrupt masking through the AArch64 `DAIF` register.

/// Debug exception mask.
pub const DAIF_D: u64 = 1 << 9;
/// `SError` mask.
pub const DAIF_A: u64 = 1 << 8;
/// IRQ mask.
pub const DAIF_I: u64 = 1 << 7;
/// FIQ mask.
pub const DAIF_F: u64 = 1 << 6;
/// All four mask bits.
pub const DAIF_ALL: u64 = DAIF_D | DAIF_A | DAIF_I | DAIF_F;

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod arch {
    use core::arch::asm;

    #[inline]
    pub fn read_daif() -> u64 {
        let v: u64;
        unsafe { asm!("mrs {}, daif", out(reg) v, options(nomem, nostack, preserves_flags)) };
        v
    }

    #[inline]
    pub fn mask_all() {
        unsafe { asm!("msr daifset, #0xf", options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    pub unsafe fn write_daif(v: u64) {
        unsafe { asm!("msr daif, {}", in(reg) v, options(nomem, nostack, preserves_flags)) };
    }

    #[inline]
    pub unsafe fn unmask_irq() {
        unsafe { asm!("msr daifclr, #0x2", options(nomem, nostack, preserves_flags)) };
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
mod arch {
    use super::{DAIF_ALL, DAIF_I};
    use core::sync::atomic::{AtomicU64, Ordering};

    /// Emulated `DAIF`; starts with everything masked, like the CPU out of reset.
    static DAIF: AtomicU64 = AtomicU64::new(DAIF_ALL);

    #[inline]
    pub fn read_daif() -> u64 {
        DAIF.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn mask_all() {
        DAIF.fetch_or(DAIF_ALL, Ordering::SeqCst);
    }

    #[inline]
    pub unsafe fn write_daif(v: u64) {
        DAIF.store(v & DAIF_ALL, Ordering::SeqCst);
    }

    #[inline]
    pub unsafe fn unmask_irq() {
        DAIF.fetch_and(!DAIF_I, Ordering::SeqCst);
    }
}

/// Current `DAIF` value.
#[inline]
#[must_use]
pub fn daif() -> u64 {
    arch::read_daif()
}

/// Whether IRQs are currently deliverable.
#[inline]
#[must_use]
pub fn irqs_enabled() -> bool {
    daif() & DAIF_I == 0
}

/// Saves `DAIF` and masks all interrupts. Returns the saved value.
#[inline]
#[must_use]
pub fn disable_interrupts() -> u64 {
    let saved = arch::read_daif();
    arch::mask_all();
    saved
}

/// Writes a value previously returned by [`disable_interrupts`] back to `DAIF`.
///
/// # Safety
/// Must be paired with the matching [`disable_interrupts`] call; restoring an
/// inner value from an outer scope would unmask interrupts inside a critical
/// section.
#[inline]
pub unsafe fn restore_interrupts(saved: u64) {
    unsafe { arch::write_daif(saved) };
}

/// RAII guard that masks interrupts on creation and restores `DAIF` on drop.
///
/// The full register is saved, not just a "were enabled" bit, so an inner
/// guard dropped inside an outer one leaves interrupts masked:
///
/// ```
/// use kernel_sync::IrqGuard;
/// use kernel_sync::irq::irqs_enabled;
///
/// let outer = IrqGuard::new();
/// {
///     let _inner = IrqGuard::new();
/// }
/// assert!(!irqs_enabled());
/// drop(outer);
/// ```
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard {
    saved: u64,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    #[inline]
    pub fn new() -> Self {
        Self {
            saved: disable_interrupts(),
        }
    }

    /// The `DAIF` value that will be restored.
    #[inline]
    #[must_use]
    pub const fn saved(&self) -> u64 {
        self.saved
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        unsafe { restore_interrupts(self.saved) };
    }
}

/// Opens an IRQ window inside a masked region and re-masks on drop.
///
/// Blocking console I/O uses this to let the UART interrupt (and the timer)
/// in while it waits for a byte.
#[must_use = "the window closes as soon as the guard is dropped"]
pub struct InterruptWindow {
    saved: u64,
}

impl InterruptWindow {
    /// # Safety
    /// No kernel-global state may be borrowed across the window; an interrupt
    /// taken inside it may reschedule.
    #[inline]
    pub unsafe fn open() -> Self {
        let saved = arch::read_daif();
        unsafe { arch::unmask_irq() };
        Self { saved }
    }
}

impl Drop for InterruptWindow {
    fn drop(&mut self) {
        unsafe { restore_interrupts(self.saved) };
    }
}
