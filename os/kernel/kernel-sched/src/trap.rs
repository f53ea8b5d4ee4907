/// Registers saved on every exception entry from EL0, in the order the
/// vector stubs push them.
///
/// ```text
/// +0x000  x0 .. x30
/// +0x0F8  sp_el0
/// +0x100  elr_el1
/// +0x108  spsr_el1
/// ```
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct TrapFrame {
    pub x: [u64; 31],
    pub sp_el0: u64,
    pub elr: u64,
    pub spsr: u64,
}

impl TrapFrame {
    /// Bytes the vector stubs reserve on the kernel stack.
    pub const SIZE: usize = size_of::<Self>();

    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            x: [0; 31],
            sp_el0: 0,
            elr: 0,
            spsr: 0,
        }
    }

    /// Syscall number (`x8`).
    #[inline]
    #[must_use]
    pub const fn syscall_number(&self) -> u64 {
        self.x[8]
    }

    /// Syscall argument `n` (`x0..x5`).
    #[inline]
    #[must_use]
    pub const fn arg(&self, n: usize) -> u64 {
        self.x[n]
    }

    /// Store a syscall result in `x0`.
    #[inline]
    #[allow(clippy::cast_sign_loss)]
    pub const fn set_return(&mut self, value: i64) {
        self.x[0] = value as u64;
    }
}

// The stubs move `sp` by this amount; it must keep the stack 16-byte aligned.
const _: () = assert!(TrapFrame::SIZE == 34 * 8 && TrapFrame::SIZE.is_multiple_of(16));
