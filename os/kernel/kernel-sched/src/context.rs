use crate::thread::ThreadId;
use core::mem::offset_of;
use kernel_memory_addresses::PhysicalAddress;

/// Callee-saved state preserved across a switch, in the layout `switch_to`
/// stores it: `x19..x28`, `fp`, `lr`, `sp` (13 words).
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct CpuContext {
    pub regs: [u64; 10],
    pub fp: u64,
    pub lr: u64,
    pub sp: u64,
}

impl CpuContext {
    /// Byte offset of `fp`/`lr` (stored as a pair).
    pub const FP_OFFSET: usize = offset_of!(Self, fp);
    /// Byte offset of `sp`.
    pub const SP_OFFSET: usize = offset_of!(Self, sp);

    #[must_use]
    pub const fn new() -> Self {
        Self {
            regs: [0; 10],
            fp: 0,
            lr: 0,
            sp: 0,
        }
    }

    /// A context whose first switch-in "returns" to `entry` on `sp`.
    #[must_use]
    pub const fn starting_at(entry: u64, fp: u64, sp: u64) -> Self {
        Self {
            regs: [0; 10],
            fp,
            lr: entry,
            sp,
        }
    }
}

const _: () = {
    assert!(size_of::<CpuContext>() == 13 * 8);
    assert!(CpuContext::FP_OFFSET == 16 * 5);
    assert!(CpuContext::SP_OFFSET == 16 * 6);
};

/// What the architecture code must do to move from one thread to the next.
///
/// The pointers stay valid until the scheduler state is mutated again:
/// control blocks are boxed and never move while their thread exists.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Switch {
    pub from: ThreadId,
    pub to: ThreadId,
    /// Where to save the outgoing callee-saved registers.
    pub prev: *mut CpuContext,
    /// Where to load the incoming ones from.
    pub next: *const CpuContext,
    /// Translation table root for `TTBR0_EL1`; `None` for a thread that
    /// never leaves the kernel.
    pub ttbr0: Option<PhysicalAddress>,
}
