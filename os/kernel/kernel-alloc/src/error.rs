use kernel_memory_addresses::PhysicalAddress;

/// Why an allocator request was refused.
///
/// None of these are fatal to the kernel; the caller turns them into a
/// user-visible failure (a syscall returning `-1`, a thread not created, ...).
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    /// No free block or chunk large enough is left.
    #[error("allocation failure: no free block of order {0}")]
    AllocationFailure(usize),
    /// The request exceeds one `2^MAX_ORDER` page block.
    #[error("request of {0} bytes exceeds the largest block")]
    TooLarge(usize),
    /// Double free, or an address that was never handed out.
    #[error("invalid free of {0}")]
    InvalidFree(PhysicalAddress),
    /// Part of the range is already allocated, chunked or reserved.
    #[error("range [{start}, {end}) is already in use")]
    ReservationConflict {
        start: PhysicalAddress,
        end: PhysicalAddress,
    },
    /// The startup bump region is used up.
    #[error("startup region exhausted while allocating {0} bytes")]
    StartupExhausted(usize),
}
