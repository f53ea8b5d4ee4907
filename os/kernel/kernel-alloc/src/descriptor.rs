//! # Page Descriptors
//!
//! One [`PageDescriptor`] per page of the managed window. The table is the
//! allocator's only out-of-band metadata; free-list links live inside the
//! free pages themselves (see [`free_list`](crate::free_list)).

/// What a page is currently used for.
///
/// Every page of the window carries exactly one status at all times.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum PageStatus {
    /// Part of a block handed out by `page_alloc`.
    Allocated,
    /// Spoken for by an enclosing block whose head page carries the real status.
    #[default]
    BelongsToBuddy,
    /// Withheld from the allocator for good.
    Reserved,
    /// Carved into chunks by the chunk allocator.
    Chunked,
    /// Head of a free block of `2^order` pages.
    Free(u8),
}

impl PageStatus {
    /// The order if this page heads a free block.
    #[inline]
    #[must_use]
    pub const fn free_order(self) -> Option<usize> {
        match self {
            Self::Free(order) => Some(order as usize),
            _ => None,
        }
    }

    /// Whether a reservation may not claim this page.
    #[inline]
    #[must_use]
    pub const fn is_in_use(self) -> bool {
        matches!(self, Self::Allocated | Self::Chunked | Self::Reserved)
    }
}

/// Per-page metadata.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct PageDescriptor {
    pub status: PageStatus,
    /// Order of the allocation this page heads (`Allocated` heads only);
    /// [`INTERIOR`](Self::INTERIOR) on the other pages of the block.
    pub page_order: u8,
    /// Chunk size class (`Chunked` only).
    pub chunk_order: u8,
    /// Free chunks left in this page (`Chunked` only).
    pub chunk_free_count: u16,
}

impl PageDescriptor {
    /// `page_order` of an allocated page that is not the head of its block.
    pub const INTERIOR: u8 = u8::MAX;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: PageStatus::BelongsToBuddy,
            page_order: 0,
            chunk_order: 0,
            chunk_free_count: 0,
        }
    }
}
