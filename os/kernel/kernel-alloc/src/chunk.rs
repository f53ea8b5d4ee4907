//! # Chunk Allocator
//!
//! Sub-page allocations in power-of-two size classes `2^4 ..= 2^11` bytes.
//! A class without free chunks takes one page from the buddy allocator,
//! marks it `Chunked` and threads a free list through all of its chunks:
//! each free chunk's first word holds the address of the next one (`0` ends
//! the list).
//!
//! Freed chunks go back on their class list and bump the owning page's free
//! count. A page whose chunks are all free again is **not** handed back to
//! the buddy allocator; it stays dedicated to its size class.

use crate::buddy::BuddyAllocator;
use crate::descriptor::PageStatus;
use crate::error::AllocError;
use kernel_info::memory::{MAX_CHUNK_ORDER, MIN_CHUNK_ORDER};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::PhysMapper;
use log::{debug, trace};

const CLASSES: usize = MAX_CHUNK_ORDER - MIN_CHUNK_ORDER + 1;

/// Largest request served from chunks.
pub const MAX_CHUNK_SIZE: usize = 1 << MAX_CHUNK_ORDER;

/// Size class for `size` bytes, or `None` if it needs whole pages.
///
/// ```
/// # use kernel_alloc::chunk::chunk_order_for;
/// assert_eq!(chunk_order_for(0), Some(4));
/// assert_eq!(chunk_order_for(16), Some(4));
/// assert_eq!(chunk_order_for(17), Some(5));
/// assert_eq!(chunk_order_for(2048), Some(11));
/// assert_eq!(chunk_order_for(2049), None);
/// ```
#[must_use]
pub const fn chunk_order_for(size: usize) -> Option<usize> {
    if size > MAX_CHUNK_SIZE {
        return None;
    }
    let order = if size <= 1 {
        0
    } else {
        (usize::BITS - (size - 1).leading_zeros()) as usize
    };
    Some(if order < MIN_CHUNK_ORDER {
        MIN_CHUNK_ORDER
    } else {
        order
    })
}

pub struct ChunkAllocator {
    lists: [Option<PhysicalAddress>; CLASSES],
}

impl Default for ChunkAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            lists: [None; CLASSES],
        }
    }

    fn next_of<M: PhysMapper>(mapper: &M, chunk: PhysicalAddress) -> Option<PhysicalAddress> {
        let next = unsafe { *mapper.phys_to_mut::<u64>(chunk) };
        (next != 0).then_some(PhysicalAddress::new(next))
    }

    fn set_next<M: PhysMapper>(mapper: &M, chunk: PhysicalAddress, next: Option<PhysicalAddress>) {
        unsafe { *mapper.phys_to_mut::<u64>(chunk) = next.map_or(0, PhysicalAddress::as_u64) };
    }

    /// Dedicate one fresh page to chunks of `2^order` bytes.
    fn refill<M: PhysMapper>(
        &mut self,
        buddy: &mut BuddyAllocator<'_, M>,
        order: usize,
    ) -> Result<(), AllocError> {
        let page = buddy.page_alloc(1)?;
        let size = 1u64 << order;
        let count = PAGE_SIZE / size;

        let desc = buddy
            .descriptor_mut(page)
            .ok_or(AllocError::AllocationFailure(0))?;
        desc.status = PageStatus::Chunked;
        #[allow(clippy::cast_possible_truncation)]
        {
            desc.chunk_order = order as u8;
            desc.chunk_free_count = count as u16;
        }

        for k in 0..count {
            let next = (k + 1 < count).then(|| page + (k + 1) * size);
            Self::set_next(buddy.mapper(), page + k * size, next);
        }
        self.lists[order - MIN_CHUNK_ORDER] = Some(page);
        debug!("chunk: page {page} split into {count} chunks of {size} bytes");
        Ok(())
    }

    /// Allocate a chunk of at least `size` bytes.
    ///
    /// # Errors
    /// - [`AllocError::TooLarge`] above [`MAX_CHUNK_SIZE`].
    /// - Whatever the buddy allocator reports when a new page is needed.
    pub fn chunk_alloc<M: PhysMapper>(
        &mut self,
        buddy: &mut BuddyAllocator<'_, M>,
        size: usize,
    ) -> Result<PhysicalAddress, AllocError> {
        let order = chunk_order_for(size).ok_or(AllocError::TooLarge(size))?;
        let class = order - MIN_CHUNK_ORDER;
        if self.lists[class].is_none() {
            self.refill(buddy, order)?;
        }
        let chunk = self.lists[class].ok_or(AllocError::AllocationFailure(0))?;
        self.lists[class] = Self::next_of(buddy.mapper(), chunk);

        if let Some(desc) = buddy.descriptor_mut(chunk.page_base()) {
            desc.chunk_free_count -= 1;
        }
        trace!("chunk_alloc({size}) = {chunk}");
        Ok(chunk)
    }

    /// Return a chunk to its size class list.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if `pa` is not a chunk boundary of a
    /// `Chunked` page, that page has no outstanding chunks, or `pa` is
    /// already on the free list.
    pub fn free_chunk<M: PhysMapper>(
        &mut self,
        buddy: &mut BuddyAllocator<'_, M>,
        pa: PhysicalAddress,
    ) -> Result<(), AllocError> {
        let desc = buddy
            .descriptor(pa)
            .copied()
            .filter(|d| d.status == PageStatus::Chunked)
            .ok_or(AllocError::InvalidFree(pa))?;
        let order = desc.chunk_order as usize;
        let size = 1u64 << order;
        if pa.page_offset() % size != 0 || u64::from(desc.chunk_free_count) >= PAGE_SIZE / size {
            return Err(AllocError::InvalidFree(pa));
        }
        if self.free_chunks(buddy.mapper(), order).any(|c| c == pa) {
            return Err(AllocError::InvalidFree(pa));
        }

        let class = order - MIN_CHUNK_ORDER;
        Self::set_next(buddy.mapper(), pa, self.lists[class]);
        self.lists[class] = Some(pa);
        if let Some(d) = buddy.descriptor_mut(pa) {
            d.chunk_free_count += 1;
        }
        trace!("free_chunk({pa})");
        Ok(())
    }

    /// Chunks on the free list of size class `order`.
    pub fn free_chunks<'a, M: PhysMapper>(
        &self,
        mapper: &'a M,
        order: usize,
    ) -> impl Iterator<Item = PhysicalAddress> + 'a {
        core::iter::successors(self.lists[order - MIN_CHUNK_ORDER], move |&c| {
            Self::next_of(mapper, c)
        })
    }
}
