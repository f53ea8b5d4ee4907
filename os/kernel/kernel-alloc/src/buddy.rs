//! # Buddy Page Allocator
//!
//! Whole-page allocation in power-of-two blocks of `2^order` pages,
//! `0 <= order <= MAX_ORDER`. Two order-`k` blocks at indices `i` and
//! `i ^ 2^k` are buddies and merge into one order-`k+1` block when both are
//! free.
//!
//! ## Life cycle
//!
//! 1. [`BuddyAllocator::new`] marks every page `BelongsToBuddy` with empty lists.
//! 2. [`BuddyAllocator::memory_reserve`] may withhold fixed ranges; before
//!    [`init`](BuddyAllocator::init) this only flips descriptors to `Reserved`.
//! 3. [`BuddyAllocator::init`] puts every unreserved page on the order-0 list
//!    and merges pairs bottom-up to the largest blocks possible.
//! 4. From then on `page_alloc`/`free_page` split and coalesce, and a
//!    reservation unlinks the free blocks it touches.

use crate::descriptor::{PageDescriptor, PageStatus};
use crate::error::AllocError;
use crate::free_list::FreeLists;
use crate::window::WindowConfig;
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::PhysMapper;
use log::{debug, info, trace, warn};

/// Smallest order whose block holds `pages` pages.
#[inline]
#[must_use]
pub const fn order_for_pages(pages: usize) -> usize {
    if pages <= 1 {
        0
    } else {
        (usize::BITS - (pages - 1).leading_zeros()) as usize
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn free_status(order: usize) -> PageStatus {
    PageStatus::Free(order as u8)
}

pub struct BuddyAllocator<'d, M: PhysMapper> {
    mapper: M,
    window: WindowConfig,
    pages: &'d mut [PageDescriptor],
    lists: FreeLists,
    initialized: bool,
}

impl<'d, M: PhysMapper> BuddyAllocator<'d, M> {
    /// Take over `pages` as the descriptor table for `window`.
    ///
    /// # Panics
    /// If the table has fewer entries than the window has pages.
    pub fn new(mapper: M, window: WindowConfig, pages: &'d mut [PageDescriptor]) -> Self {
        assert!(
            pages.len() >= window.pages,
            "descriptor table too small for the window"
        );
        pages.fill(PageDescriptor::new());
        Self {
            mapper,
            window,
            pages,
            lists: FreeLists::new(),
            initialized: false,
        }
    }

    #[inline]
    pub const fn window(&self) -> &WindowConfig {
        &self.window
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[inline]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Descriptor of the page containing `pa`.
    #[must_use]
    pub fn descriptor(&self, pa: PhysicalAddress) -> Option<&PageDescriptor> {
        self.window.index_of(pa).map(|i| &self.pages[i])
    }

    pub(crate) fn descriptor_mut(&mut self, pa: PhysicalAddress) -> Option<&mut PageDescriptor> {
        self.window.index_of(pa).map(|i| &mut self.pages[i])
    }

    #[inline]
    fn status(&self, index: usize) -> PageStatus {
        self.pages[index].status
    }

    #[inline]
    fn set_status(&mut self, index: usize, status: PageStatus) {
        self.pages[index].status = status;
    }

    fn push(&mut self, index: usize, order: usize) {
        trace!("free_list[{order}] += page {index}");
        self.lists.push(&self.mapper, &self.window, index, order);
        self.set_status(index, free_status(order));
    }

    fn unlink(&mut self, index: usize, order: usize) {
        trace!("free_list[{order}] -= page {index}");
        self.lists.remove(&self.mapper, &self.window, index, order);
    }

    /// Build the free lists from every page not reserved so far.
    pub fn init(&mut self) {
        let n = self.window.pages;
        info!(
            "buddy: managing {n} pages at [{}, {})",
            self.window.base,
            self.window.end()
        );

        // Push in reverse so the order-0 list runs in ascending address order.
        for index in (0..n).rev() {
            if self.status(index) != PageStatus::Reserved {
                self.push(index, 0);
            }
        }
        self.initialized = true;

        for order in 0..MAX_ORDER {
            let size = 1 << order;
            let mut lower = 0;
            while lower + size < n {
                let upper = lower + size;
                if self.status(lower) == free_status(order)
                    && self.status(upper) == free_status(order)
                {
                    self.unlink(lower, order);
                    self.unlink(upper, order);
                    self.set_status(upper, PageStatus::BelongsToBuddy);
                    self.push(lower, order + 1);
                }
                lower += size << 1;
            }
        }

        for order in 0..=MAX_ORDER {
            debug!("buddy: {} free blocks of order {order}", self.free_blocks(order).count());
        }
    }

    /// Allocate `2^order` pages for the smallest `order` with `2^order >= n`.
    ///
    /// # Errors
    /// - [`AllocError::TooLarge`] if `order > MAX_ORDER`.
    /// - [`AllocError::AllocationFailure`] if no block of that order or larger is free.
    pub fn page_alloc(&mut self, n: usize) -> Result<PhysicalAddress, AllocError> {
        let order = order_for_pages(n);
        if order > MAX_ORDER {
            return Err(AllocError::TooLarge(n.saturating_mul(PAGE_SIZE as usize)));
        }

        let mut current = (order..=MAX_ORDER)
            .find(|&o| self.lists.head(o).is_some())
            .ok_or(AllocError::AllocationFailure(order))?;
        let index = self
            .lists
            .pop(&self.mapper, &self.window, current)
            .ok_or(AllocError::AllocationFailure(order))?;

        while current > order {
            current -= 1;
            let upper = index + (1 << current);
            self.push(upper, current);
        }

        for page in &mut self.pages[index..index + (1 << order)] {
            page.status = PageStatus::Allocated;
            page.page_order = PageDescriptor::INTERIOR;
        }
        #[allow(clippy::cast_possible_truncation)]
        {
            self.pages[index].page_order = order as u8;
        }

        let pa = self.window.address_of(index);
        trace!("page_alloc({n}) = {pa} (order {order})");
        Ok(pa)
    }

    /// Return a block obtained from [`page_alloc`](Self::page_alloc).
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] if `pa` is not an allocated block head.
    pub fn free_page(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        let index = self
            .window
            .index_of(pa)
            .filter(|_| pa.is_page_aligned())
            .filter(|&i| self.status(i) == PageStatus::Allocated)
            .ok_or(AllocError::InvalidFree(pa))?;

        let head = self.pages[index].page_order;
        let mut order = head as usize;
        if head == PageDescriptor::INTERIOR || index % (1 << order) != 0 {
            return Err(AllocError::InvalidFree(pa));
        }
        for page in &mut self.pages[index..index + (1 << order)] {
            page.status = PageStatus::BelongsToBuddy;
            page.page_order = 0;
        }

        let mut index = index;
        while order < MAX_ORDER && self.lists.head(order).is_some() {
            let buddy = index ^ (1 << order);
            if buddy >= self.window.pages || self.status(buddy) != free_status(order) {
                break;
            }
            self.unlink(buddy, order);
            self.set_status(index.max(buddy), PageStatus::BelongsToBuddy);
            index = index.min(buddy);
            order += 1;
        }
        self.push(index, order);
        trace!("free_page({pa}) -> block {index} of order {order}");
        Ok(())
    }

    /// Withhold `[start, end)` from allocation for good.
    ///
    /// Parts outside the window are ignored. Before [`init`](Self::init) the
    /// pages are only marked. Afterwards every free block touching the range is
    /// unlinked and the whole span of those blocks becomes `Reserved`.
    ///
    /// # Errors
    /// [`AllocError::ReservationConflict`] if any page in the range is already
    /// allocated, chunked or reserved; nothing is changed in that case.
    pub fn memory_reserve(&mut self, start: u64, end: u64) -> Result<(), AllocError> {
        let lo = start.max(self.window.base.as_u64());
        let hi = end.min(self.window.end().as_u64());
        if lo >= hi {
            debug!("reserve [{start:#x}, {end:#x}): outside the managed window");
            return Ok(());
        }
        let (Some(first), Some(last)) = (
            self.window.index_of(PhysicalAddress::new(lo)),
            self.window.index_of(PhysicalAddress::new(hi - 1)),
        ) else {
            return Ok(());
        };
        info!("reserve [{lo:#x}, {hi:#x}): pages {first}..={last}");

        if !self.initialized {
            for page in &mut self.pages[first..=last] {
                page.status = PageStatus::Reserved;
            }
            return Ok(());
        }

        let conflict = AllocError::ReservationConflict {
            start: PhysicalAddress::new(start),
            end: PhysicalAddress::new(end),
        };
        if self.pages[first..=last].iter().any(|p| p.status.is_in_use()) {
            warn!("reserve [{start:#x}, {end:#x}): memory already in use");
            return Err(conflict);
        }

        let (start_block, _) = self.enclosing_free_block(first).ok_or(conflict)?;
        let (end_block, end_order) = self.enclosing_free_block(last).ok_or(conflict)?;

        // Validate the whole walk before touching anything.
        let mut index = start_block;
        while index <= end_block {
            let order = self.status(index).free_order().ok_or(conflict)?;
            index += 1 << order;
        }

        let mut index = start_block;
        while index <= end_block {
            let order = self.status(index).free_order().ok_or(conflict)?;
            self.unlink(index, order);
            index += 1 << order;
        }
        for page in &mut self.pages[start_block..end_block + (1 << end_order)] {
            page.status = PageStatus::Reserved;
        }
        Ok(())
    }

    /// The free block containing page `index`, as `(head, order)`.
    fn enclosing_free_block(&self, index: usize) -> Option<(usize, usize)> {
        (0..=MAX_ORDER).find_map(|order| {
            let head = (index >> order) << order;
            (self.status(head) == free_status(order)).then_some((head, order))
        })
    }

    /// Base addresses on `free_list[order]`, head first.
    pub fn free_blocks(&self, order: usize) -> impl Iterator<Item = PhysicalAddress> + '_ {
        self.lists
            .iter(&self.mapper, &self.window, order)
            .map(|i| self.window.address_of(i))
    }

    /// Pages on all free lists.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        (0..=MAX_ORDER)
            .map(|order| self.free_blocks(order).count() << order)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_round_up() {
        assert_eq!(order_for_pages(0), 0);
        assert_eq!(order_for_pages(1), 0);
        assert_eq!(order_for_pages(2), 1);
        assert_eq!(order_for_pages(3), 2);
        assert_eq!(order_for_pages(4), 2);
        assert_eq!(order_for_pages(5), 3);
        assert_eq!(order_for_pages(128), 7);
        assert_eq!(order_for_pages(129), 8);
    }
}
