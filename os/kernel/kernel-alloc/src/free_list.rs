//! # Embedded Free Lists
//!
//! A free block stores its own list links in its first two machine words:
//!
//! ```text
//! +------------+------------+---------------------------------+
//! | next index | prev index |   rest of the free block ...    |
//! +------------+------------+---------------------------------+
//! ^ page base (head page of the block)
//! ```
//!
//! Links are page indices into the window with `-1` as the end marker, so
//! the lists stay valid no matter where the window is mapped. The
//! [`FreeBlockHeader`] overlay is only valid while the block is free; the
//! moment a block is handed out its first words belong to the caller.

use crate::window::WindowConfig;
use kernel_info::memory::MAX_ORDER;
use kernel_vmem::PhysMapper;

/// A page index link; `-1` terminates a list.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[repr(transparent)]
struct Link(i64);

impl Link {
    const END: Self = Self(-1);

    #[allow(clippy::cast_possible_wrap)]
    const fn to(index: usize) -> Self {
        Self(index as i64)
    }

    #[allow(clippy::cast_sign_loss)]
    const fn get(self) -> Option<usize> {
        if self.0 < 0 { None } else { Some(self.0 as usize) }
    }

    const fn from_option(index: Option<usize>) -> Self {
        match index {
            Some(i) => Self::to(i),
            None => Self::END,
        }
    }
}

/// Header overlaid on the first bytes of every free block.
#[repr(C)]
struct FreeBlockHeader {
    next: Link,
    prev: Link,
}

/// Heads of the per-order doubly linked free lists.
pub(crate) struct FreeLists {
    heads: [Option<usize>; MAX_ORDER + 1],
}

impl FreeLists {
    pub(crate) const fn new() -> Self {
        Self {
            heads: [None; MAX_ORDER + 1],
        }
    }

    #[inline]
    pub(crate) const fn head(&self, order: usize) -> Option<usize> {
        self.heads[order]
    }

    /// # Safety contract
    /// `index` must head a free block of the window; nothing else may
    /// reference its first two words.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn header<'a, M: PhysMapper>(
        mapper: &M,
        window: &WindowConfig,
        index: usize,
    ) -> &'a mut FreeBlockHeader {
        unsafe { mapper.phys_to_mut::<FreeBlockHeader>(window.address_of(index)) }
    }

    /// Push `index` at the head of `free_list[order]`.
    pub(crate) fn push<M: PhysMapper>(
        &mut self,
        mapper: &M,
        window: &WindowConfig,
        index: usize,
        order: usize,
    ) {
        let old_head = self.heads[order];
        let header = Self::header(mapper, window, index);
        header.next = Link::from_option(old_head);
        header.prev = Link::END;
        if let Some(old) = old_head {
            Self::header(mapper, window, old).prev = Link::to(index);
        }
        self.heads[order] = Some(index);
    }

    /// Unlink `index` from `free_list[order]`.
    pub(crate) fn remove<M: PhysMapper>(
        &mut self,
        mapper: &M,
        window: &WindowConfig,
        index: usize,
        order: usize,
    ) {
        let (next, prev) = {
            let header = Self::header(mapper, window, index);
            (header.next.get(), header.prev.get())
        };
        match prev {
            Some(p) => Self::header(mapper, window, p).next = Link::from_option(next),
            None => self.heads[order] = next,
        }
        if let Some(n) = next {
            Self::header(mapper, window, n).prev = Link::from_option(prev);
        }
    }

    /// Take the head of `free_list[order]`.
    pub(crate) fn pop<M: PhysMapper>(
        &mut self,
        mapper: &M,
        window: &WindowConfig,
        order: usize,
    ) -> Option<usize> {
        let head = self.heads[order]?;
        self.remove(mapper, window, head, order);
        Some(head)
    }

    /// Walk `free_list[order]` from the head.
    pub(crate) fn iter<'a, M: PhysMapper>(
        &self,
        mapper: &'a M,
        window: &'a WindowConfig,
        order: usize,
    ) -> impl Iterator<Item = usize> + 'a {
        core::iter::successors(self.heads[order], move |&index| {
            Self::header(mapper, window, index).next.get()
        })
    }
}
