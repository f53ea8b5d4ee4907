//! # Kernel Physical Memory Allocation
//!
//! Buddy page allocator, chunk (slab) sub-allocator and memory reservation
//! over one fixed physical window.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │           Allocator::allocate / free                │
//! │    • size <= 2 KiB → chunk allocator                │
//! │    • larger        → whole pages                    │
//! └──────────┬─────────────────────────┬────────────────┘
//!            │                         │
//! ┌──────────▼──────────┐   ┌──────────▼────────────────┐
//! │   ChunkAllocator    │──►│     BuddyAllocator        │
//! │ • 16 B ..= 2 KiB    │   │ • 2^0 ..= 2^7 pages       │
//! │ • lists in chunks   │   │ • lists in free pages     │
//! └─────────────────────┘   │ • split / coalesce        │
//!                           │ • memory_reserve          │
//!                           └──────────┬────────────────┘
//!                                      │
//!                           ┌──────────▼────────────────┐
//!                           │  PageDescriptor table     │
//!                           │  (placed by the startup   │
//!                           │   bump allocator)         │
//!                           └───────────────────────────┘
//! ```
//!
//! All state lives in one [`Allocator`] value; the kernel keeps a single
//! instance behind an interrupt-masking lock, tests build as many as they
//! like over [`HostMemory`](kernel_vmem::host::HostMemory).
//!
//! ```
//! use kernel_alloc::{Allocator, PageDescriptor, WindowConfig};
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::host::HostMemory;
//!
//! let mem = HostMemory::new(0x1000_0000, 256);
//! let mut table = vec![PageDescriptor::new(); 256];
//! let window = WindowConfig::new(PhysicalAddress::new(0x1000_0000), 256);
//! let mut alloc = Allocator::new(&mem, window, &mut table);
//! alloc.init();
//!
//! let small = alloc.allocate(24).unwrap();
//! let big = alloc.allocate(3 * 4096).unwrap();
//! assert!(big.is_page_aligned());
//! alloc.free(small).unwrap();
//! alloc.free(big).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code)]

pub mod bootstrap;
pub mod buddy;
pub mod chunk;
pub mod descriptor;
mod error;
mod free_list;
mod window;

pub use crate::bootstrap::StartupAllocator;
pub use crate::buddy::BuddyAllocator;
pub use crate::chunk::{ChunkAllocator, MAX_CHUNK_SIZE};
pub use crate::descriptor::{PageDescriptor, PageStatus};
pub use crate::error::AllocError;
pub use crate::window::WindowConfig;

use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, pages_for};
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::warn;

/// General-purpose allocation used by the scheduler, the page-table builder
/// and the file system layer.
pub trait MemoryAllocator: FrameAlloc {
    /// Allocate at least `size` bytes.
    ///
    /// # Errors
    /// See [`AllocError`].
    fn allocate(&mut self, size: usize) -> Result<PhysicalAddress, AllocError>;

    /// Release memory from [`allocate`](Self::allocate).
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] for anything not currently allocated.
    fn free(&mut self, pa: PhysicalAddress) -> Result<(), AllocError>;
}

impl<A: MemoryAllocator + ?Sized> MemoryAllocator for &mut A {
    fn allocate(&mut self, size: usize) -> Result<PhysicalAddress, AllocError> {
        (**self).allocate(size)
    }

    fn free(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        (**self).free(pa)
    }
}

/// Buddy plus chunk allocator behind one `allocate`/`free` pair.
pub struct Allocator<'d, M: PhysMapper> {
    buddy: BuddyAllocator<'d, M>,
    chunks: ChunkAllocator,
}

impl<'d, M: PhysMapper> Allocator<'d, M> {
    pub fn new(mapper: M, window: WindowConfig, table: &'d mut [PageDescriptor]) -> Self {
        Self {
            buddy: BuddyAllocator::new(mapper, window, table),
            chunks: ChunkAllocator::new(),
        }
    }

    /// See [`BuddyAllocator::init`].
    pub fn init(&mut self) {
        self.buddy.init();
    }

    #[inline]
    pub const fn buddy(&self) -> &BuddyAllocator<'d, M> {
        &self.buddy
    }

    #[inline]
    pub const fn chunks(&self) -> &ChunkAllocator {
        &self.chunks
    }

    #[inline]
    pub const fn mapper(&self) -> &M {
        self.buddy.mapper()
    }

    /// Chunks for `size <= 2 KiB`, otherwise `ceil(size / PAGE_SIZE)` pages.
    ///
    /// # Errors
    /// See [`AllocError`].
    pub fn allocate(&mut self, size: usize) -> Result<PhysicalAddress, AllocError> {
        let result = if size > MAX_CHUNK_SIZE {
            let pages = pages_for(size as u64) as usize;
            self.buddy.page_alloc(pages).map_err(|e| match e {
                AllocError::TooLarge(_) => AllocError::TooLarge(size),
                other => other,
            })
        } else {
            self.chunks.chunk_alloc(&mut self.buddy, size)
        };
        if let Err(e) = result {
            warn!("allocate({size}): {e}");
        }
        result
    }

    /// Dispatch on the owning page's status.
    ///
    /// # Errors
    /// [`AllocError::InvalidFree`] unless the page is `Allocated` or `Chunked`.
    pub fn free(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        let status = self.buddy.descriptor(pa).map(|d| d.status);
        let result = match status {
            Some(PageStatus::Allocated) => self.buddy.free_page(pa),
            Some(PageStatus::Chunked) => self.chunks.free_chunk(&mut self.buddy, pa),
            _ => Err(AllocError::InvalidFree(pa)),
        };
        if let Err(e) = result {
            warn!("free({pa}): {e}");
        }
        result
    }

    /// See [`BuddyAllocator::page_alloc`].
    ///
    /// # Errors
    /// See [`BuddyAllocator::page_alloc`].
    pub fn page_alloc(&mut self, pages: usize) -> Result<PhysicalAddress, AllocError> {
        self.buddy.page_alloc(pages)
    }

    /// See [`BuddyAllocator::free_page`].
    ///
    /// # Errors
    /// See [`BuddyAllocator::free_page`].
    pub fn free_page(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        self.buddy.free_page(pa)
    }

    /// See [`BuddyAllocator::memory_reserve`].
    ///
    /// # Errors
    /// See [`BuddyAllocator::memory_reserve`].
    pub fn memory_reserve(&mut self, start: u64, end: u64) -> Result<(), AllocError> {
        self.buddy.memory_reserve(start, end)
    }

    /// See [`ChunkAllocator::chunk_alloc`].
    ///
    /// # Errors
    /// See [`ChunkAllocator::chunk_alloc`].
    pub fn chunk_alloc(&mut self, size: usize) -> Result<PhysicalAddress, AllocError> {
        self.chunks.chunk_alloc(&mut self.buddy, size)
    }

    /// See [`ChunkAllocator::free_chunk`].
    ///
    /// # Errors
    /// See [`ChunkAllocator::free_chunk`].
    pub fn free_chunk(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        self.chunks.free_chunk(&mut self.buddy, pa)
    }

    /// Free chunks currently on the list of size class `order`.
    #[must_use]
    pub fn free_chunk_count(&self, order: usize) -> usize {
        self.chunks.free_chunks(self.buddy.mapper(), order).count()
    }

    /// Pages on the buddy free lists.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.buddy.free_pages()
    }
}

impl<M: PhysMapper> MemoryAllocator for Allocator<'_, M> {
    fn allocate(&mut self, size: usize) -> Result<PhysicalAddress, AllocError> {
        Self::allocate(self, size)
    }

    fn free(&mut self, pa: PhysicalAddress) -> Result<(), AllocError> {
        Self::free(self, pa)
    }
}

impl<M: PhysMapper> FrameAlloc for Allocator<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalAddress> {
        self.buddy.page_alloc(1).ok()
    }

    fn free_4k(&mut self, pa: PhysicalAddress) {
        if let Err(e) = self.buddy.free_page(pa) {
            warn!("free_4k({pa}): {e}");
        }
    }
}

const _: () = assert!(PAGE_SIZE as usize > MAX_CHUNK_SIZE);
