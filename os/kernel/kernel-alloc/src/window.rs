use kernel_info::memory::{ALLOC_BASE, ALLOC_PAGES};
use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE, PhysicalAddress};

/// The physical range the buddy allocator manages, addressed by page index.
///
/// All "addresses" inside the allocator are indices checked against this
/// window; conversion to and from [`PhysicalAddress`] happens only here.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WindowConfig {
    pub base: PhysicalAddress,
    pub pages: usize,
}

impl WindowConfig {
    #[must_use]
    pub const fn new(base: PhysicalAddress, pages: usize) -> Self {
        Self { base, pages }
    }

    /// The window from the kernel memory layout.
    #[must_use]
    pub const fn kernel() -> Self {
        Self::new(PhysicalAddress::new(ALLOC_BASE), ALLOC_PAGES)
    }

    /// One past the last managed byte.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + (self.pages as u64) * PAGE_SIZE)
    }

    #[must_use]
    pub fn contains(&self, pa: PhysicalAddress) -> bool {
        pa >= self.base && pa < self.end()
    }

    /// Index of the page containing `pa`.
    #[must_use]
    pub fn index_of(&self, pa: PhysicalAddress) -> Option<usize> {
        self.contains(pa)
            .then(|| ((pa - self.base) >> PAGE_SHIFT) as usize)
    }

    /// Base address of page `index`.
    #[must_use]
    pub const fn address_of(&self, index: usize) -> PhysicalAddress {
        PhysicalAddress::new(self.base.as_u64() + ((index as u64) << PAGE_SHIFT))
    }
}
