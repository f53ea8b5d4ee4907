use kernel_alloc::{AllocError, Allocator, PageDescriptor, PageStatus, WindowConfig};
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::host::HostMemory;

const BASE: u64 = 0x1000_0000;
const PAGES: usize = 256;

fn with_allocator(f: impl FnOnce(&mut Allocator<'_, &HostMemory>, &HostMemory)) {
    let mem = HostMemory::new(BASE, PAGES);
    let mut table = vec![PageDescriptor::new(); PAGES];
    let window = WindowConfig::new(PhysicalAddress::new(BASE), PAGES);
    let mut alloc = Allocator::new(&mem, window, &mut table);
    alloc.init();
    f(&mut alloc, &mem);
}

fn chunked_pages(alloc: &Allocator<'_, &HostMemory>) -> Vec<PhysicalAddress> {
    (0..PAGES as u64)
        .map(|i| PhysicalAddress::new(BASE + i * PAGE_SIZE))
        .filter(|&pa| alloc.buddy().descriptor(pa).unwrap().status == PageStatus::Chunked)
        .collect()
}

#[test]
fn chunks_are_carved_from_whole_pages() {
    with_allocator(|alloc, _| {
        let per_page = (PAGE_SIZE / 32) as usize;
        let n = 2 * per_page + 44;
        let chunks: Vec<_> = (0..n).map(|_| alloc.allocate(30).unwrap()).collect();

        let pages = chunked_pages(alloc);
        assert_eq!(pages.len(), n.div_ceil(per_page));
        assert_eq!(alloc.free_pages(), PAGES - pages.len());
        for p in &pages {
            let d = alloc.buddy().descriptor(*p).unwrap();
            assert_eq!(d.chunk_order, 5);
        }

        let mut sorted = chunks.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), n, "chunks handed out twice");
        assert!(chunks.iter().all(|c| c.as_u64() % 32 == 0));
    });
}

#[test]
fn fully_freed_chunk_page_is_not_reclaimed() {
    with_allocator(|alloc, _| {
        let per_page = (PAGE_SIZE / 64) as usize;
        let chunks: Vec<_> = (0..per_page).map(|_| alloc.allocate(64).unwrap()).collect();
        let page = chunks[0].page_base();
        assert!(chunks.iter().all(|c| c.page_base() == page));
        assert_eq!(alloc.buddy().descriptor(page).unwrap().chunk_free_count, 0);
        let free_pages = alloc.free_pages();

        for c in &chunks {
            alloc.free(*c).unwrap();
        }

        // Chunks are back on their list; the page stays with the chunk allocator.
        assert_eq!(alloc.free_chunk_count(6), per_page);
        let d = alloc.buddy().descriptor(page).unwrap();
        assert_eq!(d.status, PageStatus::Chunked);
        assert_eq!(d.chunk_free_count as usize, per_page);
        assert_eq!(alloc.free_pages(), free_pages);

        // ...and the next request of that class reuses it without a new page.
        let again = alloc.allocate(50).unwrap();
        assert_eq!(again.page_base(), page);
        assert_eq!(alloc.free_pages(), free_pages);
    });
}

#[test]
fn chunk_links_live_in_the_chunks() {
    with_allocator(|alloc, mem| {
        let a = alloc.chunk_alloc(2048).unwrap();
        // The other half of the page is the list head; its first word ends the list.
        assert_eq!(alloc.free_chunk_count(11), 1);
        assert_eq!(mem.read_u64(a + 2048), 0);
        alloc.free_chunk(a).unwrap();
        assert_eq!(mem.read_u64(a), (a + 2048).as_u64());
    });
}

#[test]
fn bad_chunk_frees_are_rejected() {
    with_allocator(|alloc, _| {
        let a = alloc.allocate(100).unwrap();
        assert_eq!(alloc.free(a + 8), Err(AllocError::InvalidFree(a + 8)));
        alloc.free(a).unwrap();
        assert_eq!(alloc.free(a), Err(AllocError::InvalidFree(a)));
    });
}

#[test]
fn double_free_beside_a_live_chunk_is_rejected() {
    with_allocator(|alloc, _| {
        let a = alloc.allocate(100).unwrap();
        let b = alloc.allocate(100).unwrap();
        assert_eq!(a.page_base(), b.page_base());
        alloc.free(a).unwrap();
        let count = alloc.buddy().descriptor(a).unwrap().chunk_free_count;
        assert_eq!(alloc.free(a), Err(AllocError::InvalidFree(a)));
        assert_eq!(alloc.buddy().descriptor(a).unwrap().chunk_free_count, count);

        let x = alloc.allocate(100).unwrap();
        let y = alloc.allocate(100).unwrap();
        assert_ne!(x, y);
        assert_ne!(x, b);
        assert_ne!(y, b);
    });
}

#[test]
fn allocate_dispatches_by_size() {
    with_allocator(|alloc, _| {
        let small = alloc.allocate(2048).unwrap();
        let large = alloc.allocate(2049).unwrap();
        assert_eq!(
            alloc.buddy().descriptor(small).unwrap().status,
            PageStatus::Chunked
        );
        let d = alloc.buddy().descriptor(large).unwrap();
        assert_eq!((d.status, d.page_order), (PageStatus::Allocated, 0));

        let five = alloc.allocate(5 * PAGE_SIZE as usize - 1).unwrap();
        assert_eq!(alloc.buddy().descriptor(five).unwrap().page_order, 3);
        assert_eq!(
            alloc.allocate(((1 << MAX_ORDER) * PAGE_SIZE + 1) as usize),
            Err(AllocError::TooLarge(((1 << MAX_ORDER) * PAGE_SIZE + 1) as usize))
        );
    });
}

#[test]
fn reserved_range_is_never_handed_out() {
    with_allocator(|alloc, _| {
        let start = BASE + 5 * PAGE_SIZE + 100;
        let end = BASE + 9 * PAGE_SIZE;
        alloc.memory_reserve(start, end).unwrap();

        let mut got = Vec::new();
        while let Ok(pa) = alloc.page_alloc(1) {
            got.push(pa);
        }
        assert!(!got.is_empty());
        for pa in got {
            let (lo, hi) = (pa.as_u64(), pa.as_u64() + PAGE_SIZE);
            assert!(hi <= start || lo >= end, "{pa} overlaps the reservation");
        }
    });
}

#[test]
fn reservation_takes_the_whole_enclosing_blocks() {
    with_allocator(|alloc, _| {
        let before = alloc.free_pages();
        alloc
            .memory_reserve(BASE + 130 * PAGE_SIZE, BASE + 131 * PAGE_SIZE)
            .unwrap();
        // Page 130 sat inside the order-7 block at 128.
        assert_eq!(alloc.free_pages(), before - 128);
        let d = alloc
            .buddy()
            .descriptor(PhysicalAddress::new(BASE + 255 * PAGE_SIZE))
            .unwrap();
        assert_eq!(d.status, PageStatus::Reserved);
    });
}

#[test]
fn conflicting_reservations_change_nothing() {
    with_allocator(|alloc, _| {
        let a = alloc.page_alloc(1).unwrap();
        let statuses = |alloc: &Allocator<'_, &HostMemory>| -> Vec<PageStatus> {
            (0..PAGES as u64)
                .map(|i| {
                    alloc
                        .buddy()
                        .descriptor(PhysicalAddress::new(BASE + i * PAGE_SIZE))
                        .unwrap()
                        .status
                })
                .collect()
        };
        let before = (statuses(alloc), alloc.free_pages());

        let err = alloc.memory_reserve(a.as_u64() - PAGE_SIZE, a.as_u64() + PAGE_SIZE);
        assert!(matches!(err, Err(AllocError::ReservationConflict { .. })));
        assert_eq!((statuses(alloc), alloc.free_pages()), before);

        alloc.memory_reserve(BASE, BASE + PAGE_SIZE).unwrap();
        let before = (statuses(alloc), alloc.free_pages());
        let err = alloc.memory_reserve(BASE, BASE + PAGE_SIZE);
        assert!(matches!(err, Err(AllocError::ReservationConflict { .. })));
        assert_eq!((statuses(alloc), alloc.free_pages()), before);
    });
}

#[test]
fn ranges_outside_the_window_are_ignored() {
    with_allocator(|alloc, _| {
        alloc.memory_reserve(0, 0x1000).unwrap();
        alloc.memory_reserve(0x3F00_0000, 0x4000_0000).unwrap();
        assert_eq!(alloc.free_pages(), PAGES);
    });
}
