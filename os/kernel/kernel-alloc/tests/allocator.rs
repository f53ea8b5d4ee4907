use kernel_alloc::{AllocError, Allocator, PageDescriptor, PageStatus, WindowConfig};
use kernel_info::memory::MAX_ORDER;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress};
use kernel_vmem::host::HostMemory;

const BASE: u64 = 0x1000_0000;
const PAGES: usize = 256;

fn window() -> WindowConfig {
    WindowConfig::new(PhysicalAddress::new(BASE), PAGES)
}

fn page(index: u64) -> PhysicalAddress {
    PhysicalAddress::new(BASE + index * PAGE_SIZE)
}

/// Build an allocator over fresh host memory; `reserve` runs before `init`.
fn with_allocator(
    reserve: &[(u64, u64)],
    f: impl FnOnce(&mut Allocator<'_, &HostMemory>),
) {
    let mem = HostMemory::new(BASE, PAGES);
    let mut table = vec![PageDescriptor::new(); PAGES];
    let mut alloc = Allocator::new(&mem, window(), &mut table);
    for &(start, end) in reserve {
        alloc.memory_reserve(start, end).unwrap();
    }
    assert!(!alloc.buddy().is_initialized());
    alloc.init();
    assert!(alloc.buddy().is_initialized());
    f(&mut alloc);
}

fn status(alloc: &Allocator<'_, &HostMemory>, pa: PhysicalAddress) -> PageStatus {
    alloc.buddy().descriptor(pa).unwrap().status
}

fn sorted_list(alloc: &Allocator<'_, &HostMemory>, order: usize) -> Vec<PhysicalAddress> {
    let mut v: Vec<_> = alloc.buddy().free_blocks(order).collect();
    v.sort();
    v
}

fn snapshot(alloc: &Allocator<'_, &HostMemory>) -> (Vec<Vec<PhysicalAddress>>, Vec<PageStatus>) {
    let lists = (0..=MAX_ORDER).map(|o| sorted_list(alloc, o)).collect();
    let statuses = (0..PAGES as u64).map(|i| status(alloc, page(i))).collect();
    (lists, statuses)
}

/// Every page is covered exactly once by a free block, a live allocation or
/// a reservation.
fn assert_conservation(alloc: &Allocator<'_, &HostMemory>, live: &[(PhysicalAddress, usize)]) {
    let w = window();
    let mut owner = vec![""; PAGES];
    for order in 0..=MAX_ORDER {
        for pa in alloc.buddy().free_blocks(order) {
            assert_eq!(status(alloc, pa), PageStatus::Free(order as u8));
            let head = w.index_of(pa).unwrap();
            for i in head..head + (1 << order) {
                assert_eq!(owner[i], "", "page {i} on two lists");
                owner[i] = "free";
            }
        }
    }
    for &(pa, pages) in live {
        let head = w.index_of(pa).unwrap();
        for i in head..head + pages.next_power_of_two() {
            assert_eq!(owner[i], "", "page {i} allocated twice");
            assert_eq!(status(alloc, w.address_of(i)), PageStatus::Allocated);
            owner[i] = "allocated";
        }
    }
    for (i, o) in owner.iter_mut().enumerate() {
        if status(alloc, w.address_of(i)) == PageStatus::Reserved {
            assert_eq!(*o, "");
            *o = "reserved";
        }
    }
    assert!(owner.iter().all(|o| !o.is_empty()), "lost pages: {owner:?}");
}

#[test]
fn init_builds_maximal_blocks() {
    with_allocator(&[], |alloc| {
        assert_eq!(sorted_list(alloc, MAX_ORDER), [page(0), page(128)]);
        for order in 0..MAX_ORDER {
            assert_eq!(alloc.buddy().free_blocks(order).count(), 0);
        }
        assert_eq!(alloc.free_pages(), PAGES);
        assert_eq!(status(alloc, page(1)), PageStatus::BelongsToBuddy);
        assert_conservation(alloc, &[]);
    });
}

#[test]
fn reservation_before_init_only_marks() {
    with_allocator(&[(BASE, BASE + 4 * PAGE_SIZE)], |alloc| {
        assert_eq!(alloc.free_pages(), PAGES - 4);
        assert_eq!(sorted_list(alloc, MAX_ORDER), [page(128)]);
        assert_eq!(sorted_list(alloc, 2), [page(4)]);
        assert_eq!(sorted_list(alloc, 6), [page(64)]);
        assert_eq!(status(alloc, page(3)), PageStatus::Reserved);
        assert_conservation(alloc, &[]);
    });
}

#[test]
fn three_pages_round_up_and_are_reused() {
    with_allocator(&[], |alloc| {
        let a = alloc.page_alloc(3).unwrap();
        let head = alloc.buddy().descriptor(a).unwrap();
        assert_eq!(head.page_order, 2);
        assert_conservation(alloc, &[(a, 3)]);
        assert_eq!(alloc.free_pages(), PAGES - 4);

        alloc.free_page(a).unwrap();
        let b = alloc.page_alloc(4).unwrap();
        assert_eq!(a, b);
    });
}

#[test]
fn alloc_then_free_restores_the_free_lists() {
    with_allocator(&[], |alloc| {
        for order in 0..=MAX_ORDER {
            let before = snapshot(alloc);
            let pa = alloc.page_alloc(1 << order).unwrap();
            assert_ne!(snapshot(alloc), before);
            alloc.free_page(pa).unwrap();
            assert_eq!(snapshot(alloc), before, "order {order}");
        }
    });
}

#[test]
fn buddies_merge_in_either_order() {
    for reverse in [false, true] {
        with_allocator(&[], |alloc| {
            let a = alloc.page_alloc(1).unwrap();
            let b = alloc.page_alloc(1).unwrap();
            let c = alloc.page_alloc(2).unwrap();
            assert_eq!((a, b, c), (page(128), page(129), page(130)));

            let (first, second) = if reverse { (b, a) } else { (a, b) };
            alloc.free_page(first).unwrap();
            assert_eq!(status(alloc, first), PageStatus::Free(0));
            alloc.free_page(second).unwrap();

            // Merged once, then blocked by the allocated block at 130.
            assert_eq!(status(alloc, a), PageStatus::Free(1));
            assert_eq!(status(alloc, b), PageStatus::BelongsToBuddy);
            assert!(sorted_list(alloc, 1).contains(&a));
            assert!(sorted_list(alloc, 0).is_empty());
            assert_conservation(alloc, &[(c, 2)]);
        });
    }
}

#[test]
fn adjacent_non_buddies_do_not_merge() {
    with_allocator(&[], |alloc| {
        let pages: Vec<_> = (0..4).map(|_| alloc.page_alloc(1).unwrap()).collect();
        assert_eq!(pages, [page(128), page(129), page(130), page(131)]);

        // 129 and 130 are neighbours, but 129's buddy is 128.
        alloc.free_page(pages[1]).unwrap();
        alloc.free_page(pages[2]).unwrap();
        assert_eq!(sorted_list(alloc, 0), [page(129), page(130)]);
        assert!(!sorted_list(alloc, 1).contains(&page(129)));
        assert_conservation(alloc, &[(pages[0], 1), (pages[3], 1)]);
    });
}

#[test]
fn oversized_and_exhausted_requests_fail() {
    with_allocator(&[], |alloc| {
        assert_eq!(
            alloc.page_alloc((1 << MAX_ORDER) + 1),
            Err(AllocError::TooLarge(((1 << MAX_ORDER) + 1) * PAGE_SIZE as usize))
        );
        let a = alloc.page_alloc(128).unwrap();
        let b = alloc.page_alloc(128).unwrap();
        assert_eq!(alloc.page_alloc(1), Err(AllocError::AllocationFailure(0)));
        assert_eq!(alloc.allocate(16), Err(AllocError::AllocationFailure(0)));
        alloc.free(a).unwrap();
        alloc.free(b).unwrap();
        assert_eq!(alloc.free_pages(), PAGES);
    });
}

#[test]
fn invalid_and_double_frees_are_rejected() {
    with_allocator(&[], |alloc| {
        let a = alloc.page_alloc(1).unwrap();
        alloc.free(a).unwrap();
        let before = snapshot(alloc);
        assert_eq!(alloc.free(a), Err(AllocError::InvalidFree(a)));
        assert_eq!(
            alloc.free(PhysicalAddress::new(0x10)),
            Err(AllocError::InvalidFree(PhysicalAddress::new(0x10)))
        );
        assert_eq!(snapshot(alloc), before);
    });
}

#[test]
fn interior_pages_of_a_block_cannot_be_freed() {
    with_allocator(&[], |alloc| {
        let a = alloc.page_alloc(4).unwrap();
        let before = snapshot(alloc);
        for k in 1..4 {
            let interior = a + k * PAGE_SIZE;
            assert_eq!(alloc.free(interior), Err(AllocError::InvalidFree(interior)));
        }
        assert_eq!(snapshot(alloc), before);

        let singles: Vec<_> = (0..PAGES - 4).map(|_| alloc.page_alloc(1).unwrap()).collect();
        assert!(singles.iter().all(|p| *p < a || *p >= a + 4 * PAGE_SIZE));
        assert_eq!(alloc.page_alloc(1), Err(AllocError::AllocationFailure(0)));

        alloc.free(a).unwrap();
        assert_eq!(alloc.free_pages(), 4);
    });
}

#[test]
fn absurd_page_counts_fail_without_overflow() {
    with_allocator(&[], |alloc| {
        let before = snapshot(alloc);
        assert_eq!(alloc.page_alloc(usize::MAX / 2), Err(AllocError::TooLarge(usize::MAX)));
        assert_eq!(alloc.page_alloc(usize::MAX), Err(AllocError::TooLarge(usize::MAX)));
        assert_eq!(snapshot(alloc), before);
    });
}

#[test]
fn random_sequences_conserve_pages() {
    with_allocator(&[], |alloc| {
        let mut live: Vec<(PhysicalAddress, usize)> = Vec::new();
        let mut seed = 0x2545_F491_4F6C_DD1D_u64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..2_000 {
            let r = next();
            if live.is_empty() || r % 3 != 0 {
                let pages = (r >> 8) as usize % 20 + 1;
                match alloc.page_alloc(pages) {
                    Ok(pa) => live.push((pa, pages)),
                    Err(AllocError::AllocationFailure(_)) => {}
                    Err(e) => panic!("unexpected {e}"),
                }
            } else {
                let victim = live.swap_remove((r >> 8) as usize % live.len());
                alloc.free_page(victim.0).unwrap();
            }
            assert_conservation(alloc, &live);
        }

        for (pa, _) in live.drain(..) {
            alloc.free_page(pa).unwrap();
        }
        assert_eq!(sorted_list(alloc, MAX_ORDER), [page(0), page(128)]);
    });
}
