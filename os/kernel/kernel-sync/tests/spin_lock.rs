use kernel_sync::SpinLock;
use std::panic;

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
        assert!(l.try_lock().is_none(), "re-entry must not get the lock");
    }
    let mut g = l.try_lock().expect("lock must be free after drop");
    *g += 1;
    assert_eq!(*g, 42);
}

#[test]
fn irq_lock_holds_the_lock_until_dropped() {
    let l = SpinLock::new(vec![1_u8]);
    {
        let mut g = l.lock_irq();
        g.push(2);
        assert!(l.try_lock().is_none());
    }
    l.lock_irq().push(3);
    assert_eq!(*l.lock(), [1, 2, 3]);
}

#[test]
fn optional_state_is_installed_once() {
    // The pattern of the kernel's allocator and archive statics.
    static SLOT: SpinLock<Option<u64>> = SpinLock::new(None);
    assert!(SLOT.lock_irq().is_none());
    *SLOT.lock_irq() = Some(7);
    let v = SLOT.lock_irq().as_mut().map(|v| {
        *v += 1;
        *v
    });
    assert_eq!(v, Some(8));
}

#[test]
fn contended_increments_are_exact() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 4;
    let iters = 2_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    let mut g = lock.lock();
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0);
                    *g += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                    drop(g);
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(*lock.lock(), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);
    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        let mut g = l.lock();
        *g = 123;
        panic!("boom");
    }));
    assert!(res.is_err());
    assert_eq!(*l.lock(), 123);
}
