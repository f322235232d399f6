///
/// Parallel Task Integration Tests
///
/// Runs `execute_threaded_task` over large ranges on the global pool and
/// on explicit pools, checking exactly-once index coverage.
///

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use tessel_runtime::{ThreadPool, execute_threaded_task, execute_threaded_task_in};

#[test]
fn ten_million_indices_written_once() {
    const COUNT: usize = 10_000_000;
    let slots: Vec<AtomicU32> = (0..COUNT).map(|_| AtomicU32::new(u32::MAX)).collect();
    let repeats = AtomicUsize::new(0);

    execute_threaded_task(COUNT, &slots, |i, slots| {
        if slots[i].swap(i as u32, Ordering::Relaxed) != u32::MAX {
            repeats.fetch_add(1, Ordering::Relaxed);
        }
    });

    assert_eq!(repeats.load(Ordering::SeqCst), 0);
    assert!(slots.iter().enumerate().all(|(i, slot)| slot.load(Ordering::Relaxed) == i as u32));
}

#[test]
fn zero_and_one() {
    let calls = AtomicUsize::new(0);
    execute_threaded_task(0, &(), |_, _| {
        calls.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    execute_threaded_task(1, &(), |i, _| {
        assert_eq!(i, 0);
        calls.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn tasks_share_a_small_pool() {
    let pool = ThreadPool::new(0, 2);
    let total = AtomicUsize::new(0);
    for _ in 0..5 {
        execute_threaded_task_in(&pool, 10_000, &total, |i, total| {
            total.fetch_add(i, Ordering::Relaxed);
        });
    }
    assert_eq!(total.load(Ordering::SeqCst), 5 * (0..10_000usize).sum::<usize>());
    assert!(pool.thread_count() <= 2);
}
