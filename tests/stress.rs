use quince::HashTable;
use rand::prelude::*;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Barrier;
use std::thread;

mod common;
use common::{assert_buckets_sorted, live_entries, threads};

const MIN_BUCKETS: usize = HashTable::<u64, u64>::MIN_BUCKETS;

// Sixteen threads hammer a single key. The key range never crosses a
// resize threshold, so the insert/remove bookkeeping must balance exactly.
#[test]
fn same_key_stress() {
    const THREADS: usize = 16;
    const OPS: usize = if cfg!(miri) { 100 } else { 20_000 };
    const ITERATIONS: usize = if cfg!(miri) { 1 } else { 8 };

    for _ in 0..ITERATIONS {
        let table = HashTable::new();
        let inserted = AtomicUsize::new(0);
        let removed = AtomicUsize::new(0);
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for t in 0..THREADS {
                let table = &table;
                let inserted = &inserted;
                let removed = &removed;
                let barrier = &barrier;

                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(t as u64);
                    barrier.wait();

                    for _ in 0..OPS {
                        if rng.gen() {
                            if table.insert(42u64, t) {
                                inserted.fetch_add(1, Ordering::Relaxed);
                            }
                        } else if table.remove(&42) {
                            removed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        });

        let live = inserted.load(Ordering::Relaxed) - removed.load(Ordering::Relaxed);
        assert!(live <= 1);
        assert_eq!(table.contains(&42), live == 1);
        assert_eq!(table.len(), live);

        let snapshot = table.snapshot();
        assert_eq!(live_entries(&snapshot), live);
        assert_buckets_sorted(&snapshot);
    }
}

// Every thread owns a disjoint slice of the key space and checks each
// operation's outcome against a local model. Disjoint ownership makes the
// per-key histories sequential, so the outcomes must match the model
// exactly, resizes and all.
#[test]
fn disjoint_keys_stress() {
    const KEYS_PER_THREAD: usize = 64;
    const OPS: usize = if cfg!(miri) { 200 } else { 20_000 };

    let threads = threads();
    let table = HashTable::new();
    let barrier = Barrier::new(threads);

    let final_sets: Vec<HashSet<u64>> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let table = &table;
                let barrier = &barrier;

                s.spawn(move || {
                    let keys: Vec<u64> = (0..KEYS_PER_THREAD)
                        .map(|i| (t + i * threads) as u64)
                        .collect();

                    let mut rng = StdRng::seed_from_u64(t as u64);
                    let mut local = HashSet::new();
                    barrier.wait();

                    for _ in 0..OPS {
                        let key = *keys.choose(&mut rng).unwrap();
                        if rng.gen() {
                            assert_eq!(table.insert(key, key * 7), local.insert(key));
                        } else {
                            assert_eq!(table.remove(&key), local.remove(&key));
                        }
                    }

                    local
                })
            })
            .collect();

        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let mut expected = 0;
    for (t, local) in final_sets.iter().enumerate() {
        expected += local.len();
        for i in 0..KEYS_PER_THREAD {
            let key = (t + i * threads) as u64;
            assert_eq!(table.contains(&key), local.contains(&key), "key {key}");
        }
    }

    assert_eq!(table.len(), expected);
    let snapshot = table.snapshot();
    assert_eq!(live_entries(&snapshot), expected);
    assert_buckets_sorted(&snapshot);
}

// Random operations over a small shared key range from twice as many
// threads as cores. The range is too small to trigger a resize, so the
// table state must match the snapshot exactly after the threads join; the
// real target is the reclamation machinery under a sanitizer.
#[test]
fn hazard_stress() {
    const OPS: usize = if cfg!(miri) { 300 } else { 100_000 };

    let threads = threads() * 2;
    let table: HashTable<u64, String> = HashTable::new();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let table = &table;
            let barrier = &barrier;

            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                barrier.wait();

                for _ in 0..OPS {
                    let key = rng.gen_range(0..=100u64);
                    match rng.gen_range(0..3) {
                        0 => {
                            table.insert(key, format!("V{key}"));
                        }
                        1 => {
                            table.remove(&key);
                        }
                        _ => {
                            table.contains(&key);
                        }
                    }
                }
            });
        }
    });

    let snapshot = table.snapshot();
    assert_eq!(live_entries(&snapshot), table.len());
    assert_buckets_sorted(&snapshot);
    for (_, bucket) in &snapshot {
        for (key, value, _) in bucket {
            assert!(*key <= 100);
            assert_eq!(*value, format!("V{key}"));
        }
    }
}

// A reader snapshots the table while disjoint-key writers churn it. Every
// snapshot must respect the chain-order invariant and report only pairs
// that were genuinely inserted at some point.
#[test]
fn snapshot_stress() {
    const KEYS_PER_THREAD: usize = 64;
    const OPS: usize = if cfg!(miri) { 200 } else { 10_000 };

    let threads = threads();
    let universe = (threads * KEYS_PER_THREAD) as u64;
    let table = HashTable::new();
    let stop = AtomicBool::new(false);

    thread::scope(|s| {
        for t in 0..threads {
            let table = &table;

            s.spawn(move || {
                let keys: Vec<u64> = (0..KEYS_PER_THREAD)
                    .map(|i| (t + i * threads) as u64)
                    .collect();

                let mut rng = StdRng::seed_from_u64(t as u64);
                for _ in 0..OPS {
                    let key = *keys.choose(&mut rng).unwrap();
                    if rng.gen() {
                        table.insert(key, key * 7);
                    } else {
                        table.remove(&key);
                    }
                }
            });
        }

        let table = &table;
        let stop = &stop;
        s.spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let snapshot = table.snapshot();
                assert_buckets_sorted(&snapshot);
                for (_, bucket) in &snapshot {
                    for (key, value, _) in bucket {
                        assert!(*key < universe);
                        assert_eq!(*value, key * 7);
                    }
                }
                thread::sleep(std::time::Duration::from_millis(1));
            }
        });

        // Give the reader a window of overlap with the writers, then flag
        // it down; the scope joins everyone.
        thread::sleep(std::time::Duration::from_millis(if cfg!(miri) { 10 } else { 100 }));
        stop.store(true, Ordering::Relaxed);
    });

    assert_buckets_sorted(&table.snapshot());
}

// Concurrent growth and shrinkage: every thread pushes its own key range
// through a full insert/remove cycle, dragging the array size up and back
// down while its neighbors do the same.
#[test]
fn grow_shrink_stress() {
    const KEYS_PER_THREAD: usize = if cfg!(miri) { 32 } else { 2_000 };

    let threads = threads();
    let table = HashTable::new();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let table = &table;
            let barrier = &barrier;

            s.spawn(move || {
                let lo = (t * KEYS_PER_THREAD) as u64;
                let hi = lo + KEYS_PER_THREAD as u64;
                barrier.wait();

                for key in lo..hi {
                    assert!(table.insert(key, key));
                }
                for key in lo..hi {
                    assert!(table.contains(&key), "key {key} lost");
                }
                // Keep every twentieth key.
                for key in lo..hi {
                    if key % 20 != 0 {
                        assert!(table.remove(&key), "key {key} already gone");
                    }
                }
            });
        }
    });

    let keep = (0..(threads * KEYS_PER_THREAD) as u64)
        .filter(|key| key % 20 == 0)
        .count();

    assert_eq!(table.len(), keep);
    for key in 0..(threads * KEYS_PER_THREAD) as u64 {
        assert_eq!(table.contains(&key), key % 20 == 0);
    }

    assert!(table.bucket_count() >= MIN_BUCKETS);
    let snapshot = table.snapshot();
    assert_eq!(live_entries(&snapshot), keep);
    assert_buckets_sorted(&snapshot);
}

// Resets race a crowd of writers; the table must stay coherent and come up
// empty after a final quiescent reset.
#[test]
fn reset_under_load() {
    const OPS: usize = if cfg!(miri) { 100 } else { 5_000 };

    let threads = threads();
    let table: HashTable<u64, u64> = HashTable::new();
    let barrier = Barrier::new(threads + 1);

    thread::scope(|s| {
        for t in 0..threads {
            let table = &table;
            let barrier = &barrier;

            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(t as u64);
                barrier.wait();

                for _ in 0..OPS {
                    let key = rng.gen_range(0..1_000u64);
                    if rng.gen() {
                        table.insert(key, key);
                    } else {
                        table.remove(&key);
                    }
                }
            });
        }

        let table = &table;
        let barrier = &barrier;
        s.spawn(move || {
            barrier.wait();
            for _ in 0..if cfg!(miri) { 2 } else { 20 } {
                table.reset();
                thread::yield_now();
            }
        });
    });

    table.reset();
    assert!(table.is_empty());
    assert_eq!(live_entries(&table.snapshot()), 0);
    assert_eq!(table.bucket_count(), MIN_BUCKETS);
}
