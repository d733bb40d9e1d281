#![allow(dead_code)]

use quince::Snapshot;

use std::num::NonZeroUsize;
use std::thread;

// Number of worker threads for the concurrent tests.
pub fn threads() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(8)
        .clamp(4, 16)
}

// Asserts that the live entries of every bucket are strictly increasing by
// key: the chain-order invariant, which must hold in every snapshot no
// matter how the table is being mutated.
pub fn assert_buckets_sorted<K: Ord + std::fmt::Debug, V>(snapshot: &Snapshot<K, V>) {
    for (idx, bucket) in snapshot {
        let live: Vec<&K> = bucket
            .iter()
            .filter(|(_, _, marked)| !marked)
            .map(|(key, _, _)| key)
            .collect();

        for pair in live.windows(2) {
            assert!(
                pair[0] < pair[1],
                "bucket {idx} out of order: {:?} before {:?}",
                pair[0],
                pair[1],
            );
        }
    }
}

// The number of live entries a snapshot reports.
pub fn live_entries<K, V>(snapshot: &Snapshot<K, V>) -> usize {
    snapshot
        .iter()
        .map(|(_, bucket)| bucket.iter().filter(|(_, _, marked)| !marked).count())
        .sum()
}
