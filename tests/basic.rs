use quince::HashTable;

mod common;
use common::{assert_buckets_sorted, live_entries};

const MIN_BUCKETS: usize = HashTable::<u64, u64>::MIN_BUCKETS;

// Looks a value up through the snapshot interface.
fn value_of<K, V>(table: &HashTable<K, V>, key: &K) -> Option<V>
where
    K: Clone + std::hash::Hash + Ord + Send + Sync,
    V: Clone + Send + Sync,
{
    table
        .snapshot()
        .into_iter()
        .flat_map(|(_, bucket)| bucket)
        .find(|(k, _, marked)| k == key && !marked)
        .map(|(_, v, _)| v)
}

#[test]
fn new() {
    let table: HashTable<u64, u64> = HashTable::new();
    assert!(table.is_empty());
    assert_eq!(table.len(), 0);
    assert_eq!(table.bucket_count(), MIN_BUCKETS);
    assert!(!table.contains(&42));
}

#[test]
fn insert_and_contains() {
    let table = HashTable::new();
    assert!(table.insert(42, "a"));
    assert!(table.contains(&42));
    assert!(!table.contains(&43));
    assert_eq!(table.len(), 1);
}

#[test]
fn duplicate_insert_keeps_first_value() {
    let table = HashTable::new();
    assert!(table.insert(42, "a"));
    assert!(!table.insert(42, "b"));

    assert_eq!(table.len(), 1);
    assert_eq!(value_of(&table, &42), Some("a"));
}

#[test]
fn remove_is_idempotent() {
    let table = HashTable::new();
    assert!(!table.remove(&42));

    table.insert(42, "a");
    assert!(table.remove(&42));
    assert!(!table.remove(&42));
    assert!(!table.contains(&42));
    assert_eq!(table.len(), 0);
}

#[test]
fn insert_remove_round_trip() {
    let table = HashTable::new();
    assert!(table.insert(1, "a"));
    assert!(table.remove(&1));
    assert!(!table.contains(&1));

    // The slot is genuinely free again.
    assert!(table.insert(1, "b"));
    assert_eq!(value_of(&table, &1), Some("b"));
}

#[test]
fn borrowed_key_lookup() {
    let table: HashTable<String, u32> = HashTable::new();
    table.insert("alpha".to_owned(), 1);
    table.insert("beta".to_owned(), 2);

    assert!(table.contains("alpha"));
    assert!(!table.contains("gamma"));
    assert!(table.remove("beta"));
    assert!(!table.contains("beta"));
}

#[test]
fn string_values_survive_resize() {
    let table = HashTable::new();
    for key in 0..300u64 {
        assert!(table.insert(key, format!("V{key}")));
    }

    assert!(table.bucket_count() > MIN_BUCKETS);
    assert_eq!(table.len(), 300);
    for key in 0..300 {
        assert_eq!(value_of(&table, &key), Some(format!("V{key}")));
    }

    assert_buckets_sorted(&table.snapshot());
}

// Insert 0..200, remove the bottom 150, and watch the array grow past the
// minimum and shrink back to it.
#[test]
fn grow_then_shrink() {
    let table = HashTable::new();
    for key in 0..200u64 {
        assert!(table.insert(key, format!("V{key}")));
    }

    assert!(table.contains(&150));
    assert!(table.bucket_count() > MIN_BUCKETS);

    for key in 0..150 {
        assert!(table.remove(&key));
    }

    assert!(!table.contains(&50));
    assert!(table.contains(&175));
    assert!(table.contains(&199));
    assert!(table.bucket_count() >= MIN_BUCKETS);

    // Push the load below the shrink threshold.
    for key in 150..174 {
        assert!(table.remove(&key));
    }

    assert_eq!(table.bucket_count(), MIN_BUCKETS);
    assert!(table.contains(&175));
    assert!(table.contains(&199));
}

// Ten thousand inserts force repeated doubling; removing all but 500 forces
// repeated halving, and the load settles back between the two thresholds.
#[test]
fn bulk_grow_then_shrink() {
    let table = HashTable::new();
    for key in 0..10_000u64 {
        assert!(table.insert(key, key));
    }

    assert!(table.bucket_count() > MIN_BUCKETS);
    assert_eq!(table.len(), 10_000);

    for key in 0..9_500 {
        assert!(table.remove(&key));
    }

    assert_eq!(table.len(), 500);
    for key in (0..10_000).step_by(100) {
        assert_eq!(table.contains(&key), key >= 9_500);
    }

    let load = table.approximate_load();
    assert!((0.25..=2.0).contains(&load), "load {load} out of range");
    assert!(table.bucket_count() >= MIN_BUCKETS);
    assert_buckets_sorted(&table.snapshot());
}

#[test]
fn size_never_shrinks_below_minimum() {
    let table = HashTable::new();
    for key in 0..64u64 {
        table.insert(key, key);
    }
    for key in 0..64 {
        table.remove(&key);
    }

    assert_eq!(table.bucket_count(), MIN_BUCKETS);
    assert_eq!(table.len(), 0);
}

#[test]
fn snapshot_reports_all_entries() {
    let table = HashTable::new();
    for key in 0..128u64 {
        table.insert(key, key * 10);
    }

    let snapshot = table.snapshot();
    assert_eq!(snapshot.len(), table.bucket_count());
    assert_eq!(live_entries(&snapshot), 128);
    assert_buckets_sorted(&snapshot);

    let mut keys: Vec<u64> = snapshot
        .into_iter()
        .flat_map(|(_, bucket)| bucket)
        .map(|(key, value, _)| {
            assert_eq!(value, key * 10);
            key
        })
        .collect();
    keys.sort_unstable();
    assert_eq!(keys, (0..128).collect::<Vec<_>>());
}

#[test]
fn approximate_load_tracks_count() {
    let table = HashTable::new();
    assert_eq!(table.approximate_load(), 0.0);

    for key in 0..64u64 {
        table.insert(key, key);
    }
    let load = table.approximate_load();
    assert!((load - 1.0).abs() < f64::EPSILON, "load {load}");
}

#[test]
fn reset_rebuilds_a_fresh_table() {
    let table = HashTable::new();
    for key in 0..500u64 {
        table.insert(key, key);
    }
    assert!(table.bucket_count() > MIN_BUCKETS);

    table.reset();

    assert!(table.is_empty());
    assert_eq!(table.bucket_count(), MIN_BUCKETS);
    assert!(!table.contains(&42));

    // The table is fully usable afterwards.
    assert!(table.insert(42, 42));
    assert!(table.contains(&42));
}

#[test]
fn debug_shows_live_entries() {
    let table = HashTable::new();
    table.insert(1, "a");
    let rendered = format!("{table:?}");
    assert!(rendered.contains("1"));
    assert!(rendered.contains("a"));
}
