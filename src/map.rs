use crate::raw;

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// A read-only view of a table's buckets, assembled by [`HashTable::snapshot`].
///
/// Each element is a bucket index paired with the bucket's entries in chain
/// order; an entry is `(key, value, logically deleted)`. The view is not
/// linearized: it tolerates concurrent mutation and may include entries
/// whose deletion is still in flight.
pub type Snapshot<K, V> = Vec<(usize, Vec<(K, V, bool)>)>;

/// A dynamic, lock-free hash table.
///
/// The table supports concurrent insertion, removal and membership queries
/// from any number of threads. Buckets are ordered linked lists in the style
/// of Michael's lock-free list-based sets; the table grows and shrinks
/// automatically with load, and memory is reclaimed through hazard pointers
/// once no thread can still observe it.
///
/// No operation blocks on a lock along its fast path. Progress is lock-free
/// rather than wait-free: some thread always completes, but an individual
/// operation may retry under contention.
///
/// A key binds at most one value: inserting a key that is already present
/// returns `false` and leaves the existing value in place.
///
/// # Examples
///
/// ```
/// use quince::HashTable;
///
/// let table = HashTable::new();
///
/// assert!(table.insert(1, "a"));
/// assert!(!table.insert(1, "b"));
/// assert!(table.contains(&1));
/// assert!(table.remove(&1));
/// assert!(!table.contains(&1));
/// ```
pub struct HashTable<K, V, S = RandomState> {
    raw: raw::HashTable<K, V, S>,
}

// Safety: the table hands out keys and values by clone only, never by
// reference, but any thread operating on a shared table may free entries
// created by another thread, so both types must be fully thread-safe.
unsafe impl<K: Send, V: Send, S: Send> Send for HashTable<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for HashTable<K, V, S> {}

impl<K, V> HashTable<K, V> {
    /// Creates an empty table with [`MIN_BUCKETS`](Self::MIN_BUCKETS)
    /// buckets.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    /// let table: HashTable<u64, &str> = HashTable::new();
    /// ```
    pub fn new() -> HashTable<K, V> {
        HashTable::with_hasher(RandomState::new())
    }
}

impl<K, V, S> HashTable<K, V, S> {
    /// The initial bucket count; the table never shrinks below it.
    pub const MIN_BUCKETS: usize = raw::MIN_BUCKETS;

    /// Creates an empty table which will use the given hash builder to hash
    /// keys.
    ///
    /// Warning: `build_hasher` is normally randomly generated, making the
    /// table resistant to attacks that cause many collisions and very poor
    /// performance. Setting it manually can expose a DoS attack vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    /// use std::collections::hash_map::RandomState;
    ///
    /// let table: HashTable<u64, u64, _> = HashTable::with_hasher(RandomState::new());
    /// ```
    pub fn with_hasher(build_hasher: S) -> HashTable<K, V, S> {
        HashTable {
            raw: raw::HashTable::with_hasher(build_hasher),
        }
    }

    /// Returns the approximate number of live entries.
    ///
    /// The counter is maintained with relaxed updates and may lag behind
    /// in-flight operations.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.insert(1, "a");
    /// table.insert(2, "b");
    /// assert_eq!(table.len(), 2);
    /// ```
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V, S> Default for HashTable<K, V, S>
where
    S: Default,
{
    fn default() -> Self {
        HashTable::with_hasher(S::default())
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Clone + Hash + Ord + Send + Sync,
    V: Clone + Send + Sync,
    S: BuildHasher,
{
    /// Inserts a key-value pair, returning `true` if the key was absent.
    ///
    /// If the key is already present the table is unchanged, the given
    /// value is dropped, and `false` is returned: the value bound by the
    /// first insert wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// assert!(table.insert(37, "a"));
    /// assert!(!table.insert(37, "b"));
    /// ```
    pub fn insert(&self, key: K, value: V) -> bool {
        let guard = self.raw.collector().enter();
        self.raw.insert(key, value, &guard)
    }

    /// Removes a key, returning `true` if it was present.
    ///
    /// The key may be any borrowed form of the table's key type, with
    /// matching [`Hash`] and [`Ord`] implementations.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.insert(1, "a");
    /// assert!(table.remove(&1));
    /// assert!(!table.remove(&1));
    /// ```
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let guard = self.raw.collector().enter();
        self.raw.remove(key, &guard)
    }

    /// Returns `true` if the table currently holds the key.
    ///
    /// The key may be any borrowed form of the table's key type, with
    /// matching [`Hash`] and [`Ord`] implementations.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.insert(String::from("a"), 1);
    /// assert!(table.contains("a"));
    /// assert!(!table.contains("b"));
    /// ```
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        let guard = self.raw.collector().enter();
        self.raw.contains(key, &guard)
    }

    /// Assembles a read-only view of every bucket for inspection.
    ///
    /// The view is built by walking the live table and is intended for
    /// visualization; see [`Snapshot`] for its shape and caveats.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.insert(1, "a");
    ///
    /// let entries: usize = table
    ///     .snapshot()
    ///     .iter()
    ///     .map(|(_, bucket)| bucket.len())
    ///     .sum();
    /// assert_eq!(entries, 1);
    /// ```
    pub fn snapshot(&self) -> Snapshot<K, V> {
        let guard = self.raw.collector().enter();
        self.raw.snapshot(&guard)
    }

    /// Returns the number of buckets in the active array.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table: HashTable<u64, u64> = HashTable::new();
    /// assert_eq!(table.bucket_count(), HashTable::<u64, u64>::MIN_BUCKETS);
    /// ```
    pub fn bucket_count(&self) -> usize {
        let guard = self.raw.collector().enter();
        self.raw.bucket_count(&guard)
    }

    /// Returns the current load factor: live entries per bucket.
    ///
    /// Like [`len`](Self::len), the value is approximate and may lag under
    /// contention.
    pub fn approximate_load(&self) -> f64 {
        let guard = self.raw.collector().enter();
        self.raw.approximate_load(&guard)
    }

    /// Clears the table, rebuilding a fresh array of
    /// [`MIN_BUCKETS`](Self::MIN_BUCKETS) buckets and retiring the old one.
    ///
    /// Unlike the other operations, `reset` waits out an in-flight resize
    /// before swapping in the fresh array.
    ///
    /// # Examples
    ///
    /// ```
    /// use quince::HashTable;
    ///
    /// let table = HashTable::new();
    /// table.insert(1, "a");
    /// table.reset();
    /// assert!(table.is_empty());
    /// assert!(!table.contains(&1));
    /// ```
    pub fn reset(&self) {
        let guard = self.raw.collector().enter();
        self.raw.reset(&guard)
    }
}

impl<K, V, S> fmt::Debug for HashTable<K, V, S>
where
    K: Clone + Hash + Ord + Send + Sync + fmt::Debug,
    V: Clone + Send + Sync + fmt::Debug,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (_, bucket) in self.snapshot() {
            for (key, value, marked) in bucket {
                if !marked {
                    map.entry(&key, &value);
                }
            }
        }
        map.finish()
    }
}
