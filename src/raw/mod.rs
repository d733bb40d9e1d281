mod tagged;

use self::tagged::{AtomicTagPtr, TagPtr};
use crate::hazard::{reclaim, trace, AsLink, Collector, Guard, Link};

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::hint;
use std::marker::PhantomData;
use std::sync::atomic::{self, AtomicBool, AtomicIsize, AtomicPtr, Ordering};

/// The initial, and minimum, number of buckets.
pub const MIN_BUCKETS: usize = 64;

// Load factors that trigger a resize.
const UPPER_LOAD: f64 = 2.0;
const LOWER_LOAD: f64 = 0.25;

// Hazard slot assignments for a chain traversal: the active bucket array,
// plus the prev/curr/next window of the walk.
const ARRAY: usize = 0;
const PREV: usize = 1;
const CURR: usize = 2;
const NEXT: usize = 3;

// The traversal window must fit in a hazard record.
const _: () = assert!(NEXT < crate::hazard::SLOTS);

// A lock-free hash table of ordered bucket chains.
//
// Buckets are singly-linked lists sorted by key. Every link is a tagged
// word carrying a deletion mark and an ABA tag; removal marks a node's own
// next-link first (the linearization point) and unlinks it second, with any
// later traverser finishing unlinks the remover lost. Replaced bucket
// arrays and unlinked nodes are freed through hazard-pointer reclamation.
pub struct HashTable<K, V, S> {
    // The active bucket array.
    array: AtomicPtr<BucketArray<K, V>>,
    // Approximate number of live entries.
    count: AtomicIsize,
    // Set while a thread is resizing; losers of the flag return immediately.
    resizing: AtomicBool,
    collector: Collector,
    build_hasher: S,
    _kv: PhantomData<(K, V)>,
}

// An entry in a bucket chain.
#[repr(C)]
pub struct Node<K, V> {
    pub link: Link,
    pub key: K,
    pub value: V,
    pub next: AtomicTagPtr<Node<K, V>>,
}

// Safety: `Link` is the first field of the `#[repr(C)]` layout.
unsafe impl<K, V> AsLink for Node<K, V> {}

impl<K, V> Node<K, V> {
    fn boxed(key: K, value: V) -> *mut Node<K, V> {
        Box::into_raw(Box::new(Node {
            link: Link::new(),
            key,
            value,
            next: AtomicTagPtr::null(),
        }))
    }
}

// A fixed-size array of chain heads.
//
// The array knows nothing of resizing; it is replaced wholesale and handed
// to the collector once unlinked from the root.
#[repr(C)]
pub struct BucketArray<K, V> {
    pub link: Link,
    pub buckets: Box<[AtomicTagPtr<Node<K, V>>]>,
}

// Safety: `Link` is the first field of the `#[repr(C)]` layout.
unsafe impl<K, V> AsLink for BucketArray<K, V> {}

impl<K, V> BucketArray<K, V> {
    fn alloc(len: usize) -> *mut BucketArray<K, V> {
        Box::into_raw(Box::new(BucketArray {
            link: Link::new(),
            buckets: (0..len).map(|_| AtomicTagPtr::null()).collect(),
        }))
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

impl<K, V> Drop for BucketArray<K, V> {
    fn drop(&mut self) {
        // Chains are emptied before an array is retired; anything left is a
        // straggler copy that was linked after the purge and never retired.
        for head in self.buckets.iter() {
            let mut curr = head.load(Ordering::Relaxed).ptr();
            while !curr.is_null() {
                // safety: `&mut self` means no thread can reach these nodes
                let node = unsafe { Box::from_raw(curr) };
                curr = node.next.load(Ordering::Relaxed).ptr();
            }
        }
    }
}

// The result of a chain search.
//
// On return the PREV slot covers the node holding `prev` (unless `prev` is
// a head link in the pinned array) and the CURR slot covers `curr`, so the
// caller may act on both.
struct FindResult<K, V> {
    // The link whose target is `curr`.
    prev: *const AtomicTagPtr<Node<K, V>>,
    // The first node with a key not below the searched key, or null.
    curr: *mut Node<K, V>,
}

impl<K, V, S> HashTable<K, V, S> {
    pub fn with_hasher(build_hasher: S) -> HashTable<K, V, S> {
        HashTable {
            array: AtomicPtr::new(BucketArray::alloc(MIN_BUCKETS)),
            count: AtomicIsize::new(0),
            resizing: AtomicBool::new(false),
            collector: Collector::new(),
            build_hasher,
            _kv: PhantomData,
        }
    }

    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    // The approximate number of live entries.
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<K, V, S> HashTable<K, V, S>
where
    K: Clone + Hash + Ord + Send + Sync,
    V: Clone + Send + Sync,
    S: BuildHasher,
{
    pub fn insert(&self, key: K, value: V, guard: &Guard<'_>) -> bool {
        let new = Node::boxed(key, value);

        loop {
            let array_ptr = self.protect_array(guard);
            // safety: pinned by the ARRAY slot
            let array = unsafe { &*array_ptr };

            if !self.link_node(array, new, guard) {
                // The key is present. Trust the observation only if it came
                // from an array that is still the root.
                if self.array.load(Ordering::Acquire) == array_ptr {
                    // safety: the node was never linked
                    unsafe { drop(Box::from_raw(new)) };
                    return false;
                }
                continue;
            }

            let count = self.count.fetch_add(1, Ordering::Relaxed) + 1;
            let len = array.len();

            // The link may have landed in an array whose drain had already
            // passed this bucket; re-apply against the new root if it moved.
            if self.must_reapply(array_ptr) {
                // safety: the linked node is still covered by the NEXT slot
                let (key, value) = unsafe { ((*new).key.clone(), (*new).value.clone()) };
                self.reapply_insert(key, value, guard);
            }

            self.maybe_grow(array_ptr, len, count, guard);
            return true;
        }
    }

    pub fn remove<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        loop {
            let array_ptr = self.protect_array(guard);
            // safety: pinned by the ARRAY slot
            let array = unsafe { &*array_ptr };
            let idx = self.bucket_index(key, array.len());
            let found = self.find_bucket(array, idx, key, guard);

            // safety: `found.curr` is covered by the CURR slot
            if found.curr.is_null() || unsafe { (*found.curr).key.borrow() != key } {
                if self.array.load(Ordering::Acquire) == array_ptr {
                    return false;
                }
                continue;
            }

            let curr = found.curr;
            // safety: covered by the CURR slot
            let curr_ref = unsafe { &*curr };

            let next_word = curr_ref.next.load(Ordering::Acquire);
            if next_word.mark() {
                // A racing remover beat us to the mark; re-examine.
                continue;
            }

            // Logical deletion: the linearization point of the remove.
            let marked = next_word.advance(next_word.ptr(), true);
            if curr_ref
                .next
                .compare_exchange(next_word, marked, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }

            let count = self.count.fetch_sub(1, Ordering::Relaxed) - 1;

            // Physical unlink is best-effort; a failure leaves the node to
            // the next traverser through this position.
            // safety: `found.prev` targets the pinned array or a node
            // covered by the PREV slot
            let expected = unsafe { (*found.prev).load(Ordering::Acquire) };
            if !expected.mark() && expected.ptr() == curr {
                let desired = expected.advance(next_word.ptr(), false);
                if unsafe {
                    (*found.prev).compare_exchange(
                        expected,
                        desired,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                }
                .is_ok()
                {
                    // safety: unlinked by this CAS
                    unsafe { guard.retire(curr, reclaim::boxed::<Node<K, V>>) };
                }
            }

            let len = array.len();

            // The node may have been drained into a replacement array before
            // the mark took effect, leaving a live copy behind.
            if self.must_reapply(array_ptr) {
                self.reapply_remove(key, guard);
            }

            self.maybe_shrink(array_ptr, len, count, guard);
            return true;
        }
    }

    pub fn contains<Q>(&self, key: &Q, guard: &Guard<'_>) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        loop {
            let array_ptr = self.protect_array(guard);
            // safety: pinned by the ARRAY slot
            let array = unsafe { &*array_ptr };
            let idx = self.bucket_index(key, array.len());
            let found = self.find_bucket(array, idx, key, guard);

            // safety: `found.curr` is covered by the CURR slot
            let present = !found.curr.is_null() && unsafe { (*found.curr).key.borrow() == key };

            if self.array.load(Ordering::Acquire) == array_ptr {
                return present;
            }
        }
    }

    // A non-linearized, read-only view of every bucket: `(key, value,
    // logically deleted)` per entry, in chain order.
    pub fn snapshot(&self, guard: &Guard<'_>) -> Vec<(usize, Vec<(K, V, bool)>)> {
        let array_ptr = self.protect_array(guard);
        // safety: pinned by the ARRAY slot for the whole walk
        let array = unsafe { &*array_ptr };

        (0..array.len())
            .map(|idx| (idx, self.snapshot_bucket(array, idx, guard)))
            .collect()
    }

    pub fn bucket_count(&self, guard: &Guard<'_>) -> usize {
        let array = self.protect_array(guard);
        // safety: pinned by the ARRAY slot
        unsafe { (*array).len() }
    }

    pub fn approximate_load(&self, guard: &Guard<'_>) -> f64 {
        let array = self.protect_array(guard);
        // safety: pinned by the ARRAY slot
        let len = unsafe { (*array).len() };
        self.len() as f64 / len as f64
    }

    // Replaces the table with a fresh `MIN_BUCKETS` array, retiring the old
    // one.
    //
    // This is a harness convenience, not a fast-path operation: it waits
    // out any in-flight resize.
    pub fn reset(&self, guard: &Guard<'_>) {
        while self.resizing.swap(true, Ordering::AcqRel) {
            hint::spin_loop();
        }

        let fresh = BucketArray::alloc(MIN_BUCKETS);
        let old_ptr = self.array.swap(fresh, Ordering::AcqRel);
        self.count.store(0, Ordering::Relaxed);

        // safety: the flag serializes root transitions, so nobody else can
        // retire `old_ptr`
        let old = unsafe { &*old_ptr };
        self.purge(old, guard);
        // safety: unlinked from the root above, retired exactly once here
        unsafe { guard.retire(old_ptr, reclaim::boxed::<BucketArray<K, V>>) };

        self.resizing.store(false, Ordering::Release);
    }

    // Decides whether a write that was CAS-ed into `array` must be applied
    // again: a drain may already have passed the write's bucket, so the
    // write is final only once no resize of `array` is in flight. Waits out
    // an active resize, then reports whether the root moved.
    //
    // If the root still equals `array` with the flag clear, any later
    // resize starts its drain after this point and will observe the write.
    fn must_reapply(&self, array: *mut BucketArray<K, V>) -> bool {
        // seqcst: order the preceding link CAS before the flag read below.
        // Pairs with the fence in `try_resize`: if this thread reads the
        // flag as clear, its write is visible to the next drain.
        atomic::fence(Ordering::SeqCst);

        loop {
            if self.array.load(Ordering::Acquire) != array {
                return true;
            }
            if !self.resizing.load(Ordering::Acquire) {
                return self.array.load(Ordering::Acquire) != array;
            }
            hint::spin_loop();
        }
    }

    // Pins the active bucket array in the ARRAY slot.
    fn protect_array(&self, guard: &Guard<'_>) -> *mut BucketArray<K, V> {
        loop {
            let array = self.array.load(Ordering::Acquire);
            guard.publish(ARRAY, array);
            if self.array.load(Ordering::Acquire) == array {
                return array;
            }
        }
    }

    fn bucket_index<Q>(&self, key: &Q, len: usize) -> usize
    where
        Q: Hash + ?Sized,
    {
        self.build_hasher.hash_one(key) as usize % len
    }

    // Walks the chain at `idx` up to the first node with `node.key >= key`,
    // unlinking any marked node encountered along the way.
    //
    // Each hazard publication is validated by re-reading the link the
    // pointer was loaded from; a mismatch, or any interference with an
    // unlink, restarts the walk from the bucket head, because the chain
    // underneath may have been folded.
    fn find_bucket<Q>(
        &self,
        array: &BucketArray<K, V>,
        idx: usize,
        key: &Q,
        guard: &Guard<'_>,
    ) -> FindResult<K, V>
    where
        K: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        'restart: loop {
            // The head link lives in the pinned array and needs no hazard.
            guard.clear(PREV);
            let mut prev: *const AtomicTagPtr<Node<K, V>> = &array.buckets[idx];

            // safety: `prev` points into the pinned array
            let mut curr_word = unsafe { (*prev).load(Ordering::Acquire) };
            guard.publish(CURR, curr_word.ptr());
            if unsafe { (*prev).load(Ordering::Acquire) } != curr_word {
                continue 'restart;
            }

            loop {
                let curr = curr_word.ptr();
                if curr.is_null() {
                    return FindResult { prev, curr };
                }

                // safety: validated against `prev` under the CURR slot
                let curr_ref = unsafe { &*curr };

                let next_word = curr_ref.next.load(Ordering::Acquire);
                guard.publish(NEXT, next_word.ptr());
                if curr_ref.next.load(Ordering::Acquire) != next_word {
                    continue 'restart;
                }

                if next_word.mark() {
                    // `curr` is logically deleted: unlink it on the way by.
                    // safety: see `prev` above
                    let expected = unsafe { (*prev).load(Ordering::Acquire) };
                    if expected.mark() || expected.ptr() != curr {
                        continue 'restart;
                    }

                    let desired = expected.advance(next_word.ptr(), false);
                    if unsafe {
                        (*prev).compare_exchange(
                            expected,
                            desired,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                    }
                    .is_err()
                    {
                        continue 'restart;
                    }

                    // Winning the unlink owns the retirement.
                    // safety: `curr` is no longer reachable from the chain
                    unsafe { guard.retire(curr, reclaim::boxed::<Node<K, V>>) };

                    guard.publish(CURR, next_word.ptr());
                    if unsafe { (*prev).load(Ordering::Acquire) } != desired {
                        continue 'restart;
                    }

                    curr_word = desired;
                    continue;
                }

                if curr_ref.key.borrow() >= key {
                    return FindResult { prev, curr };
                }

                // Advance, rotating the hazard window forward.
                guard.publish(PREV, curr);
                prev = &curr_ref.next;
                curr_word = next_word;
                guard.publish(CURR, curr_word.ptr());
                // safety: `prev` targets a node covered by the PREV slot
                if unsafe { (*prev).load(Ordering::Acquire) } != next_word {
                    continue 'restart;
                }
            }
        }
    }

    // Links `new` in key order into a chain of `array`, retrying on CAS
    // interference. Returns false, leaving `new` untouched, if the key is
    // already present.
    //
    // After a successful link the NEXT slot still covers `new`.
    fn link_node(
        &self,
        array: &BucketArray<K, V>,
        new: *mut Node<K, V>,
        guard: &Guard<'_>,
    ) -> bool {
        loop {
            // safety: `new` is exclusively ours until linked
            let key_ref = unsafe { &(*new).key };
            let idx = self.bucket_index(key_ref, array.len());
            let found = self.find_bucket(array, idx, key_ref, guard);

            if !found.curr.is_null() {
                // safety: `found.curr` is covered by the CURR slot
                if unsafe { (*found.curr).key == *key_ref } {
                    return false;
                }
            }

            // safety: `found.prev` targets the pinned array or a node
            // covered by the PREV slot
            let prev = unsafe { &*found.prev };
            let expected = prev.load(Ordering::Acquire);
            if expected.mark() || expected.ptr() != found.curr {
                continue;
            }

            // The link CAS below releases this write.
            // safety: `new` is still exclusively ours
            unsafe {
                (*new)
                    .next
                    .store(TagPtr::pack(found.curr, false, 0), Ordering::Relaxed)
            };

            // Keep the node readable after it is linked and shared.
            guard.publish(NEXT, new);

            let desired = expected.advance(new, false);
            if prev
                .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    // Re-runs an insert whose link landed in an array that was being
    // replaced, until it has been applied against a stable root.
    fn reapply_insert(&self, key: K, value: V, guard: &Guard<'_>) {
        let mut new = Node::boxed(key, value);

        loop {
            let array_ptr = self.protect_array(guard);
            // safety: pinned by the ARRAY slot
            let array = unsafe { &*array_ptr };
            let linked = self.link_node(array, new, guard);

            if !self.must_reapply(array_ptr) {
                if !linked {
                    // Already drained into this array.
                    // safety: the node was never linked
                    unsafe { drop(Box::from_raw(new)) };
                }
                return;
            }

            if linked {
                // Landed in yet another retiring array; go again with a
                // fresh copy. No count change either way: the original
                // insert already counted.
                // safety: the linked node is still covered by the NEXT slot
                let (key, value) = unsafe { ((*new).key.clone(), (*new).value.clone()) };
                new = Node::boxed(key, value);
            }
        }
    }

    // Re-runs a remove whose mark landed in an array that was being
    // replaced: the entry may live on as a copy in the new array.
    fn reapply_remove<Q>(&self, key: &Q, guard: &Guard<'_>)
    where
        K: Borrow<Q>,
        Q: Hash + Ord + ?Sized,
    {
        loop {
            let array_ptr = self.protect_array(guard);
            // safety: pinned by the ARRAY slot
            let array = unsafe { &*array_ptr };
            let idx = self.bucket_index(key, array.len());
            let found = self.find_bucket(array, idx, key, guard);

            // safety: `found.curr` is covered by the CURR slot
            if found.curr.is_null() || unsafe { (*found.curr).key.borrow() != key } {
                if !self.must_reapply(array_ptr) {
                    return;
                }
                continue;
            }

            // safety: covered by the CURR slot
            let curr_ref = unsafe { &*found.curr };
            let next_word = curr_ref.next.load(Ordering::Acquire);

            if !next_word.mark() {
                // The copy is the same logical entry the original mark
                // already counted, so the count is untouched here.
                let marked = next_word.advance(next_word.ptr(), true);
                if curr_ref
                    .next
                    .compare_exchange(next_word, marked, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }

                // safety: as in `remove`
                let expected = unsafe { (*found.prev).load(Ordering::Acquire) };
                if !expected.mark() && expected.ptr() == found.curr {
                    let desired = expected.advance(next_word.ptr(), false);
                    if unsafe {
                        (*found.prev).compare_exchange(
                            expected,
                            desired,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                    }
                    .is_ok()
                    {
                        // safety: unlinked by this CAS
                        unsafe { guard.retire(found.curr, reclaim::boxed::<Node<K, V>>) };
                    }
                }
            }

            if !self.must_reapply(array_ptr) {
                return;
            }
        }
    }

    fn maybe_grow(
        &self,
        array: *mut BucketArray<K, V>,
        len: usize,
        count: isize,
        guard: &Guard<'_>,
    ) {
        if count.max(0) as f64 / len as f64 > UPPER_LOAD {
            self.try_resize(array, len * 2, guard);
        }
    }

    fn maybe_shrink(
        &self,
        array: *mut BucketArray<K, V>,
        len: usize,
        count: isize,
        guard: &Guard<'_>,
    ) {
        if count.max(0) as f64 / len as f64 >= LOWER_LOAD {
            return;
        }

        let target = (len / 2).max(MIN_BUCKETS);
        if target != len {
            self.try_resize(array, target, guard);
        }
    }

    // Replaces `old_ptr` with an array of `new_len` buckets.
    //
    // The winner of the `resizing` flag drains live entries into a fresh
    // array with ordered inserts, repeating until a full pass copies
    // nothing, then publishes the array. Mutators close the remaining
    // window themselves through `must_reapply`: a write that raced the
    // final pass is re-applied against the new root by the thread that made
    // it, which is the only thread that can tell a missed write from an
    // entry the new array has since legitimately dropped.
    fn try_resize(&self, old_ptr: *mut BucketArray<K, V>, new_len: usize, guard: &Guard<'_>) {
        // Best-effort: a concurrent resize means this trigger is dropped.
        if self.resizing.swap(true, Ordering::AcqRel) {
            return;
        }

        // seqcst: order the flag acquisition before the drain's chain
        // reads. Pairs with the fence in `must_reapply`: every write whose
        // owner saw the flag clear is visible to the drain below.
        atomic::fence(Ordering::SeqCst);

        // The trigger may be stale by the time the flag is won.
        if self.array.load(Ordering::Acquire) != old_ptr {
            self.resizing.store(false, Ordering::Release);
            return;
        }

        // safety: the flag serializes root transitions, so `old_ptr` stays
        // the root, and valid, until the publish below
        let old = unsafe { &*old_ptr };

        // A stale trigger can survive the races above; re-check the target.
        if old.len() == new_len {
            self.resizing.store(false, Ordering::Release);
            return;
        }

        trace!("resizing from {} to {new_len} buckets", old.len());

        let new_ptr = BucketArray::alloc(new_len);
        // safety: private until published
        let new = unsafe { &*new_ptr };

        // Drain until a full pass finds nothing left to copy.
        while self.drain_into(old, new, guard) > 0 {}

        match self
            .array
            .compare_exchange(old_ptr, new_ptr, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                trace!("published the {new_len} bucket array");

                // Empty the old chains through the usual unlink discipline
                // and hand the array to the collector.
                self.purge(old, guard);
                // safety: unlinked from the root, retired exactly once
                unsafe { guard.retire(old_ptr, reclaim::boxed::<BucketArray<K, V>>) };
            }
            Err(_) => {
                // Lost the publish; discard the private copy.
                // safety: `new_ptr` was never shared
                unsafe { drop(Box::from_raw(new_ptr)) };
            }
        }

        self.resizing.store(false, Ordering::Release);
    }

    // Copies every live entry of `old` that `new` does not already contain.
    // Returns the number of entries copied.
    fn drain_into(
        &self,
        old: &BucketArray<K, V>,
        new: &BucketArray<K, V>,
        guard: &Guard<'_>,
    ) -> usize {
        let mut copied = 0;

        for idx in 0..old.len() {
            // Clone the live entries out first: the walk and the ordered
            // inserts below share the same hazard slots.
            let live = self
                .snapshot_bucket(old, idx, guard)
                .into_iter()
                .filter(|(_, _, marked)| !marked)
                .map(|(key, value, _)| (key, value));

            for (key, value) in live {
                let node = Node::boxed(key, value);
                if self.link_node(new, node, guard) {
                    copied += 1;
                } else {
                    // safety: the node was never linked
                    unsafe { drop(Box::from_raw(node)) };
                }
            }
        }

        copied
    }

    // Clones out one bucket's `(key, value, marked)` entries in chain
    // order, restarting whenever a hazard validation fails.
    fn snapshot_bucket(
        &self,
        array: &BucketArray<K, V>,
        idx: usize,
        guard: &Guard<'_>,
    ) -> Vec<(K, V, bool)> {
        'restart: loop {
            let mut entries = Vec::new();
            let head = &array.buckets[idx];

            let mut curr_word = head.load(Ordering::Acquire);
            guard.publish(CURR, curr_word.ptr());
            if head.load(Ordering::Acquire) != curr_word {
                continue 'restart;
            }

            while !curr_word.is_null() {
                // safety: covered by the CURR slot
                let curr_ref = unsafe { &*curr_word.ptr() };

                let next_word = curr_ref.next.load(Ordering::Acquire);
                guard.publish(NEXT, next_word.ptr());
                if curr_ref.next.load(Ordering::Acquire) != next_word {
                    continue 'restart;
                }

                entries.push((
                    curr_ref.key.clone(),
                    curr_ref.value.clone(),
                    next_word.mark(),
                ));

                guard.publish(CURR, next_word.ptr());
                if curr_ref.next.load(Ordering::Acquire) != next_word {
                    continue 'restart;
                }
                curr_word = next_word;
            }

            return entries;
        }
    }

    // Empties every chain of a replaced array so that each node is retired
    // exactly once, through the same mark-then-unlink discipline as a
    // remove. Straggling traversers may win individual unlinks; whoever
    // wins the unlink owns the retirement.
    fn purge(&self, old: &BucketArray<K, V>, guard: &Guard<'_>) {
        for idx in 0..old.len() {
            let head = &old.buckets[idx];

            loop {
                let head_word = head.load(Ordering::Acquire);
                let curr = head_word.ptr();
                if curr.is_null() {
                    break;
                }

                guard.publish(CURR, curr);
                if head.load(Ordering::Acquire) != head_word {
                    continue;
                }

                // safety: covered by the CURR slot
                let curr_ref = unsafe { &*curr };
                let mut next_word = curr_ref.next.load(Ordering::Acquire);
                guard.publish(NEXT, next_word.ptr());
                if curr_ref.next.load(Ordering::Acquire) != next_word {
                    continue;
                }

                if !next_word.mark() {
                    // The leftover's copy, if any, lives on in the active
                    // array, so the count is untouched.
                    let marked = next_word.advance(next_word.ptr(), true);
                    match curr_ref.next.compare_exchange(
                        next_word,
                        marked,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => next_word = marked,
                        Err(_) => continue,
                    }
                }

                let desired = head_word.advance(next_word.ptr(), false);
                if head
                    .compare_exchange(head_word, desired, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    // safety: unlinked by this CAS
                    unsafe { guard.retire(curr, reclaim::boxed::<Node<K, V>>) };
                }
            }
        }
    }
}

impl<K, V, S> Drop for HashTable<K, V, S> {
    fn drop(&mut self) {
        // safety: `&mut self` means no operation is in flight; everything
        // already retired is drained when the collector drops after this
        unsafe { drop(Box::from_raw(*self.array.get_mut())) };
    }
}
