use super::cfg::trace;
use super::collector::Link;
use super::tls::Registry;

use std::cell::UnsafeCell;
use std::collections::HashSet;
use std::ptr;
use std::sync::atomic::{self, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

// The number of hazard slots in each thread's record.
//
// A traversal pins at most this many pointers at once; callers address the
// slots by index and decide what each one covers.
pub const SLOTS: usize = 4;

// Lock-free hazard-pointer reclamation.
//
// Every thread owns a record of hazard slots, registered once in a global
// registry and never freed. Before dereferencing a shared pointer a thread
// publishes it in one of its slots and re-reads the source to validate the
// publication. Unlinked values go onto a global retired list; once the list
// outgrows the worst-case number of protected pointers, the retiring thread
// scans all records and frees whatever nobody protects.
pub struct Collector {
    // Per-thread hazard records.
    pub(crate) records: Registry,
    // Head of the global retired list.
    retired: AtomicPtr<Node>,
    // Approximate length of the retired list.
    retired_count: AtomicUsize,
}

impl Collector {
    pub fn with_threads(threads: usize) -> Collector {
        Collector {
            records: Registry::with_capacity(threads),
            retired: AtomicPtr::new(ptr::null_mut()),
            retired_count: AtomicUsize::new(0),
        }
    }

    // The current thread's hazard record, claimed on first use.
    pub fn record(&self) -> &Record {
        self.records.get()
    }

    // Adds a value to the retired list, scanning if the list has outgrown
    // the reclamation threshold.
    //
    // # Safety
    //
    // `link` must point to a valid allocation that is unreachable from the
    // data structure, and must be retired at most once.
    pub unsafe fn add(&self, link: *mut Link, reclaim: unsafe fn(*mut Link)) {
        let node = unsafe { UnsafeCell::raw_get(ptr::addr_of_mut!((*link).node)) };

        // safety: the value is unreachable, so the retiring thread has
        // exclusive access to its node until it is pushed
        unsafe { (*node).reclaim = reclaim };
        self.push(node);

        let retired = self.retired_count.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("retired a value, {retired} pending");

        if retired > self.scan_threshold() {
            self.scan();
        }
    }

    // The retired-list length past which a scan pays off: twice the worst
    // case number of protected pointers across all registered threads.
    fn scan_threshold(&self) -> usize {
        2 * SLOTS * self.records.threads.load(Ordering::Relaxed).max(1)
    }

    fn push(&self, node: *mut Node) {
        let mut head = self.retired.load(Ordering::Relaxed);
        loop {
            // safety: until the push succeeds the node is owned by this
            // thread; afterwards it is owned by the list and `next` is only
            // read behind a successful detach
            unsafe { (*node).next = head };

            // release: publish the write to `next`
            match self
                .retired
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(found) => head = found,
            }
        }
    }

    // Frees every retired value that no hazard slot protects, pushing the
    // protected ones back for a later scan.
    pub fn scan(&self) {
        // seqcst: order the hazard reads below after any publication that
        // was validated against a source we are about to free. Pairs with
        // the fences in `Record::publish` and thread registration.
        atomic::fence(Ordering::SeqCst);

        let mut protected = HashSet::new();
        for record in self.records.iter() {
            for slot in record.slots.iter() {
                let ptr = slot.load(Ordering::Acquire);
                if !ptr.is_null() {
                    protected.insert(ptr as usize);
                }
            }
        }

        // acquire: the `next` writes of every pushed node
        let mut list = self.retired.swap(ptr::null_mut(), Ordering::AcqRel);

        let mut freed = 0;
        let mut kept = 0;
        while !list.is_null() {
            let node = list;

            // safety: the detached list is owned by this thread
            list = unsafe { (*node).next };

            if protected.contains(&(node as usize)) {
                self.push(node);
                kept += 1;
            } else {
                // safety: the value is unreachable and unprotected
                unsafe { ((*node).reclaim)(node.cast::<Link>()) };
                freed += 1;
            }
        }

        if freed > 0 {
            self.retired_count.fetch_sub(freed, Ordering::Relaxed);
        }

        trace!("scan freed {freed} values, kept {kept}");
        let _ = kept;
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        // safety: `&mut self` means no guard is live, so nothing on the
        // retired list is protected
        let mut list = *self.retired.get_mut();
        while !list.is_null() {
            let node = list;
            unsafe {
                list = (*node).next;
                ((*node).reclaim)(node.cast::<Link>());
            }
        }
    }
}

// The intrusive state embedded in every reclaimable allocation.
pub struct Node {
    // The next node in the retired list.
    next: *mut Node,
    // Frees the allocation this node is embedded in.
    reclaim: unsafe fn(*mut Link),
}

impl Node {
    pub(crate) fn new() -> Node {
        fn unretired(_: *mut Link) {}

        Node {
            next: ptr::null_mut(),
            reclaim: unretired,
        }
    }
}

// A single thread's hazard slots.
//
// Slots are written only by the owning thread and read by scanners. The
// empty record is meaningful on its own (null slots protect nothing), so
// records can sit in the registry fully built before any thread claims
// them.
pub struct Record {
    slots: [AtomicPtr<()>; SLOTS],
    // Set by the first thread to claim this record; see `Registry::get`.
    pub(crate) claimed: AtomicBool,
}

impl Default for Record {
    fn default() -> Record {
        Record {
            slots: [(); SLOTS].map(|()| AtomicPtr::new(ptr::null_mut())),
            claimed: AtomicBool::new(false),
        }
    }
}

impl Record {
    // Publishes `ptr` in the slot at `index`.
    #[inline]
    pub fn publish(&self, index: usize, ptr: *mut ()) {
        // release: the publication must be visible before the caller's
        // validating re-read of the source
        self.slots[index].store(ptr, Ordering::Release);

        // seqcst: order the publication before the re-read. Pairs with the
        // fence in `scan`: either the scanner sees this slot, or this thread
        // sees the source change that unlinked the value.
        atomic::fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self, index: usize) {
        self.slots[index].store(ptr::null_mut(), Ordering::Release);
    }

    pub fn clear_all(&self) {
        for slot in self.slots.iter() {
            slot.store(ptr::null_mut(), Ordering::Release);
        }
    }
}
