mod thread_id;

use super::raw::Record;
use super::utils::CachePadded;

use std::ptr;
use std::sync::atomic::{self, AtomicPtr, AtomicUsize, Ordering};

const SEGMENTS: usize = (usize::BITS + 1) as usize;

// The registry of per-thread hazard records.
//
// Records live in a fixed set of lazily allocated segments whose sizes
// double, so a record never moves once its segment exists and a `&Record`
// handed to a thread stays valid for the life of the registry. Thread ids
// index straight into the segments: id 0 lands in segment 0, and id `n`
// lands in segment `usize::BITS - n.leading_zeros()`.
//
// A hazard record is all atomics and its empty state protects nothing, so
// whole segments are built ready to use. Claiming a record is just flagging
// it for the thread count; scanners may read any record at any time,
// claimed or not.
pub struct Registry {
    segments: [AtomicPtr<CachePadded<Record>>; SEGMENTS],
    // The number of threads that have ever claimed a record.
    pub threads: AtomicUsize,
}

impl Registry {
    // Creates a registry with segments preallocated for `capacity` threads.
    pub fn with_capacity(capacity: usize) -> Registry {
        let mut segments: [*mut CachePadded<Record>; SEGMENTS] = [ptr::null_mut(); SEGMENTS];

        let mut size = 1;
        let mut covered = 0;
        for (i, segment) in segments.iter_mut().enumerate() {
            if covered >= capacity {
                break;
            }

            *segment = allocate_segment(size);
            covered += size;
            if i != 0 {
                size <<= 1;
            }
        }

        Registry {
            segments: segments.map(AtomicPtr::new),
            threads: AtomicUsize::new(0),
        }
    }

    // The calling thread's record, claimed on first use.
    pub fn get(&self) -> &Record {
        let thread = thread_id::get();
        let segment = self.segment(thread.bucket, thread.bucket_size);

        // safety: the segment holds `bucket_size` records and never moves
        let record = unsafe { &*segment.add(thread.index) };

        // A thread id belongs to one thread at a time and hands over
        // through the id allocator's lock, so the claim is uncontended.
        if !record.claimed.load(Ordering::Relaxed) {
            record.claimed.store(true, Ordering::Relaxed);
            self.threads.fetch_add(1, Ordering::Relaxed);

            // seqcst: synchronize with the fence in `scan`. Either the
            // scanner sees the new thread count and this record, or this
            // thread sees every pointer the scanner is about to reclaim.
            atomic::fence(Ordering::SeqCst);
        }

        record
    }

    // The segment at `index`, allocated on demand.
    fn segment(&self, index: usize, size: usize) -> *mut CachePadded<Record> {
        let segment = &self.segments[index];

        let ptr = segment.load(Ordering::Acquire);
        if !ptr.is_null() {
            return ptr;
        }

        let new = allocate_segment(size);
        match segment.compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => new,
            // A thread with a neighboring id allocated first; use theirs.
            Err(other) => unsafe {
                drop(Box::from_raw(ptr::slice_from_raw_parts_mut(new, size)));
                other
            },
        }
    }

    // Iterates every record in every allocated segment.
    //
    // Thread ids are reused, so a scan cannot stop at the thread count: a
    // claimed record may sit anywhere in the allocated range. Unclaimed
    // records only have empty slots and are harmless to visit.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            registry: self,
            segment: 0,
            size: 1,
            index: 0,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        let mut size = 1;

        for (i, segment) in self.segments.iter_mut().enumerate() {
            let ptr = *segment.get_mut();

            let len = size;
            if i != 0 {
                size <<= 1;
            }

            if ptr.is_null() {
                continue;
            }

            unsafe { drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len))) };
        }
    }
}

pub struct Iter<'a> {
    registry: &'a Registry,
    segment: usize,
    size: usize,
    index: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Record;

    fn next(&mut self) -> Option<&'a Record> {
        while self.segment < SEGMENTS {
            let segment = self.registry.segments[self.segment].load(Ordering::Acquire);

            if !segment.is_null() && self.index < self.size {
                // safety: allocated segments hold `self.size` records
                let record: &CachePadded<Record> = unsafe { &*segment.add(self.index) };
                self.index += 1;
                return Some(record);
            }

            if self.segment != 0 {
                self.size <<= 1;
            }
            self.segment += 1;
            self.index = 0;
        }

        None
    }
}

fn allocate_segment(size: usize) -> *mut CachePadded<Record> {
    let segment: Box<[CachePadded<Record>]> = (0..size).map(|_| Default::default()).collect();
    Box::into_raw(segment) as *mut _
}
