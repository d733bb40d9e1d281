use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Mutex, OnceLock, PoisonError};

// An allocator for small, reusable thread ids.
//
// Ids of exited threads are handed back out, so the registry stays as dense
// as the peak live thread count and scans never walk abandoned records
// beyond that.
fn thread_ids() -> &'static Mutex<ThreadIds> {
    static THREAD_IDS: OnceLock<Mutex<ThreadIds>> = OnceLock::new();
    THREAD_IDS.get_or_init(Default::default)
}

#[derive(Default)]
struct ThreadIds {
    // The next id to hand out if the free list is empty.
    next: usize,
    // Returned ids, smallest first.
    free: BinaryHeap<Reverse<usize>>,
}

impl ThreadIds {
    fn alloc(&mut self) -> usize {
        match self.free.pop() {
            Some(Reverse(id)) => id,
            None => {
                let id = self.next;
                self.next += 1;
                id
            }
        }
    }

    fn free(&mut self, id: usize) {
        self.free.push(Reverse(id));
    }
}

// A thread id along with its position in the registry's bucket array.
//
// Bucket `b` holds `1 << b.saturating_sub(1)` entries, so the buckets cover
// ids 0, 1, 2..4, 4..8, and so on without ever moving an existing entry.
#[derive(Clone, Copy)]
pub struct Thread {
    pub id: usize,
    pub bucket: usize,
    pub bucket_size: usize,
    pub index: usize,
}

impl Thread {
    fn new(id: usize) -> Thread {
        let bucket = (usize::BITS - id.leading_zeros()) as usize;
        let bucket_size = 1 << bucket.saturating_sub(1);
        let index = id & (bucket_size - 1);

        Thread {
            id,
            bucket,
            bucket_size,
            index,
        }
    }
}

// Returns the current thread's id, allocating one on first use.
pub fn get() -> Thread {
    THREAD.with(|guard| guard.thread)
}

thread_local! {
    static THREAD: ThreadGuard = ThreadGuard {
        thread: Thread::new(
            thread_ids()
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .alloc(),
        ),
    };
}

// Returns the thread's id to the allocator on exit.
struct ThreadGuard {
    thread: Thread,
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        thread_ids()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free(self.thread.id);
    }
}

#[cfg(test)]
mod tests {
    use super::Thread;

    #[test]
    fn thread_positions() {
        let positions = [
            // (id, bucket, bucket_size, index)
            (0, 0, 1, 0),
            (1, 1, 1, 0),
            (2, 2, 2, 0),
            (3, 2, 2, 1),
            (4, 3, 4, 0),
            (7, 3, 4, 3),
            (8, 4, 8, 0),
            (15, 4, 8, 7),
        ];

        for (id, bucket, bucket_size, index) in positions {
            let thread = Thread::new(id);
            assert_eq!(thread.bucket, bucket);
            assert_eq!(thread.bucket_size, bucket_size);
            assert_eq!(thread.index, index);
        }
    }
}
