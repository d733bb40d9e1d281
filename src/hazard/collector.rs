use super::raw;

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;

/// Hazard-pointer based safe memory reclamation.
///
/// A `Collector` owns the per-thread hazard records and the global retired
/// list. Threads obtain a [`Guard`] to publish hazard pointers, and retire
/// unlinked values through [`Collector::retire`]; a retired value is freed by
/// the first scan that finds it in no hazard slot.
pub struct Collector {
    raw: raw::Collector,
}

impl Collector {
    /// Creates a new collector.
    pub fn new() -> Self {
        Collector {
            raw: raw::Collector::with_threads(num_cpus::get()),
        }
    }

    /// Registers the current thread and returns a guard over its hazard
    /// slots. All slots are cleared when the guard is dropped.
    ///
    /// A guard has exclusive use of the thread's slots, so guards must not
    /// be nested on the same thread.
    pub fn enter(&self) -> Guard<'_> {
        Guard {
            collector: &self.raw,
            record: self.raw.record(),
            _not_send: PhantomData,
        }
    }

    /// Retires a value, running `reclaim` once no hazard slot references it.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid and unreachable to any thread that does not
    /// already hold a protected reference to it, `reclaim` must free the
    /// allocation it was created with, and a value must be retired at most
    /// once.
    pub unsafe fn retire<T: AsLink>(&self, ptr: *mut T, reclaim: unsafe fn(*mut Link)) {
        debug_assert!(!ptr.is_null(), "attempted to retire a null pointer");

        // safety: `T: AsLink` asserts the layout; the rest is guaranteed by
        // the caller
        unsafe { self.raw.add(ptr.cast::<Link>(), reclaim) }
    }
}

impl Default for Collector {
    fn default() -> Self {
        Collector::new()
    }
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector").finish_non_exhaustive()
    }
}

/// A registered thread's window onto its hazard slots.
///
/// Publishing a pointer only protects it after the caller re-reads the
/// atomic the pointer was loaded from and confirms it is unchanged; on a
/// mismatch the publication must be retried from the new value.
pub struct Guard<'a> {
    collector: &'a raw::Collector,
    record: &'a raw::Record,
    // Slots belong to the registering thread; the guard must stay on it.
    _not_send: PhantomData<*mut ()>,
}

impl Guard<'_> {
    /// Publishes `ptr` in the hazard slot at `index`.
    #[inline]
    pub fn publish<T>(&self, index: usize, ptr: *mut T) {
        self.record.publish(index, ptr.cast());
    }

    /// Empties the hazard slot at `index`.
    #[inline]
    pub fn clear(&self, index: usize) {
        self.record.clear(index);
    }

    /// Retires a value through the guard's collector.
    ///
    /// # Safety
    ///
    /// See [`Collector::retire`].
    pub unsafe fn retire<T: AsLink>(&self, ptr: *mut T, reclaim: unsafe fn(*mut Link)) {
        debug_assert!(!ptr.is_null(), "attempted to retire a null pointer");

        // safety: guaranteed by the caller
        unsafe { self.collector.add(ptr.cast::<Link>(), reclaim) }
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.record.clear_all();
    }
}

impl fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Guard").finish()
    }
}

/// The intrusive part of a reclaimable allocation.
///
/// Values managed by a [`Collector`] embed a `Link` as their first field and
/// assert the layout by implementing [`AsLink`].
#[repr(C)]
pub struct Link {
    pub(crate) node: UnsafeCell<raw::Node>,
}

impl Link {
    pub fn new() -> Link {
        Link {
            node: UnsafeCell::new(raw::Node::new()),
        }
    }
}

impl Default for Link {
    fn default() -> Self {
        Link::new()
    }
}

/// Marker for types that can be managed by a [`Collector`].
///
/// # Safety
///
/// The implementing type must be `#[repr(C)]` with a [`Link`] as its first
/// field, so a pointer to the value can be reinterpreted as a pointer to the
/// link.
pub unsafe trait AsLink {}
