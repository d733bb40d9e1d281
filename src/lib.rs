//! A dynamic, lock-free hash table with hazard-pointer memory reclamation.

mod hazard;
mod map;
mod raw;

#[cfg(feature = "serde")]
mod serde_impls;

pub use map::{HashTable, Snapshot};
