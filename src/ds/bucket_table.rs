//! Two-level bucket storage for the collision table.
//!
//! The top level is a power-of-two array of buckets; each bucket is a small
//! fixed-width array of slot cells plus the mutex that serializes that
//! bucket's decay/swap and removal paths. Slot cells are `ArcSwapOption`s:
//! readers load them without locking, writers publish with compare-and-swap
//! and get the witness back, and displaced occupants are reclaimed safely
//! once the last reader drops its handle.
//!
//! ```text
//!   buckets: [ B0 ] [ B1 ] [ .. ] [ Bn-1 ]          (ArcSwapOption<Bucket>)
//!                │
//!                ▼
//!   Bucket { slots: [ s0 ] [ s1 ] .. [ sB-1 ],      (ArcSwapOption<T>)
//!            lock:  Mutex<()> }
//! ```
//!
//! With lazy initialization the top array starts all-empty; the first thread
//! to touch a bucket allocates it and CAS-publishes it, and losers adopt the
//! winner's bucket. A bucket, once published, is never replaced, so its
//! address doubles as a stable identity for the per-bucket lock.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::{Mutex, MutexGuard};

/// One fixed-width collision bucket: slot cells plus the bucket mutex.
pub struct Bucket<T> {
    slots: Box<[ArcSwapOption<T>]>,
    lock: Mutex<()>,
}

impl<T> Bucket<T> {
    fn new(width: usize) -> Self {
        Self {
            slots: (0..width).map(|_| ArcSwapOption::new(None)).collect(),
            lock: Mutex::new(()),
        }
    }

    /// Number of slots in this bucket.
    #[inline]
    pub fn width(&self) -> usize {
        self.slots.len()
    }

    /// Lock-free load of the slot at `index`.
    #[inline]
    pub fn slot(&self, index: usize) -> Option<Arc<T>> {
        self.slots[index].load_full()
    }

    /// Publishes `slot` into an empty cell.
    ///
    /// Returns `None` when the CAS won, or the current occupant when another
    /// writer got there first.
    pub fn publish(&self, index: usize, slot: Arc<T>) -> Option<Arc<T>> {
        let prev = self.slots[index].compare_and_swap(&None::<Arc<T>>, Some(slot));
        Option::clone(&prev)
    }

    /// Replaces `expected` with `slot` at `index`.
    ///
    /// Returns the witness: the occupant observed by the CAS. The swap took
    /// effect iff the witness is pointer-equal to `expected`.
    pub fn swap_slot(&self, index: usize, expected: &Arc<T>, slot: Arc<T>) -> Option<Arc<T>> {
        let prev = self.slots[index].compare_and_swap(expected, Some(slot));
        Option::clone(&prev)
    }

    /// Unconditional store. Only used on paths holding the bucket lock.
    #[inline]
    pub fn store(&self, index: usize, slot: Option<Arc<T>>) {
        self.slots[index].store(slot);
    }

    /// Atomically empties the slot and returns the previous occupant.
    #[inline]
    pub fn take(&self, index: usize) -> Option<Arc<T>> {
        self.slots[index].swap(None)
    }

    /// Acquires this bucket's mutex.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl<T> std::fmt::Debug for Bucket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bucket")
            .field("width", &self.width())
            .finish()
    }
}

/// The top-level bucket array, eagerly or lazily populated.
pub struct BucketTable<T> {
    buckets: Box<[ArcSwapOption<Bucket<T>>]>,
    width: usize,
    lazy: bool,
}

impl<T> BucketTable<T> {
    /// Allocates a table of `num_buckets` buckets of `width` slots each.
    ///
    /// Both dimensions must be powers of two so bucket resolution and
    /// counter offsets reduce to masks and shifts.
    pub fn new(num_buckets: usize, width: usize, lazy: bool) -> Self {
        debug_assert!(num_buckets.is_power_of_two());
        debug_assert!(width.is_power_of_two());
        let buckets: Box<[ArcSwapOption<Bucket<T>>]> = (0..num_buckets)
            .map(|_| {
                if lazy {
                    ArcSwapOption::new(None)
                } else {
                    ArcSwapOption::new(Some(Arc::new(Bucket::new(width))))
                }
            })
            .collect();
        Self {
            buckets,
            width,
            lazy,
        }
    }

    /// Number of top-level buckets.
    #[inline]
    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Slots per bucket.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// `true` if buckets are allocated on first touch.
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    /// Resolves the bucket at `index`, allocating it in lazy mode.
    ///
    /// Racing allocators CAS a fresh bucket into the empty cell; losers drop
    /// theirs and adopt the winner's so every caller sees the same identity.
    pub fn bucket(&self, index: usize) -> Arc<Bucket<T>> {
        if let Some(bucket) = self.buckets[index].load_full() {
            return bucket;
        }
        let fresh = Arc::new(Bucket::new(self.width));
        let witness = self.buckets[index]
            .compare_and_swap(&None::<Arc<Bucket<T>>>, Some(Arc::clone(&fresh)));
        match Option::clone(&witness) {
            Some(existing) => existing,
            None => fresh,
        }
    }

    /// Resolves the bucket at `index` without allocating.
    pub fn bucket_if_present(&self, index: usize) -> Option<Arc<Bucket<T>>> {
        self.buckets[index].load_full()
    }
}

impl<T> std::fmt::Debug for BucketTable<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketTable")
            .field("num_buckets", &self.buckets.len())
            .field("width", &self.width)
            .field("lazy", &self.lazy)
            .finish()
    }
}
