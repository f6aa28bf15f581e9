//! Cache engine: slot families and the code shared by both table shapes.
//!
//! The four cache flavors of the original design (packed/sparse, with and
//! without stored keys) collapse here into two structs crossed with two
//! *slot families*. A slot family decides what a slot physically holds and
//! how a key is matched against it:
//!
//! - [`KeyedSlots`] stores `(key, value)` entries and matches by key
//!   equality.
//! - [`ValueSlots`] stores values alone — the memory-saving shape — and
//!   matches with a caller-supplied `is_val_for_key` predicate.
//!
//! [`CacheCore`] carries everything the shapes share: the bucket table, the
//! counter array, hash resolution, the lock-free scan, and the full-scan
//! decay-and-swap plus the compacting left-shift used by removal.

pub mod packed;
pub mod sparse;

pub use packed::{PackedCache, PackedCollisionCache, PackedEntryCollisionCache};
pub use sparse::{SparseCache, SparseCollisionCache, SparseEntryCollisionCache};

use std::sync::Arc;

use crate::ds::bucket_table::{Bucket, BucketTable};
use crate::ds::log_counters::{LogCounters, MAX_COUNT};

pub(crate) type HashCoder<K> = Box<dyn Fn(&K) -> u64 + Send + Sync>;
pub(crate) type Loader<K, V> = Box<dyn Fn(&K) -> Option<V> + Send + Sync>;
pub(crate) type ValPredicate<K, V> = Box<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// A stored `(key, value)` entry for the keyed slot family.
pub struct KeyVal<K, V> {
    pub(crate) key: K,
    pub(crate) val: V,
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for KeyVal<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{:?}", self.key, self.val)
    }
}

/// What a bucket slot holds and how a key is matched against it.
///
/// Implementations are selected at build time; the engine is generic over
/// this seam instead of duplicating itself per shape.
pub trait SlotFamily<K, V>: Send + Sync {
    /// The physical slot payload.
    type Slot: Send + Sync;

    /// Builds the slot payload for an insertion.
    fn slot(&self, key: &K, val: V) -> Self::Slot;

    /// `true` if `slot` is the authoritative entry for `key`.
    fn is_for_key(&self, key: &K, slot: &Self::Slot) -> bool;

    /// Borrows the value out of a slot.
    fn value<'a>(&self, slot: &'a Self::Slot) -> &'a V;
}

/// Slot family that stores `(key, value)` entries.
pub struct KeyedSlots;

impl<K, V> SlotFamily<K, V> for KeyedSlots
where
    K: Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    type Slot = KeyVal<K, V>;

    fn slot(&self, key: &K, val: V) -> KeyVal<K, V> {
        KeyVal {
            key: key.clone(),
            val,
        }
    }

    fn is_for_key(&self, key: &K, slot: &KeyVal<K, V>) -> bool {
        *key == slot.key
    }

    fn value<'a>(&self, slot: &'a KeyVal<K, V>) -> &'a V {
        &slot.val
    }
}

/// Slot family that stores values alone and matches them with a predicate.
///
/// Not storing keys is the memory play of this cache design; the predicate
/// must be able to decide from the value alone whether it belongs to a key.
pub struct ValueSlots<K, V> {
    is_val_for_key: ValPredicate<K, V>,
}

impl<K, V> ValueSlots<K, V> {
    pub(crate) fn new(is_val_for_key: ValPredicate<K, V>) -> Self {
        Self { is_val_for_key }
    }
}

impl<K, V> SlotFamily<K, V> for ValueSlots<K, V>
where
    K: Send + Sync,
    V: Send + Sync,
{
    type Slot = V;

    fn slot(&self, _key: &K, val: V) -> V {
        val
    }

    fn is_for_key(&self, key: &K, slot: &V) -> bool {
        (self.is_val_for_key)(key, slot)
    }

    fn value<'a>(&self, slot: &'a V) -> &'a V {
        slot
    }
}

/// Outcome of a plain bucket scan.
pub(crate) enum Scan<V> {
    /// Matching slot found; its counter was bumped and its value cloned out.
    Hit(V),
    /// First empty slot, at this in-bucket index.
    EmptyAt(usize),
    /// Every slot is occupied by some other key.
    Full,
}

/// Outcome of a min-tracking bucket scan (used under the bucket lock).
pub(crate) enum MinScan<V> {
    Hit(V),
    /// First empty slot; `min_counter_index` covers the occupied prefix and
    /// `scanned_to` is one past the last counter examined.
    EmptyAt {
        index: usize,
        min_counter_index: usize,
        scanned_to: usize,
    },
    Full {
        min_counter_index: usize,
        scanned_to: usize,
    },
}

/// State and algorithms shared by the packed and sparse shapes.
pub(crate) struct CacheCore<K, V, F: SlotFamily<K, V>> {
    pub(crate) table: BucketTable<F::Slot>,
    pub(crate) counters: LogCounters,
    pub(crate) mask: u64,
    pub(crate) width_shift: u32,
    pub(crate) hash_coder: HashCoder<K>,
    pub(crate) family: F,
    pub(crate) loader: Option<Loader<K, V>>,
}

impl<K, V, F> CacheCore<K, V, F>
where
    F: SlotFamily<K, V>,
    V: Clone,
{
    /// Maps a key to its bucket and the bucket's base counter index.
    pub(crate) fn resolve(&self, key: &K) -> (Arc<Bucket<F::Slot>>, usize) {
        let hash = ((self.hash_coder)(key) & self.mask) as usize;
        (self.table.bucket(hash), hash << self.width_shift)
    }

    /// Scans a bucket for `key` with lock-free slot loads.
    ///
    /// Stops at the first empty slot; a hit bumps the slot's counter.
    pub(crate) fn scan(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        key: &K,
    ) -> Scan<V> {
        for index in 0..bucket.width() {
            match bucket.slot(index) {
                None => return Scan::EmptyAt(index),
                Some(slot) => {
                    if self.family.is_for_key(key, &slot) {
                        self.counters.increment(counter_offset + index);
                        return Scan::Hit(self.family.value(&slot).clone());
                    }
                }
            }
        }
        Scan::Full
    }

    /// Scans a bucket for `key` while tracking the minimum-count slot.
    ///
    /// Callers hold the bucket lock and use the minimum as the swap victim
    /// when no space is found.
    pub(crate) fn scan_tracking_min(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        key: &K,
    ) -> MinScan<V> {
        let width = bucket.width();
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        let mut index = 0;
        loop {
            match bucket.slot(index) {
                None => {
                    return MinScan::EmptyAt {
                        index,
                        min_counter_index,
                        scanned_to: counter_index,
                    };
                }
                Some(slot) => {
                    if self.family.is_for_key(key, &slot) {
                        self.counters.increment(counter_index);
                        return MinScan::Hit(self.family.value(&slot).clone());
                    }
                }
            }
            let count = self.counters.get(counter_index);
            if count < min_count {
                min_count = count;
                min_counter_index = counter_index;
            }
            counter_index += 1;
            index += 1;
            if index == width {
                return MinScan::Full {
                    min_counter_index,
                    scanned_to: counter_index,
                };
            }
        }
    }

    /// Returns the cached value for `key` without loading on a miss.
    pub(crate) fn get_if_present(&self, key: &K) -> Option<V> {
        let (bucket, counter_offset) = self.resolve(key);
        match self.scan(&bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(_) | Scan::Full => None,
        }
    }

    /// Replaces the value for `key` if an entry exists; never inserts.
    pub(crate) fn replace_existing(&self, key: &K, val: V) -> Option<V> {
        let (bucket, _) = self.resolve(key);
        let entry = Arc::new(self.family.slot(key, val));
        let mut index = 0;
        while index < bucket.width() {
            let collision = bucket.slot(index)?;
            if self.family.is_for_key(key, &collision) {
                let witness = bucket.swap_slot(index, &collision, Arc::clone(&entry));
                match witness {
                    Some(seen) if Arc::ptr_eq(&seen, &collision) => {
                        return Some(self.family.value(&entry).clone());
                    }
                    Some(seen) if self.family.is_for_key(key, &seen) => {
                        // Another thread raced to PUT; let it win.
                        return Some(self.family.value(&seen).clone());
                    }
                    _ => {}
                }
            }
            index += 1;
        }
        None
    }

    /// Halves every counter in the bucket and swaps `entry` into the
    /// least-frequently-used slot, seeding its counter.
    ///
    /// A zero count short-circuits: the entry lands there and only the
    /// remaining counters are halved.
    pub(crate) fn decay_and_swap(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        max_counter_index: usize,
        entry: Arc<F::Slot>,
    ) {
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        loop {
            let count = self.counters.get(counter_index);
            if count == 0 {
                bucket.store(counter_index - counter_offset, Some(entry));
                self.counters.initialize(counter_index);
                counter_index += 1;
                while counter_index < max_counter_index {
                    let count = self.counters.get(counter_index);
                    if count != 0 {
                        self.counters.set(counter_index, count >> 1);
                    }
                    counter_index += 1;
                }
                return;
            }
            // Counter hits may land between the load and this store.
            self.counters.set(counter_index, count >> 1);
            if count < min_count {
                min_count = count;
                min_counter_index = counter_index;
            }
            counter_index += 1;
            if counter_index == max_counter_index {
                break;
            }
        }
        bucket.store(min_counter_index - counter_offset, Some(entry));
        self.counters.initialize(min_counter_index);
    }

    /// Restores prefix-contiguity after the slot at `index` is vacated.
    ///
    /// Shifts each later occupant one position down and halves the counter
    /// of every vacated position. A concurrently observed empty successor is
    /// re-checked and back-filled with CAS so a racing speculative insert is
    /// either adopted into the hole or left where it landed.
    ///
    /// Callers hold the bucket lock.
    pub(crate) fn compact_left(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        index: usize,
    ) {
        let width = bucket.width();
        let mut index = index;
        let mut counter_index = counter_offset + index;
        let mut next_index = index + 1;
        loop {
            if next_index == width {
                bucket.store(index, None);
                return;
            }
            match bucket.slot(next_index) {
                None => {
                    bucket.store(index, None);
                    match bucket.slot(next_index) {
                        None => return,
                        Some(next) => {
                            if bucket.publish(index, next).is_some() {
                                // A racing writer claimed the hole; the
                                // prefix is whole again.
                                return;
                            }
                        }
                    }
                }
                Some(next) => bucket.store(index, Some(next)),
            }
            // Counter hits may land while entries shift down.
            counter_index += 1;
            let count = self.counters.get(counter_index);
            self.counters.set(counter_index - 1, count >> 1);
            index += 1;
            next_index += 1;
        }
    }

    /// Removes the entry for `key`, compacting the bucket behind it.
    ///
    /// `on_removed` runs once, before compaction, when a match is found;
    /// the sparse shape hooks its size decrement there.
    pub(crate) fn remove_entry(&self, key: &K, on_removed: impl FnOnce()) -> bool {
        let (bucket, counter_offset) = self.resolve(key);
        let _guard = bucket.lock();
        let mut index = 0;
        while index < bucket.width() {
            match bucket.slot(index) {
                None => return false,
                Some(collision) => {
                    if self.family.is_for_key(key, &collision) {
                        on_removed();
                        self.compact_left(&bucket, counter_offset, index);
                        return true;
                    }
                }
            }
            index += 1;
        }
        false
    }

    /// Runs the registered loader, or misses when none was configured.
    pub(crate) fn load_registered(&self, key: &K) -> Option<V> {
        self.loader.as_ref().and_then(|loader| loader(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed_core(
        num_buckets: usize,
        width: usize,
    ) -> CacheCore<u64, u64, KeyedSlots> {
        CacheCore {
            table: BucketTable::new(num_buckets, width, false),
            counters: LogCounters::new(num_buckets * width, 5, 1 << 20),
            mask: (num_buckets - 1) as u64,
            width_shift: width.trailing_zeros(),
            hash_coder: Box::new(|key: &u64| *key),
            family: KeyedSlots,
            loader: None,
        }
    }

    #[test]
    fn scan_reports_first_empty_then_full() {
        let core = keyed_core(1, 4);
        let bucket = core.table.bucket(0);
        assert!(matches!(core.scan(&bucket, 0, &9), Scan::EmptyAt(0)));

        for index in 0..4 {
            bucket.store(index, Some(Arc::new(core.family.slot(&(index as u64), 100))));
        }
        assert!(matches!(core.scan(&bucket, 0, &9), Scan::Full));
        assert!(matches!(core.scan(&bucket, 0, &2), Scan::Hit(100)));
    }

    #[test]
    fn scan_tracking_min_finds_the_coldest_slot() {
        let core = keyed_core(1, 4);
        let bucket = core.table.bucket(0);
        for index in 0..4 {
            bucket.store(index, Some(Arc::new(core.family.slot(&(index as u64), 0))));
        }
        core.counters.set(0, 9);
        core.counters.set(1, 4);
        core.counters.set(2, 1);
        core.counters.set(3, 6);
        match core.scan_tracking_min(&bucket, 0, &99) {
            MinScan::Full {
                min_counter_index,
                scanned_to,
            } => {
                assert_eq!(min_counter_index, 2);
                assert_eq!(scanned_to, 4);
            }
            _ => panic!("expected a full bucket"),
        }
    }

    #[test]
    fn decay_and_swap_prefers_a_zero_count_slot() {
        let core = keyed_core(1, 4);
        let bucket = core.table.bucket(0);
        for index in 0..4 {
            bucket.store(index, Some(Arc::new(core.family.slot(&(index as u64), 0))));
            core.counters.set(index, 8);
        }
        core.counters.set(1, 0);

        core.decay_and_swap(&bucket, 0, 4, Arc::new(core.family.slot(&42, 7)));
        let slot = bucket.slot(1).unwrap();
        assert_eq!(slot.key, 42);
        assert_eq!(core.counters.get(1), 5, "installed slot gets initial count");
        // Every other position in the bucket is halved.
        assert_eq!(core.counters.get(0), 4);
        assert_eq!(core.counters.get(2), 4);
        assert_eq!(core.counters.get(3), 4);
    }

    #[test]
    fn decay_and_swap_evicts_the_minimum_when_no_zero_exists() {
        let core = keyed_core(1, 4);
        let bucket = core.table.bucket(0);
        for index in 0..4 {
            bucket.store(index, Some(Arc::new(core.family.slot(&(index as u64), 0))));
        }
        core.counters.set(0, 8);
        core.counters.set(1, 6);
        core.counters.set(2, 2);
        core.counters.set(3, 6);

        core.decay_and_swap(&bucket, 0, 4, Arc::new(core.family.slot(&42, 7)));
        assert_eq!(bucket.slot(2).unwrap().key, 42);
        assert_eq!(core.counters.get(2), 5);
        assert_eq!(core.counters.get(0), 4);
        assert_eq!(core.counters.get(1), 3);
        assert_eq!(core.counters.get(3), 3);
    }

    #[test]
    fn compact_left_shifts_entries_and_counters() {
        let core = keyed_core(1, 4);
        let bucket = core.table.bucket(0);
        for index in 0..4 {
            bucket.store(index, Some(Arc::new(core.family.slot(&(index as u64), 0))));
            core.counters.set(index, (index as u8 + 1) * 2);
        }

        // Vacate index 1 and compact behind it.
        core.compact_left(&bucket, 0, 1);
        assert_eq!(bucket.slot(0).unwrap().key, 0);
        assert_eq!(bucket.slot(1).unwrap().key, 2);
        assert_eq!(bucket.slot(2).unwrap().key, 3);
        assert!(bucket.slot(3).is_none());
        // Shifted positions carry halved counters.
        assert_eq!(core.counters.get(1), 3);
        assert_eq!(core.counters.get(2), 4);
    }

    #[test]
    fn remove_entry_reports_absence() {
        let core = keyed_core(1, 4);
        assert!(!core.remove_entry(&5, || panic!("no removal expected")));
    }

    #[test]
    fn replace_existing_misses_without_inserting() {
        let core = keyed_core(1, 4);
        assert_eq!(core.replace_existing(&1, 10), None);
        let bucket = core.table.bucket(0);
        assert!(bucket.slot(0).is_none());
    }
}
