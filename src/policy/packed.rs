//! Packed cache shape: bucket fill is the only limit.
//!
//! Packed caches keep no entry count and no capacity guard. A missed scan
//! that finds an empty slot installs into it with CAS; a full bucket always
//! displaces its least-frequently-used slot under the bucket lock. Logical
//! capacity is simply `buckets × bucket_width`.

use std::sync::Arc;

use crate::ds::bucket_table::Bucket;
use crate::ds::log_counters::MAX_COUNT;
use crate::policy::{CacheCore, KeyedSlots, MinScan, Scan, SlotFamily, ValueSlots};
use crate::traits::CollisionCache;

/// Cache without a size or capacity guard, generic over the slot family.
pub struct PackedCache<K, V, F: SlotFamily<K, V>> {
    core: CacheCore<K, V, F>,
}

/// Packed cache storing values alone, matched by an `is_val_for_key`
/// predicate.
pub type PackedCollisionCache<K, V> = PackedCache<K, V, ValueSlots<K, V>>;

/// Packed cache storing `(key, value)` entries.
pub type PackedEntryCollisionCache<K, V> = PackedCache<K, V, KeyedSlots>;

impl<K, V, F> PackedCache<K, V, F>
where
    F: SlotFamily<K, V>,
    V: Clone,
{
    pub(crate) fn new(core: CacheCore<K, V, F>) -> Self {
        Self { core }
    }

    fn value_of(&self, slot: &Arc<F::Slot>) -> V {
        self.core.family.value(slot).clone()
    }

    /// Locked miss path after free space was observed.
    ///
    /// Re-scans behind the lock before loading so duplicates stay rare, CAS
    /// walks the free tail, and falls back to the full-scan decay-and-swap
    /// when every slot filled up in the meantime.
    fn check_decay_and_swap<Load>(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        key: &K,
        load: Load,
    ) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<V>,
    {
        let width = bucket.width();
        let _guard = bucket.lock();
        match self.core.scan(bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(mut index) => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                while index < width {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            return Some(self.value_of(&entry));
                        }
                        Some(collision) => {
                            if self.core.family.is_for_key(key, &collision) {
                                self.core.counters.increment(counter_offset + index);
                                return Some(self.value_of(&collision));
                            }
                        }
                    }
                    index += 1;
                }
                self.core.decay_and_swap(
                    bucket,
                    counter_offset,
                    counter_offset + width,
                    Arc::clone(&entry),
                );
                Some(self.value_of(&entry))
            }
            Scan::Full => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                self.core.decay_and_swap(
                    bucket,
                    counter_offset,
                    counter_offset + width,
                    Arc::clone(&entry),
                );
                Some(self.value_of(&entry))
            }
        }
    }

    /// Locked miss path after a full bucket was observed: one min-tracking
    /// pass picks the victim, then the rest of the bucket decays.
    fn check_decay_and_prob_swap<Load>(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        key: &K,
        load: Load,
    ) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<V>,
    {
        let width = bucket.width();
        let _guard = bucket.lock();
        match self.core.scan_tracking_min(bucket, counter_offset, key) {
            MinScan::Hit(val) => Some(val),
            MinScan::EmptyAt {
                mut index,
                min_counter_index,
                ..
            } => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                while index < width {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            return Some(self.value_of(&entry));
                        }
                        Some(collision) => {
                            if self.core.family.is_for_key(key, &collision) {
                                self.core.counters.increment(counter_offset + index);
                                return Some(self.value_of(&collision));
                            }
                        }
                    }
                    index += 1;
                }
                bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, counter_offset + width, min_counter_index);
                Some(self.value_of(&entry))
            }
            MinScan::Full {
                min_counter_index,
                scanned_to,
            } => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, scanned_to, min_counter_index);
                Some(self.value_of(&entry))
            }
        }
    }

    /// Locked install for the aggressive path. The value is produced lazily
    /// so a hit discovered behind the lock skips the mapper entirely.
    fn prob_swap_pending<Make>(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        key: &K,
        make_val: Make,
    ) -> V
    where
        Make: FnOnce() -> V,
    {
        let _guard = bucket.lock();
        match self.core.scan_tracking_min(bucket, counter_offset, key) {
            MinScan::Hit(val) => val,
            MinScan::EmptyAt {
                index,
                min_counter_index,
                scanned_to,
            } => {
                let entry = Arc::new(self.core.family.slot(key, make_val()));
                if index == 0 {
                    return match bucket.publish(0, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset);
                            self.value_of(&entry)
                        }
                        Some(collision) => {
                            if self.core.family.is_for_key(key, &collision) {
                                self.core.counters.increment(counter_offset);
                                self.value_of(&collision)
                            } else {
                                // Lost the tie breaker; hand the value back
                                // unstored.
                                self.value_of(&entry)
                            }
                        }
                    };
                }
                bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, scanned_to, min_counter_index);
                self.value_of(&entry)
            }
            MinScan::Full {
                min_counter_index,
                scanned_to,
            } => {
                let entry = Arc::new(self.core.family.slot(key, make_val()));
                bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, scanned_to, min_counter_index);
                self.value_of(&entry)
            }
        }
    }
}

impl<K, V, F> CollisionCache<K, V> for PackedCache<K, V, F>
where
    F: SlotFamily<K, V>,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V> {
        self.get_with(key, |k| self.core.load_registered(k))
    }

    fn get_with<Load>(&self, key: &K, load: Load) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<V>,
    {
        let (bucket, counter_offset) = self.core.resolve(key);
        match self.core.scan(&bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(_) => self.check_decay_and_swap(&bucket, counter_offset, key, load),
            Scan::Full => self.check_decay_and_prob_swap(&bucket, counter_offset, key, load),
        }
    }

    fn get_aggressive(&self, key: &K) -> Option<V> {
        self.get_aggressive_with(key, |k| self.core.load_registered(k), |_key, val| val)
    }

    fn get_aggressive_with<L, Load, Map>(&self, key: &K, loader: Load, mapper: Map) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<L>,
        Map: FnOnce(&K, L) -> V,
    {
        let (bucket, counter_offset) = self.core.resolve(key);
        match self.core.scan(&bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(mut index) => {
                let loaded = loader(key)?;
                let entry = Arc::new(self.core.family.slot(key, mapper(key, loaded)));
                while index < bucket.width() {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            return Some(self.value_of(&entry));
                        }
                        Some(collision) => {
                            if self.core.family.is_for_key(key, &collision) {
                                self.core.counters.increment(counter_offset + index);
                                return Some(self.value_of(&collision));
                            }
                        }
                    }
                    index += 1;
                }
                let pending = self.value_of(&entry);
                Some(self.prob_swap_pending(&bucket, counter_offset, key, move || pending))
            }
            Scan::Full => {
                let loaded = loader(key)?;
                Some(self.prob_swap_pending(&bucket, counter_offset, key, move || {
                    mapper(key, loaded)
                }))
            }
        }
    }

    fn get_if_present(&self, key: &K) -> Option<V> {
        self.core.get_if_present(key)
    }

    fn put_replace(&self, key: &K, val: V) -> V {
        let (bucket, counter_offset) = self.core.resolve(key);
        let width = bucket.width();
        let entry = Arc::new(self.core.family.slot(key, val));
        let mut index = 0;
        'unlocked: while index < width {
            match bucket.slot(index) {
                None => {
                    while index < width {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                return self.value_of(&entry);
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    // Another thread raced to PUT; let it win.
                                    return self.value_of(&collision);
                                }
                            }
                        }
                        index += 1;
                    }
                    break 'unlocked;
                }
                Some(collision) => {
                    if self.core.family.is_for_key(key, &collision) {
                        match bucket.swap_slot(index, &collision, Arc::clone(&entry)) {
                            Some(seen) if Arc::ptr_eq(&seen, &collision) => {
                                return self.value_of(&entry);
                            }
                            Some(seen) if self.core.family.is_for_key(key, &seen) => {
                                return self.value_of(&seen);
                            }
                            _ => {}
                        }
                    }
                }
            }
            index += 1;
        }

        // Locked replace-or-swap over a full bucket.
        let _guard = bucket.lock();
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        let mut index = 0;
        loop {
            if let Some(collision) = bucket.slot(index) {
                if self.core.family.is_for_key(key, &collision) {
                    match bucket.swap_slot(index, &collision, Arc::clone(&entry)) {
                        Some(seen) if Arc::ptr_eq(&seen, &collision) => {
                            return self.value_of(&entry);
                        }
                        Some(seen) if self.core.family.is_for_key(key, &seen) => {
                            return self.value_of(&seen);
                        }
                        _ => {}
                    }
                }
            }
            let count = self.core.counters.get(counter_index);
            if count < min_count {
                min_count = count;
                min_counter_index = counter_index;
            }
            counter_index += 1;
            index += 1;
            if index == width {
                let result = self.value_of(&entry);
                bucket.store(min_counter_index - counter_offset, Some(entry));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, counter_index, min_counter_index);
                return result;
            }
        }
    }

    fn replace(&self, key: &K, val: V) -> Option<V> {
        self.core.replace_existing(key, val)
    }

    fn put_if_absent(&self, key: &K, val: V) -> V {
        let (bucket, counter_offset) = self.core.resolve(key);
        let width = bucket.width();
        let entry = Arc::new(self.core.family.slot(key, val));
        let mut index = 0;
        'unlocked: while index < width {
            match bucket.slot(index) {
                None => {
                    while index < width {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                return self.value_of(&entry);
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    return self.value_of(&collision);
                                }
                            }
                        }
                        index += 1;
                    }
                    break 'unlocked;
                }
                Some(collision) => {
                    if self.core.family.is_for_key(key, &collision) {
                        return self.value_of(&collision);
                    }
                }
            }
            index += 1;
        }

        // Locked check-then-swap over a full bucket.
        let _guard = bucket.lock();
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        let mut index = 0;
        loop {
            if let Some(collision) = bucket.slot(index) {
                if self.core.family.is_for_key(key, &collision) {
                    return self.value_of(&collision);
                }
            }
            let count = self.core.counters.get(counter_index);
            if count < min_count {
                min_count = count;
                min_counter_index = counter_index;
            }
            counter_index += 1;
            index += 1;
            if index == width {
                let result = self.value_of(&entry);
                bucket.store(min_counter_index - counter_offset, Some(entry));
                self.core.counters.initialize(min_counter_index);
                self.core
                    .counters
                    .decay_skip(counter_offset, counter_index, min_counter_index);
                return result;
            }
        }
    }

    fn put_if_space_absent(&self, key: &K, val: V) -> Option<V> {
        let (bucket, counter_offset) = self.core.resolve(key);
        let width = bucket.width();
        let entry = Arc::new(self.core.family.slot(key, val));
        let mut index = 0;
        while index < width {
            match bucket.slot(index) {
                None => {
                    while index < width {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                return Some(self.value_of(&entry));
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    return Some(self.value_of(&collision));
                                }
                            }
                        }
                        index += 1;
                    }
                    return None;
                }
                Some(collision) => {
                    if self.core.family.is_for_key(key, &collision) {
                        return Some(self.value_of(&collision));
                    }
                }
            }
            index += 1;
        }
        None
    }

    fn put_if_space_replace(&self, key: &K, val: V) -> Option<V> {
        let (bucket, counter_offset) = self.core.resolve(key);
        let width = bucket.width();
        let entry = Arc::new(self.core.family.slot(key, val));
        let mut index = 0;
        while index < width {
            match bucket.slot(index) {
                None => {
                    while index < width {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                return Some(self.value_of(&entry));
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    // Another thread raced to PUT; let it win.
                                    return Some(self.value_of(&collision));
                                }
                            }
                        }
                        index += 1;
                    }
                    return None;
                }
                Some(collision) => {
                    if self.core.family.is_for_key(key, &collision) {
                        match bucket.swap_slot(index, &collision, Arc::clone(&entry)) {
                            Some(seen) if Arc::ptr_eq(&seen, &collision) => {
                                return Some(self.value_of(&entry));
                            }
                            Some(seen) if self.core.family.is_for_key(key, &seen) => {
                                return Some(self.value_of(&seen));
                            }
                            _ => {}
                        }
                    }
                }
            }
            index += 1;
        }
        None
    }

    fn remove(&self, key: &K) -> bool {
        self.core.remove_entry(key, || {})
    }

    fn clear(&self) {
        for index in 0..self.core.table.num_buckets() {
            if let Some(bucket) = self.core.table.bucket_if_present(index) {
                for slot in 0..bucket.width() {
                    bucket.store(slot, None);
                }
            }
        }
    }
}

impl<K, V, F: SlotFamily<K, V>> std::fmt::Debug for PackedCache<K, V, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedCache")
            .field("num_buckets", &self.core.table.num_buckets())
            .field("bucket_width", &self.core.table.width())
            .field("counters", &self.core.counters)
            .finish()
    }
}
