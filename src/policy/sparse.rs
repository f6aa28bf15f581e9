//! Sparse cache shape: a real capacity budget over a roomy table.
//!
//! Sparse caches over-provision the bucket table by a `sparse_factor` so the
//! logical capacity, tracked by an atomic entry count, is the working limit
//! rather than bucket fill. The count may overshoot transiently; eviction
//! paths shrink buckets back by dropping zero-count tail slots
//! (`decay_and_drop`). In strict mode an insert with nothing to swap against
//! is refused outright once the cache is over capacity.
//!
//! The entry count is signed so racing decrements behave like the original
//! design's (briefly negative, never wrapping); the public `len` clamps at
//! zero.

use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::ds::bucket_table::Bucket;
use crate::ds::log_counters::MAX_COUNT;
use crate::policy::{CacheCore, KeyedSlots, MinScan, Scan, SlotFamily, ValueSlots};
use crate::traits::CollisionCache;

/// Cache with an atomic size, a capacity budget, and optional strict mode.
pub struct SparseCache<K, V, F: SlotFamily<K, V>> {
    core: CacheCore<K, V, F>,
    capacity: isize,
    strict: bool,
    size: AtomicIsize,
    clear_lock: Mutex<()>,
}

/// Sparse cache storing values alone, matched by an `is_val_for_key`
/// predicate.
pub type SparseCollisionCache<K, V> = SparseCache<K, V, ValueSlots<K, V>>;

/// Sparse cache storing `(key, value)` entries.
pub type SparseEntryCollisionCache<K, V> = SparseCache<K, V, KeyedSlots>;

impl<K, V, F> SparseCache<K, V, F>
where
    F: SlotFamily<K, V>,
    V: Clone,
{
    pub(crate) fn new(core: CacheCore<K, V, F>, capacity: usize, strict: bool) -> Self {
        Self {
            core,
            capacity: capacity as isize,
            strict,
            size: AtomicIsize::new(0),
            clear_lock: Mutex::new(()),
        }
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed).max(0) as usize
    }

    /// `true` if no entries are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The configured capacity budget.
    pub fn capacity(&self) -> usize {
        self.capacity as usize
    }

    /// `true` if strict mode refuses over-capacity inserts at slot 0.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    fn value_of(&self, slot: &Arc<F::Slot>) -> V {
        self.core.family.value(slot).clone()
    }

    fn over_capacity(&self) -> bool {
        self.size.load(Ordering::Relaxed) > self.capacity
    }

    fn size_within(&self) -> bool {
        self.size.load(Ordering::Relaxed) <= self.capacity
    }

    fn inc_size(&self) {
        self.size.fetch_add(1, Ordering::Relaxed);
    }

    /// Attempts to reserve one drop: decrements the size and undoes the
    /// decrement when the cache was not over capacity after all.
    fn try_drop_one(&self) -> bool {
        if self.size.fetch_sub(1, Ordering::Relaxed) <= self.capacity {
            self.size.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Full-scan decay that also shrinks the bucket: the entry lands in the
    /// first zero-count slot (or the minimum-count slot), and at most one
    /// zero-count tail slot past it is dropped while over capacity.
    ///
    /// Scans only `[counter_offset, max_counter_index)`, the occupied
    /// prefix. Callers hold the bucket lock.
    fn decay_swap_and_drop(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        max_counter_index: usize,
        entry: Arc<F::Slot>,
    ) {
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        while counter_index < max_counter_index {
            let count = self.core.counters.get(counter_index);
            if count == 0 {
                bucket.store(counter_index - counter_offset, Some(entry));
                self.core.counters.initialize(counter_index);
                counter_index += 1;
                while counter_index < max_counter_index {
                    let count = self.core.counters.get(counter_index);
                    if count > 0 {
                        self.core.counters.set(counter_index, count >> 1);
                        counter_index += 1;
                        continue;
                    }
                    if !self.try_drop_one() {
                        counter_index += 1;
                        continue;
                    }
                    self.core
                        .compact_left(bucket, counter_offset, counter_index - counter_offset);
                    return;
                }
                return;
            }
            // Counter hits may land between the load and this store.
            self.core.counters.set(counter_index, count >> 1);
            if count < min_count {
                min_count = count;
                min_counter_index = counter_index;
            }
            counter_index += 1;
        }
        bucket.store(min_counter_index - counter_offset, Some(entry));
        self.core.counters.initialize(min_counter_index);
    }

    /// Halves the bucket's counters outside `skip_index` and, when a counter
    /// past the skip reads zero while the cache is over capacity, drops that
    /// slot and compacts the bucket behind it.
    ///
    /// Callers hold the bucket lock.
    fn decay_and_drop(
        &self,
        bucket: &Bucket<F::Slot>,
        counter_offset: usize,
        max_counter_index: usize,
        skip_index: usize,
    ) {
        let mut counter_index = counter_offset;
        while counter_index < max_counter_index {
            if counter_index == skip_index {
                counter_index += 1;
                continue;
            }
            let count = self.core.counters.get(counter_index);
            if count == 0 {
                if counter_index < skip_index {
                    counter_index += 1;
                    continue;
                }
                if !self.try_drop_one() {
                    counter_index += 1;
                    continue;
                }
                self.core
                    .compact_left(bucket, counter_offset, counter_index - counter_offset);
                return;
            }
            self.core.counters.set(counter_index, count >> 1);
            counter_index += 1;
        }
    }

    /// Locked miss path after free space was observed.
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
        if self.over_capacity() {
            return self.check_decay_and_prob_swap(bucket, counter_offset, key, load);
        }
        let width = bucket.width();
        let _guard = bucket.lock();
        match self.core.scan(bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(mut index) => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                if index == 0 {
                    // A non-strict cache admits the first entry of a bucket
                    // even over capacity.
                    if self.strict && self.over_capacity() {
                        return Some(self.value_of(&entry));
                    }
                } else if self.over_capacity() {
                    let result = self.value_of(&entry);
                    self.decay_swap_and_drop(bucket, counter_offset, counter_offset + index, entry);
                    return Some(result);
                }
                loop {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            self.inc_size();
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
                    if index == width || !self.size_within() {
                        break;
                    }
                }
                let result = self.value_of(&entry);
                if index < width {
                    // Went over capacity mid-walk; swap within the occupied
                    // prefix instead of growing the bucket.
                    self.decay_swap_and_drop(bucket, counter_offset, counter_offset + index, entry);
                } else if self.over_capacity() {
                    self.decay_swap_and_drop(bucket, counter_offset, counter_offset + width, entry);
                } else {
                    self.core
                        .decay_and_swap(bucket, counter_offset, counter_offset + width, entry);
                }
                Some(result)
            }
            Scan::Full => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                let result = self.value_of(&entry);
                if self.over_capacity() {
                    self.decay_swap_and_drop(bucket, counter_offset, counter_offset + width, entry);
                } else {
                    self.core
                        .decay_and_swap(bucket, counter_offset, counter_offset + width, entry);
                }
                Some(result)
            }
        }
    }

    /// Locked miss path after a full bucket (or over-capacity state) was
    /// observed: one min-tracking pass picks the victim.
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
                scanned_to,
            } => {
                let val = load(key)?;
                let entry = Arc::new(self.core.family.slot(key, val));
                if index == 0 {
                    if self.strict && self.over_capacity() {
                        // Nothing to swap with and over capacity.
                        return Some(self.value_of(&entry));
                    }
                } else if self.over_capacity() {
                    bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                    self.core.counters.initialize(min_counter_index);
                    self.decay_and_drop(bucket, counter_offset, scanned_to, min_counter_index);
                    return Some(self.value_of(&entry));
                }
                loop {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            self.inc_size();
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
                    if index == width || !self.size_within() {
                        break;
                    }
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
                if self.over_capacity() {
                    self.decay_and_drop(bucket, counter_offset, scanned_to, min_counter_index);
                } else {
                    self.core
                        .counters
                        .decay_skip(counter_offset, scanned_to, min_counter_index);
                }
                Some(self.value_of(&entry))
            }
        }
    }

    /// Locked install for the aggressive path, which already decided the
    /// cache is full or over capacity. The value is produced lazily so a hit
    /// discovered behind the lock skips the mapper entirely.
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
                    // Strict capacity was checked before entering.
                    return match bucket.publish(0, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset);
                            self.inc_size();
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
                self.decay_and_drop(bucket, counter_offset, scanned_to, min_counter_index);
                self.value_of(&entry)
            }
            MinScan::Full {
                min_counter_index,
                scanned_to,
            } => {
                let entry = Arc::new(self.core.family.slot(key, make_val()));
                bucket.store(min_counter_index - counter_offset, Some(Arc::clone(&entry)));
                self.core.counters.initialize(min_counter_index);
                if self.over_capacity() {
                    self.decay_and_drop(bucket, counter_offset, scanned_to, min_counter_index);
                } else {
                    self.core
                        .counters
                        .decay_skip(counter_offset, scanned_to, min_counter_index);
                }
                self.value_of(&entry)
            }
        }
    }
}

impl<K, V, F> CollisionCache<K, V> for SparseCache<K, V, F>
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
        let width = bucket.width();
        match self.core.scan(&bucket, counter_offset, key) {
            Scan::Hit(val) => Some(val),
            Scan::EmptyAt(mut index) => {
                let loaded = loader(key)?;
                if index == 0 {
                    // Nothing to swap with; a strict cache over capacity
                    // returns the mapped value uncached.
                    if self.strict && self.over_capacity() {
                        return Some(mapper(key, loaded));
                    }
                } else if self.over_capacity() {
                    return Some(self.prob_swap_pending(&bucket, counter_offset, key, move || {
                        mapper(key, loaded)
                    }));
                }
                let entry = Arc::new(self.core.family.slot(key, mapper(key, loaded)));
                loop {
                    match bucket.publish(index, Arc::clone(&entry)) {
                        None => {
                            self.core.counters.initialize(counter_offset + index);
                            self.inc_size();
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
                    if index == width || !self.size_within() {
                        break;
                    }
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
                    if index == 0 {
                        if self.strict && self.over_capacity() {
                            // Nothing to swap with and over capacity.
                            return self.value_of(&entry);
                        }
                    } else if self.over_capacity() {
                        break 'unlocked;
                    }
                    loop {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                self.inc_size();
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
                        if index == width || !self.size_within() {
                            break;
                        }
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

        // Locked replace-or-swap.
        let _guard = bucket.lock();
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        let mut index = 0;
        loop {
            match bucket.slot(index) {
                None => {
                    if index == 0 {
                        // Strict capacity was checked before locking.
                        return match bucket.publish(0, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset);
                                self.inc_size();
                                self.value_of(&entry)
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    // Another thread raced to PUT; let it win.
                                    self.value_of(&collision)
                                } else {
                                    // Lost the tie breaker; hand the value
                                    // back unstored.
                                    self.value_of(&entry)
                                }
                            }
                        };
                    }
                    let result = self.value_of(&entry);
                    bucket.store(min_counter_index - counter_offset, Some(entry));
                    self.core.counters.initialize(min_counter_index);
                    self.decay_and_drop(&bucket, counter_offset, counter_index, min_counter_index);
                    return result;
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
                if self.over_capacity() {
                    self.decay_and_drop(&bucket, counter_offset, counter_index, min_counter_index);
                } else {
                    self.core
                        .counters
                        .decay_skip(counter_offset, counter_index, min_counter_index);
                }
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
                    if index == 0 {
                        if self.strict && self.over_capacity() {
                            // Nothing to swap with and over capacity.
                            return self.value_of(&entry);
                        }
                    } else if self.over_capacity() {
                        break 'unlocked;
                    }
                    loop {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                self.inc_size();
                                return self.value_of(&entry);
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    return self.value_of(&collision);
                                }
                            }
                        }
                        index += 1;
                        if index == width || !self.size_within() {
                            break;
                        }
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

        // Locked check-then-swap.
        let _guard = bucket.lock();
        let mut counter_index = counter_offset;
        let mut min_counter_index = counter_offset;
        let mut min_count = MAX_COUNT;
        let mut index = 0;
        loop {
            match bucket.slot(index) {
                None => {
                    if index == 0 {
                        // Strict capacity was checked before locking.
                        return match bucket.publish(0, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset);
                                self.inc_size();
                                self.value_of(&entry)
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    self.value_of(&collision)
                                } else {
                                    // Lost the tie breaker; hand the value
                                    // back unstored.
                                    self.value_of(&entry)
                                }
                            }
                        };
                    }
                    let result = self.value_of(&entry);
                    bucket.store(min_counter_index - counter_offset, Some(entry));
                    self.core.counters.initialize(min_counter_index);
                    self.decay_and_drop(&bucket, counter_offset, counter_index, min_counter_index);
                    return result;
                }
                Some(collision) => {
                    if self.core.family.is_for_key(key, &collision) {
                        return self.value_of(&collision);
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
                if self.over_capacity() {
                    self.decay_and_drop(&bucket, counter_offset, counter_index, min_counter_index);
                } else {
                    self.core
                        .counters
                        .decay_skip(counter_offset, counter_index, min_counter_index);
                }
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
                    while self.size_within() {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                self.inc_size();
                                return Some(self.value_of(&entry));
                            }
                            Some(collision) => {
                                if self.core.family.is_for_key(key, &collision) {
                                    return Some(self.value_of(&collision));
                                }
                            }
                        }
                        index += 1;
                        if index == width {
                            return None;
                        }
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
                    while self.size_within() {
                        match bucket.publish(index, Arc::clone(&entry)) {
                            None => {
                                self.core.counters.initialize(counter_offset + index);
                                self.inc_size();
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
                        if index == width {
                            return None;
                        }
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
        self.core.remove_entry(key, || {
            self.size.fetch_sub(1, Ordering::Relaxed);
        })
    }

    fn clear(&self) {
        let _guard = self.clear_lock.lock();
        for index in 0..self.core.table.num_buckets() {
            if let Some(bucket) = self.core.table.bucket_if_present(index) {
                for slot in 0..bucket.width() {
                    if bucket.take(slot).is_some() {
                        self.size.fetch_sub(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }
}

impl<K, V, F: SlotFamily<K, V>> std::fmt::Debug for SparseCache<K, V, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseCache")
            .field("capacity", &self.capacity)
            .field("strict", &self.strict)
            .field("size", &self.size.load(Ordering::Relaxed))
            .field("num_buckets", &self.core.table.num_buckets())
            .field("bucket_width", &self.core.table.width())
            .field("counters", &self.core.counters)
            .finish()
    }
}
