//! The public operation contract shared by every cache shape.
//!
//! Both [`PackedCache`](crate::policy::PackedCache) and
//! [`SparseCache`](crate::policy::SparseCache) implement [`CollisionCache`].
//! The operations fall into three groups:
//!
//! | Group | Operations | Synchronization |
//! |-------|------------|-----------------|
//! | reads | `get_if_present`, hit paths of every op | lock-free scan |
//! | loads | `get`, `get_with`, `get_aggressive*` | bucket lock (`get*`) or none (`*aggressive*`) |
//! | writes | `put_*`, `replace`, `remove`, `clear` | CAS, bucket lock for swap/remove |
//!
//! Every operation is safe to call from any thread. Hits bump the slot's
//! frequency counter; misses that install a value either fill an empty slot
//! with CAS or displace the least-frequently-used slot of the key's bucket
//! under that bucket's lock, halving the bucket's counters as they go.
//!
//! In race conditions occurring after entry to a put-family call another
//! value may win for the key; the value actually left in the cache is what
//! the call returns.

/// Operations offered by every collision cache.
///
/// # Example
///
/// ```
/// use collision_cache::builder::CollisionBuilder;
/// use collision_cache::traits::CollisionCache;
///
/// let cache = CollisionBuilder::<u64, String>::with_capacity(64).build_sparse();
/// assert_eq!(cache.put_if_absent(&1, "one".to_string()), "one");
/// assert_eq!(cache.get_if_present(&1), Some("one".to_string()));
/// assert!(cache.remove(&1));
/// assert_eq!(cache.get_if_present(&1), None);
/// ```
pub trait CollisionCache<K, V> {
    /// Returns the value for `key`, loading it with the registered loader on
    /// a miss.
    ///
    /// The loader runs under the key's bucket lock, so concurrent callers of
    /// `get` for the same bucket load at most once. Without a registered
    /// loader a miss returns `None`. The loader must not call back into this
    /// cache.
    fn get(&self, key: &K) -> Option<V>;

    /// Returns the value for `key`, loading it with `load` on a miss.
    ///
    /// `load` runs under the key's bucket lock; `None` from it is returned
    /// without storing anything. `load` must not call back into this cache.
    fn get_with<Load>(&self, key: &K, load: Load) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<V>;

    /// Returns the value for `key`, loading it with the registered loader
    /// outside any lock on a miss.
    ///
    /// Contending callers may load concurrently; the first published value
    /// wins and the rest are dropped.
    fn get_aggressive(&self, key: &K) -> Option<V>;

    /// Returns the value for `key`, loading it with `loader` outside any
    /// lock on a miss.
    fn get_aggressive_with_loader<Load>(&self, key: &K, loader: Load) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<V>,
    {
        self.get_aggressive_with(key, loader, |_key, val| val)
    }

    /// Returns the value for `key`, loading and mapping on a miss without
    /// holding any lock.
    ///
    /// `loader` produces an intermediate; `mapper` converts it to the cached
    /// value and is deferred until a value is actually installed or
    /// returned. `None` from the loader is returned without storing.
    fn get_aggressive_with<L, Load, Map>(&self, key: &K, loader: Load, mapper: Map) -> Option<V>
    where
        Load: FnOnce(&K) -> Option<L>,
        Map: FnOnce(&K, L) -> V;

    /// Returns the value for `key` if present, without loading.
    fn get_if_present(&self, key: &K) -> Option<V>;

    /// Caches `val` for `key`, replacing an existing entry.
    ///
    /// Returns the value in the cache after the call — `val`, or a racing
    /// writer's value that won. A sparse cache strictly over capacity with
    /// nothing to swap against hands `val` back unstored.
    fn put_replace(&self, key: &K, val: V) -> V;

    /// Replaces the value for `key` only if an entry already exists.
    ///
    /// Returns the value in the cache after the call, or `None` when no
    /// entry existed (nothing is inserted).
    fn replace(&self, key: &K, val: V) -> Option<V>;

    /// Caches `val` for `key` unless an entry already exists.
    ///
    /// Returns the existing value on a hit, otherwise the value installed.
    fn put_if_absent(&self, key: &K, val: V) -> V;

    /// Caches `val` only into a free slot, displacing nothing and taking no
    /// lock.
    ///
    /// Returns the value in the cache after the call, or `None` when no
    /// under-capacity free slot was available.
    fn put_if_space_absent(&self, key: &K, val: V) -> Option<V>;

    /// Replaces an existing entry or fills a free slot, taking no lock.
    ///
    /// Returns the value in the cache after the call, or `None` when the
    /// key was absent and no free slot was available.
    fn put_if_space_replace(&self, key: &K, val: V) -> Option<V>;

    /// Removes the entry for `key`, compacting its bucket.
    ///
    /// Returns `true` if an entry was found.
    fn remove(&self, key: &K) -> bool;

    /// Empties every bucket slot.
    fn clear(&self);
}
