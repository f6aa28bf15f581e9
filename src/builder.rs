//! Staged builders for the collision cache shapes.
//!
//! [`CollisionBuilder`] configures capacity, bucket geometry, counter
//! behavior, and the optional loader, then terminates into a packed or
//! sparse cache storing `(key, value)` entries. Supplying an
//! `is_val_for_key` predicate transitions to [`ValueCollisionBuilder`],
//! whose terminals build the value-only shapes that never store keys.
//!
//! ## Example
//!
//! ```
//! use collision_cache::builder::CollisionBuilder;
//! use collision_cache::traits::CollisionCache;
//!
//! let cache = CollisionBuilder::<u64, String>::with_capacity(1_000)
//!     .bucket_size(4)
//!     .init_count(5)
//!     .strict_capacity(true)
//!     .build_sparse();
//! cache.put_replace(&1, "one".to_string());
//! assert_eq!(cache.get_if_present(&1), Some("one".to_string()));
//! ```
//!
//! All closures handed to the builder (hash coder, predicate, loader,
//! mapper) are boxed once here; the engine never allocates a closure per
//! call.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::ds::bucket_table::BucketTable;
use crate::ds::log_counters::LogCounters;
use crate::error::ConfigError;
use crate::policy::{
    CacheCore, HashCoder, KeyedSlots, Loader, PackedCache, PackedCollisionCache,
    PackedEntryCollisionCache, SlotFamily, SparseCache, SparseCollisionCache,
    SparseEntryCollisionCache, ValPredicate, ValueSlots,
};

/// Default slots per bucket for the sparse shape.
pub const DEFAULT_SPARSE_BUCKET_SIZE: usize = 4;
/// Default slots per bucket for the packed shape.
pub const DEFAULT_PACKED_BUCKET_SIZE: usize = 8;
/// Default table over-provisioning multiplier for the sparse shape.
///
/// Multiplied by the desired capacity to size the backing table; increase it
/// to reduce collisions (and consider `lazy_init_buckets` to avoid paying
/// for buckets never touched).
pub const DEFAULT_SPARSE_FACTOR: f64 = 3.0;

const DEFAULT_INIT_COUNT: u8 = 5;
const DEFAULT_MAX_COUNTER_VAL: usize = 1 << 20;

/// Builder for caches that store `(key, value)` entries.
pub struct CollisionBuilder<K, V> {
    capacity: usize,
    bucket_size: Option<usize>,
    init_count: u8,
    max_counter_val: usize,
    strict_capacity: bool,
    lazy_init_buckets: bool,
    hash_coder: Option<HashCoder<K>>,
    loader: Option<Loader<K, V>>,
}

impl<K: 'static, V: 'static> CollisionBuilder<K, V> {
    /// Starts a builder for a cache with the given logical capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            bucket_size: None,
            init_count: DEFAULT_INIT_COUNT,
            max_counter_val: DEFAULT_MAX_COUNTER_VAL,
            strict_capacity: false,
            lazy_init_buckets: false,
            hash_coder: None,
            loader: None,
        }
    }

    /// Slots per bucket, rounded up to a power of two. Valid range 1..=256;
    /// defaults to 8 packed, 4 sparse.
    pub fn bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = Some(bucket_size);
        self
    }

    /// Counter value published for fresh inserts. Valid range 0..=32.
    pub fn init_count(mut self, init_count: u8) -> Self {
        self.init_count = init_count;
        self
    }

    /// Approximate number of hits after which a counter saturates. Must be
    /// at least 256; keep it large so eviction can tell hot from cold.
    pub fn max_counter_val(mut self, max_counter_val: usize) -> Self {
        self.max_counter_val = max_counter_val;
        self
    }

    /// Refuse inserts with nothing to swap against once over capacity
    /// (sparse shape only).
    pub fn strict_capacity(mut self, strict: bool) -> Self {
        self.strict_capacity = strict;
        self
    }

    /// Allocate buckets on first touch instead of up front.
    pub fn lazy_init_buckets(mut self, lazy: bool) -> Self {
        self.lazy_init_buckets = lazy;
        self
    }

    /// Custom key hash. The result is masked against the power-of-two table
    /// length, so only its low bits steer bucket selection.
    pub fn hash_coder<H>(mut self, hash_coder: H) -> Self
    where
        H: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        self.hash_coder = Some(Box::new(hash_coder));
        self
    }

    /// Registers a loader used by `get` / `get_aggressive` on a miss. A
    /// `None` from the loader is returned to callers without storing.
    pub fn loader<Load>(mut self, loader: Load) -> Self
    where
        Load: Fn(&K) -> Option<V> + Send + Sync + 'static,
    {
        self.loader = Some(Box::new(move |key: &K| loader(key)));
        self
    }

    /// Registers a loader plus a mapper from the loaded intermediate to the
    /// cached value. The pair is composed once here; the mapper is never
    /// handed a `None`.
    pub fn loader_mapper<L, Load, Map>(mut self, loader: Load, mapper: Map) -> Self
    where
        Load: Fn(&K) -> Option<L> + Send + Sync + 'static,
        Map: Fn(&K, L) -> V + Send + Sync + 'static,
    {
        self.loader = Some(Box::new(move |key: &K| {
            loader(key).map(|loaded| mapper(key, loaded))
        }));
        self
    }

    /// Switches to the value-only shapes: keys are not stored and `pred`
    /// decides from the value alone whether it belongs to a key.
    ///
    /// Not storing keys is the capacity play of this cache design.
    pub fn is_val_for_key<P>(self, pred: P) -> ValueCollisionBuilder<K, V>
    where
        P: Fn(&K, &V) -> bool + Send + Sync + 'static,
    {
        ValueCollisionBuilder {
            inner: self,
            is_val_for_key: Box::new(pred),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::new("capacity must be > 0"));
        }
        if let Some(bucket_size) = self.bucket_size {
            if bucket_size == 0 || bucket_size > 256 {
                return Err(ConfigError::new("bucket_size must be in 1..=256"));
            }
        }
        if self.init_count > 32 {
            return Err(ConfigError::new(
                "init_count must be <= 32; a large initial count is pointless",
            ));
        }
        if self.max_counter_val < 256 {
            return Err(ConfigError::new(
                "max_counter_val must be >= 256 so eviction can tell hot from cold",
            ));
        }
        Ok(())
    }

    /// Sizes the counter array and bucket table and assembles the engine
    /// core. `sparse_factor` is `None` for the packed shape.
    fn build_core<F>(
        self,
        family: F,
        sparse_factor: Option<f64>,
    ) -> Result<CacheCore<K, V, F>, ConfigError>
    where
        F: SlotFamily<K, V>,
        K: Hash,
    {
        self.validate()?;
        let default_width = if sparse_factor.is_some() {
            DEFAULT_SPARSE_BUCKET_SIZE
        } else {
            DEFAULT_PACKED_BUCKET_SIZE
        };
        let width = self.bucket_size.unwrap_or(default_width).next_power_of_two();
        let scaled = match sparse_factor {
            Some(factor) => (self.capacity as f64 * factor.max(1.0)).ceil() as usize,
            None => self.capacity,
        };
        let num_counters = scaled.next_power_of_two().max(width);
        let width_shift = width.trailing_zeros();
        let num_buckets = num_counters >> width_shift;
        Ok(CacheCore {
            table: BucketTable::new(num_buckets, width, self.lazy_init_buckets),
            counters: LogCounters::new(num_counters, self.init_count, self.max_counter_val),
            mask: (num_buckets - 1) as u64,
            width_shift,
            hash_coder: self.hash_coder.unwrap_or_else(default_hash_coder::<K>),
            family,
            loader: self.loader,
        })
    }
}

impl<K, V> CollisionBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a sparse entry cache with the default sparse factor.
    pub fn try_build_sparse(self) -> Result<SparseEntryCollisionCache<K, V>, ConfigError> {
        self.try_build_sparse_with_factor(DEFAULT_SPARSE_FACTOR)
    }

    /// Builds a sparse entry cache whose table is over-provisioned by
    /// `sparse_factor` (clamped to a minimum of 1.0).
    pub fn try_build_sparse_with_factor(
        self,
        sparse_factor: f64,
    ) -> Result<SparseEntryCollisionCache<K, V>, ConfigError> {
        let capacity = self.capacity;
        let strict = self.strict_capacity;
        let core = self.build_core(KeyedSlots, Some(sparse_factor))?;
        Ok(SparseCache::new(core, capacity, strict))
    }

    /// Builds a packed entry cache.
    pub fn try_build_packed(self) -> Result<PackedEntryCollisionCache<K, V>, ConfigError> {
        let core = self.build_core(KeyedSlots, None)?;
        Ok(PackedCache::new(core))
    }

    /// Panicking convenience for [`try_build_sparse`](Self::try_build_sparse).
    pub fn build_sparse(self) -> SparseEntryCollisionCache<K, V> {
        self.try_build_sparse()
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }

    /// Panicking convenience for
    /// [`try_build_sparse_with_factor`](Self::try_build_sparse_with_factor).
    pub fn build_sparse_with_factor(self, sparse_factor: f64) -> SparseEntryCollisionCache<K, V> {
        self.try_build_sparse_with_factor(sparse_factor)
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }

    /// Panicking convenience for [`try_build_packed`](Self::try_build_packed).
    pub fn build_packed(self) -> PackedEntryCollisionCache<K, V> {
        self.try_build_packed()
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }
}

/// Builder stage for the value-only shapes, reached through
/// [`CollisionBuilder::is_val_for_key`].
pub struct ValueCollisionBuilder<K, V> {
    inner: CollisionBuilder<K, V>,
    is_val_for_key: ValPredicate<K, V>,
}

impl<K: 'static, V: 'static> ValueCollisionBuilder<K, V> {
    /// See [`CollisionBuilder::bucket_size`].
    pub fn bucket_size(mut self, bucket_size: usize) -> Self {
        self.inner = self.inner.bucket_size(bucket_size);
        self
    }

    /// See [`CollisionBuilder::init_count`].
    pub fn init_count(mut self, init_count: u8) -> Self {
        self.inner = self.inner.init_count(init_count);
        self
    }

    /// See [`CollisionBuilder::max_counter_val`].
    pub fn max_counter_val(mut self, max_counter_val: usize) -> Self {
        self.inner = self.inner.max_counter_val(max_counter_val);
        self
    }

    /// See [`CollisionBuilder::strict_capacity`].
    pub fn strict_capacity(mut self, strict: bool) -> Self {
        self.inner = self.inner.strict_capacity(strict);
        self
    }

    /// See [`CollisionBuilder::lazy_init_buckets`].
    pub fn lazy_init_buckets(mut self, lazy: bool) -> Self {
        self.inner = self.inner.lazy_init_buckets(lazy);
        self
    }

    /// See [`CollisionBuilder::hash_coder`].
    pub fn hash_coder<H>(mut self, hash_coder: H) -> Self
    where
        H: Fn(&K) -> u64 + Send + Sync + 'static,
    {
        self.inner = self.inner.hash_coder(hash_coder);
        self
    }

    /// See [`CollisionBuilder::loader`].
    pub fn loader<Load>(mut self, loader: Load) -> Self
    where
        Load: Fn(&K) -> Option<V> + Send + Sync + 'static,
    {
        self.inner = self.inner.loader(loader);
        self
    }

    /// See [`CollisionBuilder::loader_mapper`].
    pub fn loader_mapper<L, Load, Map>(mut self, loader: Load, mapper: Map) -> Self
    where
        Load: Fn(&K) -> Option<L> + Send + Sync + 'static,
        Map: Fn(&K, L) -> V + Send + Sync + 'static,
    {
        self.inner = self.inner.loader_mapper(loader, mapper);
        self
    }
}

impl<K, V> ValueCollisionBuilder<K, V>
where
    K: Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds a sparse value-only cache with the default sparse factor.
    pub fn try_build_sparse(self) -> Result<SparseCollisionCache<K, V>, ConfigError> {
        self.try_build_sparse_with_factor(DEFAULT_SPARSE_FACTOR)
    }

    /// Builds a sparse value-only cache whose table is over-provisioned by
    /// `sparse_factor` (clamped to a minimum of 1.0).
    pub fn try_build_sparse_with_factor(
        self,
        sparse_factor: f64,
    ) -> Result<SparseCollisionCache<K, V>, ConfigError> {
        let capacity = self.inner.capacity;
        let strict = self.inner.strict_capacity;
        let core = self
            .inner
            .build_core(ValueSlots::new(self.is_val_for_key), Some(sparse_factor))?;
        Ok(SparseCache::new(core, capacity, strict))
    }

    /// Builds a packed value-only cache.
    pub fn try_build_packed(self) -> Result<PackedCollisionCache<K, V>, ConfigError> {
        let core = self
            .inner
            .build_core(ValueSlots::new(self.is_val_for_key), None)?;
        Ok(PackedCache::new(core))
    }

    /// Panicking convenience for [`try_build_sparse`](Self::try_build_sparse).
    pub fn build_sparse(self) -> SparseCollisionCache<K, V> {
        self.try_build_sparse()
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }

    /// Panicking convenience for
    /// [`try_build_sparse_with_factor`](Self::try_build_sparse_with_factor).
    pub fn build_sparse_with_factor(self, sparse_factor: f64) -> SparseCollisionCache<K, V> {
        self.try_build_sparse_with_factor(sparse_factor)
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }

    /// Panicking convenience for [`try_build_packed`](Self::try_build_packed).
    pub fn build_packed(self) -> PackedCollisionCache<K, V> {
        self.try_build_packed()
            .unwrap_or_else(|err| panic!("invalid collision cache configuration: {err}"))
    }
}

fn default_hash_coder<K: Hash + 'static>() -> HashCoder<K> {
    Box::new(|key: &K| {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    })
}
