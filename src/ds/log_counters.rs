//! Atomic 8-bit logarithmic frequency counters.
//!
//! One byte per cache slot, shared by every bucket of the table. A counter
//! approximates an access count on a logarithmic scale: the probability of a
//! further increment decreases roughly linearly in the current count, tuned
//! so a counter reads 255 after about `max_counter_val` hits. Eviction reads
//! these counters to pick the least-frequently-used slot and halves them to
//! age out stale popularity.
//!
//! ## Operations
//! - `initialize(i)`: store the configured insertion count
//! - `increment(i)`: probabilistic saturating +1
//! - `decay(from, to)` / `decay_skip(from, to, skip)`: halve a range
//!
//! All accesses are relaxed atomics; each byte is independently coherent but
//! carries no ordering relative to the slots it describes. Counter updates
//! lost to races only cost accuracy, never safety.

use std::cell::Cell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};

/// Counter ceiling; a saturated counter is never incremented again.
pub(crate) const MAX_COUNT: u8 = u8::MAX;

/// Fixed array of approximate-log frequency counters.
pub struct LogCounters {
    counters: Box<[AtomicU8]>,
    initial_count: u8,
    thresholds: Box<[f64]>,
}

impl LogCounters {
    /// Creates `num_counters` zeroed counters.
    ///
    /// `initial_count` is the value published alongside a new slot (a
    /// freshness floor that survives `initial_count` unconditional bumps).
    /// `max_counter_val` shapes the increment-probability curve: a counter
    /// reaches 255 after roughly that many hits.
    ///
    /// The builder validates `initial_count <= 32` and
    /// `max_counter_val >= 256` before constructing.
    pub fn new(num_counters: usize, initial_count: u8, max_counter_val: usize) -> Self {
        debug_assert!(initial_count <= 32);
        debug_assert!(max_counter_val >= 256);
        let shift = log_factor_shift(max_counter_val);
        let counters: Box<[AtomicU8]> = (0..num_counters).map(|_| AtomicU8::new(0)).collect();
        let mut thresholds = vec![0.0f64; MAX_COUNT as usize];
        thresholds[0] = 1.0;
        for (count, threshold) in thresholds.iter_mut().enumerate().skip(1) {
            *threshold = 1.0 / ((count as u64) << shift) as f64;
        }
        Self {
            counters,
            initial_count,
            thresholds: thresholds.into_boxed_slice(),
        }
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// `true` if the array is empty (only for degenerate configurations).
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// The count published for freshly inserted slots.
    pub fn initial_count(&self) -> u8 {
        self.initial_count
    }

    /// Publishes the insertion count for a newly filled slot.
    #[inline]
    pub fn initialize(&self, index: usize) {
        self.counters[index].store(self.initial_count, Ordering::Relaxed);
    }

    /// Reads the counter at `index`.
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.counters[index].load(Ordering::Relaxed)
    }

    /// Overwrites the counter at `index`.
    #[inline]
    pub fn set(&self, index: usize, count: u8) {
        self.counters[index].store(count, Ordering::Relaxed);
    }

    /// Probabilistically increments the counter at `index`, saturating at 255.
    ///
    /// Counts at or below `initial_count` are bumped unconditionally so fresh
    /// entries cannot be evicted before surviving their grace window. Above
    /// that, a uniform draw against `thresholds[count]` throttles the bump;
    /// the draw happens once and the CAS retries until it lands or another
    /// thread saturates the counter.
    pub fn increment(&self, index: usize) {
        let mut witness = self.counters[index].load(Ordering::Relaxed);
        let mut count = witness;
        if count == MAX_COUNT {
            return;
        }
        while count <= self.initial_count {
            match self.counters[index].compare_exchange(
                witness,
                count + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(seen) => {
                    witness = seen;
                    count = seen;
                    if count == MAX_COUNT {
                        return;
                    }
                }
            }
        }
        if self.thresholds[count as usize] < next_f64() {
            return;
        }
        loop {
            match self.counters[index].compare_exchange(
                witness,
                count + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(seen) => {
                    witness = seen;
                    count = seen;
                    if count == MAX_COUNT {
                        return;
                    }
                }
            }
        }
    }

    /// Halves every non-zero counter in `[from, to)`.
    pub fn decay(&self, from: usize, to: usize) {
        for index in from..to {
            let count = self.counters[index].load(Ordering::Relaxed);
            if count == 0 {
                continue;
            }
            // Counter hits may land between the load and this store.
            self.counters[index].store(count >> 1, Ordering::Relaxed);
        }
    }

    /// Halves every non-zero counter in `[from, skip)` and `(skip, to)`.
    ///
    /// `skip` is the counter of a freshly installed slot and keeps its
    /// insertion count.
    pub fn decay_skip(&self, from: usize, to: usize, skip: usize) {
        self.decay(from, skip);
        self.decay(skip + 1, to);
    }
}

impl std::fmt::Debug for LogCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCounters")
            .field("num_counters", &self.counters.len())
            .field("initial_count", &self.initial_count)
            .finish()
    }
}

/// Number of bits to shift the threshold divisor by so that a counter
/// saturates after roughly `max_counter_val` increments. Saturates at zero
/// for ceilings below 32768.
fn log_factor_shift(max_counter_val: usize) -> u32 {
    max_counter_val
        .next_power_of_two()
        .trailing_zeros()
        .saturating_sub(15)
}

/// Uniform draw in `[0, 1)` from a thread-local XorShift64 generator.
///
/// Cheap enough for the read path; no cross-thread state.
fn next_f64() -> f64 {
    thread_local! {
        static STATE: Cell<u64> = Cell::new(rng_seed());
    }
    STATE.with(|state| {
        let mut x = state.get();
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        state.set(x);
        (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    })
}

fn rng_seed() -> u64 {
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(0x9E37_79B9_7F4A_7C15);
    hasher.finish() | 1
}
