// ==============================================
// CACHE PROPERTY TESTS (integration)
// ==============================================
//
// End-to-end scenarios exercising both table shapes through the public
// surface: capacity accounting, LFU victim selection, compacting removal,
// loader behavior, and lazy bucket allocation.

use collision_cache::builder::CollisionBuilder;
use collision_cache::ds::BucketTable;
use collision_cache::traits::CollisionCache;

mod sparse_strict_capacity {
    use super::*;

    // 64 distinct inserts into a strict capacity-16 cache must leave the
    // size at the budget (plus at most the one-entry overshoot) with every
    // survivor still mapping to its own value.
    #[test]
    fn strict_sparse_absorbs_overflow_by_swapping() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16)
            .bucket_size(4)
            .strict_capacity(true)
            .build_sparse_with_factor(2.0);

        let mut observed = 0;
        for key in 0..64u64 {
            assert_eq!(cache.put_replace(&key, key), key);
            observed += 1;
        }
        assert_eq!(observed, 64);

        let len = cache.len();
        assert!((16..=17).contains(&len), "len {len} outside [16, 17]");

        for key in 0..64u64 {
            if let Some(val) = cache.get_if_present(&key) {
                assert_eq!(val, key, "key {key} detached from its value");
            }
        }
    }

    #[test]
    fn quiescent_size_never_exceeds_capacity_plus_one_bucket() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(8)
            .bucket_size(4)
            .build_sparse_with_factor(2.0);
        for key in 0..256u64 {
            cache.put_replace(&key, key);
        }
        let len = cache.len();
        assert!(len <= 8 + 4, "len {len} exceeds capacity + bucket width");
    }
}

mod lfu_retention {
    use super::*;

    // A hot resident must survive an insert-driven swap; the victim comes
    // from the cold residents. Probabilistic, but the counter gap here is
    // wide enough that a failure indicates a real defect.
    #[test]
    fn hot_keys_survive_swaps() {
        // Capacity 4 with width 4 collapses to a single bucket, so all keys
        // collide by construction.
        let cache = CollisionBuilder::<u64, u64>::with_capacity(4)
            .bucket_size(4)
            .init_count(5)
            .max_counter_val(4096)
            .build_packed();

        for key in 0..4u64 {
            cache.put_replace(&key, key);
        }
        for _ in 0..1000 {
            assert_eq!(cache.get_if_present(&0), Some(0));
        }
        for key in 1..4u64 {
            for _ in 0..5 {
                assert_eq!(cache.get_if_present(&key), Some(key));
            }
        }

        cache.put_replace(&42, 42);
        assert_eq!(cache.get_if_present(&42), Some(42));
        assert_eq!(cache.get_if_present(&0), Some(0), "hot key was evicted");
        let cold_survivors = (1..4u64)
            .filter(|key| cache.get_if_present(key).is_some())
            .count();
        assert_eq!(cold_survivors, 2, "exactly one cold key should be displaced");
    }

    // Read-skewed residents dominate after a second wave of inserts sweeps
    // through every bucket.
    #[test]
    fn frequently_read_keys_dominate_survivors() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(64)
            .bucket_size(8)
            .init_count(0)
            .max_counter_val(256)
            .is_val_for_key(|key, val| val == key)
            .build_packed();

        for key in 0..128u64 {
            cache.put_replace(&key, key);
        }
        for key in (0..128u64).step_by(2) {
            for _ in 0..10 {
                cache.get_if_present(&key);
            }
        }
        for key in (1..128u64).step_by(2) {
            cache.get_if_present(&key);
        }
        for key in 128..192u64 {
            cache.put_replace(&key, key);
        }

        let evens = (0..128u64)
            .step_by(2)
            .filter(|key| cache.get_if_present(key).is_some())
            .count();
        let odds = (1..128u64)
            .step_by(2)
            .filter(|key| cache.get_if_present(key).is_some())
            .count();
        assert!(
            evens > odds,
            "survivors not read-skewed: {evens} even vs {odds} odd"
        );
    }
}

mod loader_contract {
    use super::*;

    #[test]
    fn aggressive_loader_returning_none_leaves_the_cache_untouched() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16).build_sparse();
        cache.put_replace(&1, 10);

        let got = cache.get_aggressive_with(&2, |_| None::<u64>, |_, v| v);
        assert_eq!(got, None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_if_present(&2), None);
        assert_eq!(cache.get_if_present(&1), Some(10));
    }

    #[test]
    fn mapper_runs_only_when_a_value_is_loaded() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16).build_sparse();
        let got = cache.get_aggressive_with(
            &3,
            |_| None::<u64>,
            |_, _| panic!("mapper must not run on a loader miss"),
        );
        assert_eq!(got, None);
    }

    #[test]
    fn get_then_get_if_present_agree() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16)
            .loader(|key| Some(key * 3))
            .build_sparse();
        let loaded = cache.get(&7);
        assert_eq!(loaded, Some(21));
        assert_eq!(cache.get_if_present(&7), loaded);
    }
}

mod removal {
    use super::*;

    // Removing from the middle of a full bucket shifts the tail down one
    // slot; the neighbors keep their values and the freed slot reappears at
    // the tail.
    #[test]
    fn middle_removal_compacts_the_bucket() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(4)
            .bucket_size(4)
            .build_packed();
        for key in 0..4u64 {
            cache.put_replace(&key, key * 10);
        }

        assert!(cache.remove(&1));
        assert_eq!(cache.get_if_present(&1), None);
        for key in [0u64, 2, 3] {
            assert_eq!(cache.get_if_present(&key), Some(key * 10));
        }
        // The hole must have been compacted to the tail: a space-only insert
        // succeeds without displacing anyone.
        assert_eq!(cache.put_if_space_absent(&9, 90), Some(90));
        for key in [0u64, 2, 3] {
            assert_eq!(cache.get_if_present(&key), Some(key * 10));
        }
    }

    #[test]
    fn double_remove_reports_absence() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16).build_sparse();
        cache.put_replace(&5, 50);
        assert!(cache.remove(&5));
        assert!(!cache.remove(&5));
    }

    #[test]
    fn clear_resets_both_shapes() {
        let sparse = CollisionBuilder::<u64, u64>::with_capacity(16).build_sparse();
        let packed = CollisionBuilder::<u64, u64>::with_capacity(16).build_packed();
        for key in 0..16u64 {
            sparse.put_replace(&key, key);
            packed.put_replace(&key, key);
        }
        sparse.clear();
        packed.clear();
        assert_eq!(sparse.len(), 0);
        for key in 0..16u64 {
            assert_eq!(sparse.get_if_present(&key), None);
            assert_eq!(packed.get_if_present(&key), None);
        }
    }
}

mod lazy_buckets {
    use super::*;

    #[test]
    fn lazy_table_allocates_only_touched_buckets() {
        let table: BucketTable<u64> = BucketTable::new(8, 4, true);
        assert!((0..8).all(|index| table.bucket_if_present(index).is_none()));

        let bucket = table.bucket(5);
        assert_eq!(bucket.width(), 4);
        let allocated = (0..8)
            .filter(|&index| table.bucket_if_present(index).is_some())
            .count();
        assert_eq!(allocated, 1);
    }

    #[test]
    fn lazy_cache_serves_reads_and_writes() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(64)
            .lazy_init_buckets(true)
            .strict_capacity(true)
            .build_sparse();
        assert_eq!(cache.get_if_present(&3), None);
        cache.put_replace(&3, 30);
        assert_eq!(cache.get_if_present(&3), Some(30));
        cache.clear();
        assert_eq!(cache.get_if_present(&3), None);
        assert_eq!(cache.len(), 0);
    }
}

mod round_trips {
    use super::*;

    #[test]
    fn put_if_absent_is_first_writer_wins() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16).build_packed();
        assert_eq!(cache.put_if_absent(&1, 11), 11);
        assert_eq!(cache.put_if_absent(&1, 12), 11);
        assert_eq!(cache.get_if_present(&1), Some(11));
    }

    #[test]
    fn put_replace_is_last_writer_wins() {
        let cache = CollisionBuilder::<u64, u64>::with_capacity(16).build_sparse();
        assert_eq!(cache.put_replace(&1, 11), 11);
        assert_eq!(cache.put_replace(&1, 12), 12);
        assert_eq!(cache.get_if_present(&1), Some(12));
    }
}

mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        // Values never detach from their keys under arbitrary single-thread
        // op interleavings, no matter how often eviction fires.
        #[test]
        fn arbitrary_ops_keep_key_value_agreement(
            ops in prop::collection::vec((0u8..4, 0u64..32), 1..200)
        ) {
            let cache = CollisionBuilder::<u64, u64>::with_capacity(8)
                .bucket_size(4)
                .build_sparse_with_factor(2.0);
            for (op, key) in ops {
                match op % 4 {
                    0 => { cache.put_replace(&key, key); }
                    1 => { cache.put_if_absent(&key, key); }
                    2 => { cache.remove(&key); }
                    _ => {
                        if let Some(val) = cache.get_if_present(&key) {
                            prop_assert_eq!(val, key);
                        }
                    }
                }
            }
            for key in 0..32u64 {
                if let Some(val) = cache.get_if_present(&key) {
                    prop_assert_eq!(val, key);
                }
            }
        }

        // A removed key stays gone and its bucket neighbors stay readable.
        #[test]
        fn removal_never_corrupts_neighbors(
            victim in 0u64..4,
        ) {
            let cache = CollisionBuilder::<u64, u64>::with_capacity(4)
                .bucket_size(4)
                .build_packed();
            for key in 0..4u64 {
                cache.put_replace(&key, key + 100);
            }
            prop_assert!(cache.remove(&victim));
            prop_assert_eq!(cache.get_if_present(&victim), None);
            for key in (0..4u64).filter(|&key| key != victim) {
                prop_assert_eq!(cache.get_if_present(&key), Some(key + 100));
            }
        }
    }
}
