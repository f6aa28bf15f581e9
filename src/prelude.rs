pub use crate::builder::{CollisionBuilder, ValueCollisionBuilder};
pub use crate::error::ConfigError;
pub use crate::policy::{
    PackedCollisionCache, PackedEntryCollisionCache, SparseCollisionCache,
    SparseEntryCollisionCache,
};
pub use crate::traits::CollisionCache;
