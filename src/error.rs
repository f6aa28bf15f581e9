//! Error types for the collision-cache library.
//!
//! ## Key Components
//!
//! - [`ConfigError`]: Returned when cache configuration parameters are invalid
//!   (e.g. zero capacity, out-of-range counter settings).
//!
//! ## Example Usage
//!
//! ```
//! use collision_cache::builder::CollisionBuilder;
//! use collision_cache::error::ConfigError;
//! use collision_cache::policy::SparseEntryCollisionCache;
//!
//! // Fallible terminal for user-configurable parameters
//! let cache: Result<SparseEntryCollisionCache<u64, u64>, ConfigError> =
//!     CollisionBuilder::with_capacity(100).try_build_sparse();
//! assert!(cache.is_ok());
//!
//! // Invalid counter ceiling is caught without panicking
//! let bad = CollisionBuilder::<u64, u64>::with_capacity(100)
//!     .max_counter_val(10)
//!     .try_build_sparse();
//! assert!(bad.is_err());
//! ```

use std::fmt;

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by the builder's `try_build_*` terminals. Carries a
/// human-readable description of which parameter failed validation.
///
/// # Example
///
/// ```
/// use collision_cache::builder::CollisionBuilder;
///
/// let err = CollisionBuilder::<u64, u64>::with_capacity(0)
///     .try_build_packed()
///     .unwrap_err();
/// assert!(err.to_string().contains("capacity"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(String);

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}
