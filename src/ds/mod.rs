pub mod bucket_table;
pub mod log_counters;

pub use bucket_table::{Bucket, BucketTable};
pub use log_counters::LogCounters;
