//! Slowly changing dimension lookup: interval ordering and the lookup cache.

pub mod cache;
pub mod interval;

pub use cache::{CacheMode, DimensionCache, PreloadedIndex};
pub use interval::{compare_intervals, find_version, sort_versions};
