//! Dimension table stores for the rowflow engine.
//!
//! Provides the [`DimensionStore`] trait consumed by the dimension lookup
//! cache, an [`InMemoryDimensionStore`] for inline tables and tests, and a
//! [`SqliteDimensionStore`] reading a dimension table from a `SQLite`
//! database.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use backend::DimensionStore;
pub use error::StateError;
pub use memory::InMemoryDimensionStore;
pub use sqlite::{SqliteDimensionStore, SqliteTableLayout};
