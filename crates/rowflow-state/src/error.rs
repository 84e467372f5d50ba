//! Dimension store error types.

/// Errors produced by [`DimensionStore`](crate::DimensionStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying `SQLite` failure.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// File-system I/O failure (e.g. the database file is missing).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value could not be read as the declared type.
    #[error("column '{column}' holds an unreadable value: {value}")]
    InvalidValue { column: String, value: String },

    /// The natural key passed to a lookup has the wrong arity.
    #[error("natural key has {actual} value(s), store expects {expected}")]
    KeyArity { expected: usize, actual: usize },

    /// The table description is inconsistent.
    #[error("invalid dimension table: {0}")]
    InvalidTable(String),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("dimension store lock poisoned")]
    LockPoisoned,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;
