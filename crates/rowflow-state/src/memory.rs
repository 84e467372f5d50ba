//! In-memory implementation of [`DimensionStore`].
//!
//! Backs inline dimension tables from pipeline YAML and tests. Counts
//! lookups so callers can verify that a cache actually avoids repeat calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rowflow_types::{DimensionEntry, Value};

use crate::backend::DimensionStore;
use crate::error::{self, StateError};

/// Dimension table held in memory, indexed by natural key.
pub struct InMemoryDimensionStore {
    key_arity: usize,
    entries: Vec<DimensionEntry>,
    by_key: HashMap<Vec<Value>, Vec<usize>>,
    lookups: AtomicU64,
}

impl InMemoryDimensionStore {
    /// Build a store from its entries.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::KeyArity`] if an entry's natural key does not
    /// have `key_arity` values.
    pub fn new(key_arity: usize, entries: Vec<DimensionEntry>) -> error::Result<Self> {
        let mut by_key: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (i, entry) in entries.iter().enumerate() {
            if entry.natural_key.len() != key_arity {
                return Err(StateError::KeyArity {
                    expected: key_arity,
                    actual: entry.natural_key.len(),
                });
            }
            by_key.entry(entry.natural_key.clone()).or_default().push(i);
        }
        Ok(Self {
            key_arity,
            entries,
            by_key,
            lookups: AtomicU64::new(0),
        })
    }

    /// Number of [`DimensionStore::lookup`] calls served so far.
    #[must_use]
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DimensionStore for InMemoryDimensionStore {
    fn key_arity(&self) -> usize {
        self.key_arity
    }

    fn lookup(&self, natural_key: &[Value]) -> error::Result<Vec<DimensionEntry>> {
        if natural_key.len() != self.key_arity {
            return Err(StateError::KeyArity {
                expected: self.key_arity,
                actual: natural_key.len(),
            });
        }
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .by_key
            .get(natural_key)
            .map(|idx| idx.iter().map(|&i| self.entries[i].clone()).collect())
            .unwrap_or_default())
    }

    fn load_all(&self) -> error::Result<Vec<DimensionEntry>> {
        Ok(self.entries.clone())
    }
}
