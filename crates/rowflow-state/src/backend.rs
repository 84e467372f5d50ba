//! Dimension store trait definition.
//!
//! [`DimensionStore`] is the resolver contract of the dimension lookup cache.
//! Model types live in [`rowflow_types::dimension`].

use rowflow_types::{DimensionEntry, Value};

use crate::error;

/// Read access to a slowly changing dimension table.
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn DimensionStore>`
/// from several step copies at once.
pub trait DimensionStore: Send + Sync {
    /// Number of natural key columns.
    fn key_arity(&self) -> usize;

    /// All versions stored for `natural_key`, in any order.
    ///
    /// An empty vector means the key is definitely not in the dimension.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn lookup(&self, natural_key: &[Value]) -> error::Result<Vec<DimensionEntry>>;

    /// Every version of every member, used to preload the lookup cache.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`](crate::error::StateError) on storage failure.
    fn load_all(&self) -> error::Result<Vec<DimensionEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn DimensionStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn DimensionStore) {}
    }
}
