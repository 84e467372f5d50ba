//! Slowly changing dimension model types.

use chrono::NaiveDateTime;

use crate::value::Value;

/// One version of a dimension member.
///
/// The version is valid over `[valid_from, valid_to)`. A `None` bound is
/// unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionEntry {
    pub natural_key: Vec<Value>,
    pub surrogate_id: i64,
    pub valid_from: Option<NaiveDateTime>,
    pub valid_to: Option<NaiveDateTime>,
}

impl DimensionEntry {
    #[must_use]
    pub fn new(
        natural_key: Vec<Value>,
        surrogate_id: i64,
        valid_from: Option<NaiveDateTime>,
        valid_to: Option<NaiveDateTime>,
    ) -> Self {
        Self {
            natural_key,
            surrogate_id,
            valid_from,
            valid_to,
        }
    }

    /// Whether `as_of` falls inside `[valid_from, valid_to)`.
    #[must_use]
    pub fn contains(&self, as_of: NaiveDateTime) -> bool {
        self.valid_from.map_or(true, |from| from <= as_of)
            && self.valid_to.map_or(true, |to| as_of < to)
    }

    /// The validity interval as a `(from, to)` pair.
    #[must_use]
    pub fn interval(&self) -> (Option<NaiveDateTime>, Option<NaiveDateTime>) {
        (self.valid_from, self.valid_to)
    }
}
