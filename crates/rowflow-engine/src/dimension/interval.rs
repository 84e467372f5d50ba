//! Ordering and search over validity intervals.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use rowflow_types::DimensionEntry;

pub type Bound = Option<NaiveDateTime>;

/// Total order over `(from, to)` intervals.
///
/// Intervals sort by `from` with a null `from` first, then by `to` with a
/// null `to` last.
#[must_use]
pub fn compare_intervals(a: (Bound, Bound), b: (Bound, Bound)) -> Ordering {
    compare_from(a.0, b.0).then_with(|| compare_to(a.1, b.1))
}

fn compare_from(a: Bound, b: Bound) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

fn compare_to(a: Bound, b: Bound) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(&y),
    }
}

/// Sort the versions of one member by their validity interval.
pub fn sort_versions(versions: &mut [DimensionEntry]) {
    versions.sort_by(|a, b| compare_intervals(a.interval(), b.interval()));
}

/// Version valid at `as_of` among `versions` sorted with [`sort_versions`].
///
/// Binary search for the last version starting at or before `as_of`, then
/// check that it has not ended yet.
#[must_use]
pub fn find_version(versions: &[DimensionEntry], as_of: NaiveDateTime) -> Option<&DimensionEntry> {
    let starts_before = versions.partition_point(|v| v.valid_from.map_or(true, |from| from <= as_of));
    versions[..starts_before]
        .iter()
        .rev()
        .find(|v| v.contains(as_of))
}
