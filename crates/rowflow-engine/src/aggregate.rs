//! Aggregation kinds and their running accumulators.
//!
//! Shared by the group-by and denormaliser operators. An [`Accumulator`]
//! folds one value per row and yields a single result value when its group
//! closes.

use std::collections::HashSet;

use bigdecimal::{BigDecimal, FromPrimitive};
use rowflow_types::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// How the values of one subject field are combined over a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Keep the last value seen, null included.
    #[serde(alias = "none")]
    Overwrite,
    Sum,
    #[serde(alias = "avg")]
    Average,
    Min,
    Max,
    /// Rows in the group, regardless of nulls.
    #[serde(alias = "count")]
    CountAll,
    /// Non-null values joined with a separator.
    Concat,
    /// First non-null value.
    First,
    /// Last non-null value.
    Last,
    /// Distinct non-null values.
    CountDistinct,
}

impl AggregationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Overwrite => "overwrite",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Min => "min",
            Self::Max => "max",
            Self::CountAll => "count_all",
            Self::Concat => "concat",
            Self::First => "first",
            Self::Last => "last",
            Self::CountDistinct => "count_distinct",
        }
    }

    /// Whether the subject must hold numeric values.
    #[must_use]
    pub fn needs_numeric(self) -> bool {
        matches!(self, Self::Sum | Self::Average)
    }

    /// Whether the result of this kind can be stored in a `target` field.
    ///
    /// Counts are integers and concatenations are strings whatever the
    /// subject, so only some target types can hold them.
    #[must_use]
    pub fn fits_target(self, target: ValueType) -> bool {
        match self {
            Self::Concat => target == ValueType::String,
            Self::CountAll | Self::CountDistinct => {
                target.is_numeric() || target == ValueType::String
            }
            _ => true,
        }
    }

    /// Whether a subject field is optional.
    #[must_use]
    pub fn subject_optional(self) -> bool {
        matches!(self, Self::CountAll)
    }

    /// Type of the result for a subject of type `subject`.
    ///
    /// With an unknown subject type (no input rows), sums and averages report
    /// `number` and value-preserving kinds report `string`.
    #[must_use]
    pub fn result_type(self, subject: Option<ValueType>) -> ValueType {
        match self {
            Self::CountAll | Self::CountDistinct => ValueType::Integer,
            Self::Concat => ValueType::String,
            Self::Average => match subject {
                Some(ValueType::BigNumber) => ValueType::BigNumber,
                _ => ValueType::Number,
            },
            Self::Sum => subject
                .filter(|t| t.is_numeric())
                .unwrap_or(ValueType::Number),
            Self::Overwrite | Self::Min | Self::Max | Self::First | Self::Last => {
                subject.unwrap_or(ValueType::String)
            }
        }
    }
}

impl std::fmt::Display for AggregationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value that cannot be folded into the current group.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregateError {
    #[error("{kind} needs a numeric value, got {found}")]
    NotNumeric { kind: AggregationKind, found: String },
    #[error("{kind} exceeds the integer range")]
    Overflow { kind: AggregationKind },
}

impl AggregateError {
    /// Row error code reported for this failure.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotNumeric { .. } => "NOT_NUMERIC",
            Self::Overflow { .. } => "INTEGER_OVERFLOW",
        }
    }
}

#[derive(Debug, Clone)]
enum State {
    Overwrite(Value),
    Sum(Option<Value>),
    Average {
        sum: Option<Value>,
        count: u64,
        /// A big number was folded, so the mean stays exact.
        exact: bool,
    },
    Extreme(Option<Value>),
    Count(i64),
    Concat(Vec<String>),
    Pick(Option<Value>),
    Distinct(HashSet<Value>),
}

/// Running state of one aggregation over the current group.
#[derive(Debug, Clone)]
pub struct Accumulator {
    kind: AggregationKind,
    separator: String,
    state: State,
}

/// Default separator for [`AggregationKind::Concat`].
pub const DEFAULT_SEPARATOR: &str = ", ";

impl Accumulator {
    #[must_use]
    pub fn new(kind: AggregationKind) -> Self {
        Self::with_separator(kind, DEFAULT_SEPARATOR)
    }

    #[must_use]
    pub fn with_separator(kind: AggregationKind, separator: impl Into<String>) -> Self {
        let mut acc = Self {
            kind,
            separator: separator.into(),
            state: State::Count(0),
        };
        acc.reset();
        acc
    }

    #[must_use]
    pub fn kind(&self) -> AggregationKind {
        self.kind
    }

    /// Start a new group.
    pub fn reset(&mut self) {
        self.state = match self.kind {
            AggregationKind::Overwrite => State::Overwrite(Value::Null),
            AggregationKind::Sum => State::Sum(None),
            AggregationKind::Average => State::Average {
                sum: None,
                count: 0,
                exact: false,
            },
            AggregationKind::Min | AggregationKind::Max => State::Extreme(None),
            AggregationKind::CountAll => State::Count(0),
            AggregationKind::Concat => State::Concat(Vec::new()),
            AggregationKind::First | AggregationKind::Last => State::Pick(None),
            AggregationKind::CountDistinct => State::Distinct(HashSet::new()),
        };
    }

    /// Check that `value` can be folded, without folding it.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::NotNumeric`] for a non-null, non-numeric
    /// value under a numeric aggregation, and [`AggregateError::Overflow`]
    /// when an integer sum would leave the integer range.
    pub fn check(&self, value: &Value) -> Result<(), AggregateError> {
        if self.kind.needs_numeric() && !value.is_null() && value.as_f64().is_none() {
            return Err(AggregateError::NotNumeric {
                kind: self.kind,
                found: value
                    .value_type()
                    .map_or_else(|| "null".to_string(), |t| t.to_string()),
            });
        }
        if let (State::Sum(Some(Value::Integer(total))), Value::Integer(v)) = (&self.state, value) {
            if total.checked_add(*v).is_none() {
                return Err(AggregateError::Overflow { kind: self.kind });
            }
        }
        Ok(())
    }

    /// Fold one row's value into the group.
    ///
    /// # Errors
    ///
    /// Same as [`Accumulator::check`]; the state is untouched on error.
    pub fn fold(&mut self, value: &Value) -> Result<(), AggregateError> {
        self.check(value)?;
        match &mut self.state {
            State::Overwrite(current) => *current = value.clone(),
            State::Count(n) => *n += 1,
            _ if value.is_null() => {}
            State::Sum(total) => *total = Some(add(total.take(), value)),
            State::Average { sum, count, exact } => {
                *exact |= matches!(value, Value::BigNumber(_));
                *sum = Some(add(sum.take(), value));
                *count += 1;
            }
            State::Extreme(current) => {
                let replace = match current {
                    None => true,
                    Some(c) => {
                        let ord = value.compare(c);
                        if self.kind == AggregationKind::Min {
                            ord.is_lt()
                        } else {
                            ord.is_gt()
                        }
                    }
                };
                if replace {
                    *current = Some(value.clone());
                }
            }
            State::Concat(parts) => {
                if let Some(s) = value.to_display_string() {
                    parts.push(s);
                }
            }
            State::Pick(current) => {
                if self.kind == AggregationKind::Last || current.is_none() {
                    *current = Some(value.clone());
                }
            }
            State::Distinct(seen) => {
                seen.insert(value.clone());
            }
        }
        Ok(())
    }

    /// Result for the current group. Empty groups yield null, or zero for
    /// counts.
    #[must_use]
    pub fn result(&self) -> Value {
        match &self.state {
            State::Overwrite(v) => v.clone(),
            State::Sum(total) => total.clone().unwrap_or(Value::Null),
            State::Average { sum, count, exact } => average(sum.as_ref(), *count, *exact),
            State::Extreme(v) | State::Pick(v) => v.clone().unwrap_or(Value::Null),
            State::Count(n) => Value::Integer(*n),
            State::Concat(parts) if parts.is_empty() => Value::Null,
            State::Concat(parts) => Value::String(parts.join(&self.separator)),
            State::Distinct(seen) => {
                Value::Integer(i64::try_from(seen.len()).unwrap_or(i64::MAX))
            }
        }
    }
}

/// Add two numeric values, widening integer to big number on overflow.
///
/// Only running means widen; integer sums reject overflow in
/// [`Accumulator::check`].
fn add(total: Option<Value>, value: &Value) -> Value {
    let Some(total) = total else {
        return value.clone();
    };
    match (&total, value) {
        (Value::Integer(a), Value::Integer(b)) => a.checked_add(*b).map_or_else(
            || Value::BigNumber(BigDecimal::from(*a) + BigDecimal::from(*b)),
            Value::Integer,
        ),
        (Value::BigNumber(_), _) | (_, Value::BigNumber(_)) => {
            match (total.as_big_decimal(), value.as_big_decimal()) {
                (Some(a), Some(b)) => Value::BigNumber(a + b),
                _ => total,
            }
        }
        _ => Value::Number(total.as_f64().unwrap_or_default() + value.as_f64().unwrap_or_default()),
    }
}

fn average(sum: Option<&Value>, count: u64, exact: bool) -> Value {
    let Some(sum) = sum else {
        return Value::Null;
    };
    if count == 0 {
        return Value::Null;
    }
    match sum {
        Value::BigNumber(total) if exact => BigDecimal::from_u64(count)
            .map_or(Value::Null, |n| Value::BigNumber(total.clone() / n)),
        other => {
            #[allow(clippy::cast_precision_loss)]
            let n = count as f64;
            other.as_f64().map_or(Value::Null, |s| Value::Number(s / n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_all(kind: AggregationKind, values: &[Value]) -> Value {
        let mut acc = Accumulator::new(kind);
        for v in values {
            acc.fold(v).unwrap();
        }
        acc.result()
    }

    #[test]
    fn sum_skips_nulls() {
        let v = fold_all(
            AggregationKind::Sum,
            &[Value::Integer(1), Value::Null, Value::Integer(2)],
        );
        assert_eq!(v, Value::Integer(3));
    }

    #[test]
    fn sum_of_only_nulls_is_null() {
        assert_eq!(fold_all(AggregationKind::Sum, &[Value::Null, Value::Null]), Value::Null);
    }

    #[test]
    fn integer_sum_overflow_is_rejected_without_folding() {
        let mut acc = Accumulator::new(AggregationKind::Sum);
        acc.fold(&Value::Integer(i64::MAX)).unwrap();
        let err = acc.fold(&Value::Integer(1)).unwrap_err();
        assert_eq!(err.code(), "INTEGER_OVERFLOW");
        assert_eq!(acc.result(), Value::Integer(i64::MAX));
        acc.fold(&Value::Integer(-1)).unwrap();
        assert_eq!(acc.result(), Value::Integer(i64::MAX - 1));
    }

    #[test]
    fn average_of_overflowing_integers_is_a_number() {
        let v = fold_all(
            AggregationKind::Average,
            &[Value::Integer(i64::MAX), Value::Integer(i64::MAX)],
        );
        assert_eq!(v.value_type(), Some(ValueType::Number));
        #[allow(clippy::cast_precision_loss)]
        let expected = i64::MAX as f64;
        assert_eq!(v, Value::Number(expected));
    }

    #[test]
    fn results_carry_their_declared_type() {
        let cases = [
            (ValueType::Integer, vec![Value::Integer(i64::MAX - 1), Value::Integer(1)]),
            (ValueType::Number, vec![Value::Number(1.5), Value::Number(2.0)]),
            (
                ValueType::BigNumber,
                vec![Value::big_number("1.5").unwrap(), Value::big_number("2").unwrap()],
            ),
            (ValueType::String, vec![Value::from("a"), Value::from("b")]),
        ];
        let kinds = [
            AggregationKind::Overwrite,
            AggregationKind::Sum,
            AggregationKind::Average,
            AggregationKind::Min,
            AggregationKind::Max,
            AggregationKind::CountAll,
            AggregationKind::Concat,
            AggregationKind::First,
            AggregationKind::Last,
            AggregationKind::CountDistinct,
        ];
        for (subject, values) in &cases {
            for kind in kinds {
                if kind.needs_numeric() && !subject.is_numeric() {
                    continue;
                }
                let v = fold_all(kind, values);
                assert_eq!(
                    v.value_type(),
                    Some(kind.result_type(Some(*subject))),
                    "{kind} over {subject}"
                );
            }
        }
    }

    #[test]
    fn average_divides_by_non_null_count() {
        let v = fold_all(
            AggregationKind::Average,
            &[Value::Integer(1), Value::Null, Value::Integer(4)],
        );
        assert_eq!(v, Value::Number(2.5));
    }

    #[test]
    fn average_of_big_numbers_stays_big() {
        let v = fold_all(
            AggregationKind::Average,
            &[
                Value::big_number("1.5").unwrap(),
                Value::big_number("2.5").unwrap(),
            ],
        );
        assert_eq!(v.value_type(), Some(ValueType::BigNumber));
        assert_eq!(v.as_f64(), Some(2.0));
    }

    #[test]
    fn min_max_are_null_safe() {
        let values = [Value::Null, Value::Integer(5), Value::Integer(2), Value::Null];
        assert_eq!(fold_all(AggregationKind::Min, &values), Value::Integer(2));
        assert_eq!(fold_all(AggregationKind::Max, &values), Value::Integer(5));
        assert_eq!(fold_all(AggregationKind::Min, &[Value::Null]), Value::Null);
    }

    #[test]
    fn count_all_counts_nulls() {
        let v = fold_all(AggregationKind::CountAll, &[Value::Null, Value::Integer(1)]);
        assert_eq!(v, Value::Integer(2));
    }

    #[test]
    fn concat_skips_nulls_and_uses_separator() {
        let mut acc = Accumulator::with_separator(AggregationKind::Concat, "|");
        for v in [Value::from("a"), Value::Null, Value::from("b")] {
            acc.fold(&v).unwrap();
        }
        assert_eq!(acc.result(), Value::from("a|b"));
    }

    #[test]
    fn first_last_and_overwrite() {
        let values = [Value::Null, Value::from("x"), Value::from("y"), Value::Null];
        assert_eq!(fold_all(AggregationKind::First, &values), Value::from("x"));
        assert_eq!(fold_all(AggregationKind::Last, &values), Value::from("y"));
        assert_eq!(fold_all(AggregationKind::Overwrite, &values), Value::Null);
    }

    #[test]
    fn count_distinct_ignores_nulls() {
        let values = [Value::from("a"), Value::Null, Value::from("a"), Value::from("b")];
        assert_eq!(fold_all(AggregationKind::CountDistinct, &values), Value::Integer(2));
    }

    #[test]
    fn non_numeric_sum_is_rejected_without_folding() {
        let mut acc = Accumulator::new(AggregationKind::Sum);
        acc.fold(&Value::Integer(4)).unwrap();
        let err = acc.fold(&Value::from("oops")).unwrap_err();
        assert_eq!(
            err,
            AggregateError::NotNumeric {
                kind: AggregationKind::Sum,
                found: "string".into()
            }
        );
        assert_eq!(acc.result(), Value::Integer(4));
    }

    #[test]
    fn reset_starts_a_new_group() {
        let mut acc = Accumulator::new(AggregationKind::CountAll);
        acc.fold(&Value::Null).unwrap();
        acc.reset();
        assert_eq!(acc.result(), Value::Integer(0));
    }

    #[test]
    fn result_types_follow_subject() {
        assert_eq!(
            AggregationKind::Sum.result_type(Some(ValueType::Integer)),
            ValueType::Integer
        );
        assert_eq!(
            AggregationKind::Average.result_type(Some(ValueType::Integer)),
            ValueType::Number
        );
        assert_eq!(
            AggregationKind::Average.result_type(Some(ValueType::BigNumber)),
            ValueType::BigNumber
        );
        assert_eq!(
            AggregationKind::CountAll.result_type(Some(ValueType::Date)),
            ValueType::Integer
        );
        assert_eq!(
            AggregationKind::Concat.result_type(Some(ValueType::Integer)),
            ValueType::String
        );
    }

    #[test]
    fn counts_and_concat_only_fit_compatible_targets() {
        assert!(AggregationKind::Concat.fits_target(ValueType::String));
        assert!(!AggregationKind::Concat.fits_target(ValueType::Integer));
        assert!(AggregationKind::CountAll.fits_target(ValueType::BigNumber));
        assert!(!AggregationKind::CountDistinct.fits_target(ValueType::Date));
        assert!(!AggregationKind::CountAll.fits_target(ValueType::Boolean));
        assert!(AggregationKind::Max.fits_target(ValueType::Date));
    }

    #[test]
    fn serde_accepts_aliases() {
        let kind: AggregationKind = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(kind, AggregationKind::Overwrite);
        let kind: AggregationKind = serde_json::from_str("\"count_all\"").unwrap();
        assert_eq!(kind, AggregationKind::CountAll);
    }
}
