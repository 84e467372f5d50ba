//! Typed field values.
//!
//! [`Value`] is the tagged union carried in every [`Row`](crate::row::Row)
//! position. Equality and hashing are null-safe (`Null == Null`) and strict
//! per variant, which is what group-key comparison needs. Cross-type ordering
//! for sorting and min/max lives in [`Value::compare`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use bigdecimal::{BigDecimal, FromPrimitive, ToPrimitive};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Default rendering for date values.
pub const DEFAULT_DATE_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    #[serde(alias = "bigdecimal")]
    BigNumber,
    Date,
    Boolean,
}

impl ValueType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::BigNumber => "bignumber",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }

    /// Whether values of this type can be summed and averaged.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number | Self::BigNumber)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Null,
    String(String),
    Integer(i64),
    Number(f64),
    BigNumber(BigDecimal),
    Date(NaiveDateTime),
    Boolean(bool),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Semantic type of a non-null value.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::String(_) => Some(ValueType::String),
            Self::Integer(_) => Some(ValueType::Integer),
            Self::Number(_) => Some(ValueType::Number),
            Self::BigNumber(_) => Some(ValueType::BigNumber),
            Self::Date(_) => Some(ValueType::Date),
            Self::Boolean(_) => Some(ValueType::Boolean),
        }
    }

    /// Numeric view of the value. Strings, dates and booleans yield `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => {
                #[allow(clippy::cast_precision_loss)]
                let f = *v as f64;
                Some(f)
            }
            Self::Number(v) => Some(*v),
            Self::BigNumber(v) => v.to_f64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            #[allow(clippy::cast_possible_truncation)]
            Self::Number(v) if v.is_finite() => Some(v.round() as i64),
            Self::BigNumber(v) => v.round(0).to_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_big_decimal(&self) -> Option<BigDecimal> {
        match self {
            Self::Integer(v) => Some(BigDecimal::from(*v)),
            Self::Number(v) => BigDecimal::from_f64(*v),
            Self::BigNumber(v) => Some(v.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// String rendering used for key matching, concatenation and display.
    /// Returns `None` for null.
    #[must_use]
    pub fn to_display_string(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::String(s) => Some(s.clone()),
            Self::Integer(v) => Some(v.to_string()),
            Self::Number(v) => Some(v.to_string()),
            Self::BigNumber(v) => Some(v.normalized().to_string()),
            Self::Date(d) => Some(d.format(DEFAULT_DATE_FORMAT).to_string()),
            Self::Boolean(b) => Some(b.to_string()),
        }
    }

    /// Total ordering across all values: null sorts first, numeric variants
    /// compare by magnitude, other mixed-type pairs order by type rank.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Null, _) => Ordering::Less,
            (_, Self::Null) => Ordering::Greater,
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Integer(a), Self::Integer(b)) => a.cmp(b),
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::BigNumber(a), Self::BigNumber(b)) => a.cmp(b),
            (Self::Date(a), Self::Date(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            (Self::BigNumber(_), _) | (_, Self::BigNumber(_)) => {
                match (self.as_big_decimal(), other.as_big_decimal()) {
                    (Some(a), Some(b)) => a.cmp(&b),
                    _ => self.type_rank().cmp(&other.type_rank()),
                }
            }
            (Self::Integer(_) | Self::Number(_), Self::Integer(_) | Self::Number(_)) => {
                let a = self.as_f64().unwrap_or_default();
                let b = other.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Boolean(_) => 1,
            Self::Integer(_) | Self::Number(_) | Self::BigNumber(_) => 2,
            Self::Date(_) => 3,
            Self::String(_) => 4,
        }
    }

    /// JSON rendering for row sinks.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Integer(v) => serde_json::Value::from(*v),
            Self::Number(v) => serde_json::Number::from_f64(*v)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::BigNumber(v) => serde_json::Value::String(v.normalized().to_string()),
            Self::Date(d) => serde_json::Value::String(d.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            Self::Boolean(b) => serde_json::Value::Bool(*b),
        }
    }

    /// Parse a big number from its canonical string form.
    #[must_use]
    pub fn big_number(text: &str) -> Option<Self> {
        BigDecimal::from_str(text).ok().map(Self::BigNumber)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b) == Ordering::Equal,
            (Self::BigNumber(a), Self::BigNumber(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::String(s) => s.hash(state),
            Self::Integer(v) => v.hash(state),
            Self::Number(v) => v.to_bits().hash(state),
            // Numerically equal decimals (1.0 and 1.00) must hash alike.
            Self::BigNumber(v) => v.normalized().to_string().hash(state),
            Self::Date(d) => d.hash(state),
            Self::Boolean(b) => b.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_display_string() {
            Some(s) => f.write_str(&s),
            None => f.write_str("<null>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Self::Date(v)
    }
}

impl From<BigDecimal> for Value {
    fn from(v: BigDecimal) -> Self {
        Self::BigNumber(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
