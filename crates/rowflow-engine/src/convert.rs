//! Value conversion between semantic types.
//!
//! Text is parsed with an optional [`ConversionFormat`]: a chrono pattern for
//! dates and decimal, grouping and currency symbols for numbers.

use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{NaiveDate, NaiveDateTime};
use rowflow_types::value::DEFAULT_DATE_FORMAT;
use rowflow_types::{Value, ValueType};
use serde::{Deserialize, Serialize};

/// Formatting hints for text conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFormat {
    /// chrono pattern for dates, e.g. `%Y-%m-%d`.
    #[serde(default, alias = "format", skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimal: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<char>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Patterns tried, in order, when no date pattern is configured.
const FALLBACK_DATE_PATTERNS: [&str; 5] = [
    DEFAULT_DATE_FORMAT,
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d",
];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot convert '{value}' to {target}")]
pub struct ConversionError {
    pub value: String,
    pub target: ValueType,
}

impl ConversionFormat {
    /// Turn localized numeric text into a plain `123.45` form.
    fn normalize_number(&self, text: &str) -> String {
        let mut s = text.trim().to_string();
        if let Some(currency) = self.currency.as_deref().filter(|c| !c.is_empty()) {
            s = s.replace(currency, "");
        }
        let grouping = self.grouping;
        let decimal = self.decimal.unwrap_or('.');
        s.chars()
            .filter(|c| !c.is_whitespace() && Some(*c) != grouping)
            .map(|c| if c == decimal { '.' } else { c })
            .collect()
    }

    fn date_pattern(&self) -> &str {
        self.pattern.as_deref().unwrap_or(DEFAULT_DATE_FORMAT)
    }

    fn parse_date(&self, text: &str) -> Option<NaiveDateTime> {
        match self.pattern.as_deref() {
            Some(pattern) => parse_date(text, pattern),
            None => FALLBACK_DATE_PATTERNS
                .iter()
                .find_map(|pattern| parse_date(text, pattern)),
        }
    }
}

/// Convert `value` to `target`. Null stays null; empty text becomes null.
///
/// # Errors
///
/// Returns [`ConversionError`] if the value cannot be represented as `target`.
pub fn convert_value(
    value: &Value,
    target: ValueType,
    format: &ConversionFormat,
) -> Result<Value, ConversionError> {
    let fail = || ConversionError {
        value: value.to_display_string().unwrap_or_default(),
        target,
    };
    if value.value_type() == Some(target) {
        return Ok(value.clone());
    }
    let out = match (value, target) {
        (Value::Null, _) => Value::Null,
        (Value::String(text), _) => return parse_text(text, target, format).ok_or_else(fail),
        (Value::Date(d), ValueType::String) => Value::String(d.format(format.date_pattern()).to_string()),
        (_, ValueType::String) => Value::String(value.to_display_string().unwrap_or_default()),
        (Value::Integer(_) | Value::Number(_) | Value::BigNumber(_), ValueType::Integer) => {
            Value::Integer(value.as_i64().ok_or_else(fail)?)
        }
        (Value::Integer(_) | Value::Number(_) | Value::BigNumber(_), ValueType::Number) => {
            Value::Number(value.as_f64().ok_or_else(fail)?)
        }
        (Value::Integer(_) | Value::Number(_), ValueType::BigNumber) => {
            Value::BigNumber(value.as_big_decimal().ok_or_else(fail)?)
        }
        (Value::Boolean(b), ValueType::Integer) => Value::Integer(i64::from(*b)),
        (Value::Boolean(b), ValueType::Number) => Value::Number(if *b { 1.0 } else { 0.0 }),
        (Value::Integer(i), ValueType::Boolean) => Value::Boolean(*i != 0),
        (Value::Number(f), ValueType::Boolean) => Value::Boolean(*f != 0.0),
        (Value::BigNumber(d), ValueType::Boolean) => Value::Boolean(d.to_f64().is_some_and(|f| f != 0.0)),
        _ => return Err(fail()),
    };
    Ok(out)
}

fn parse_text(text: &str, target: ValueType, format: &ConversionFormat) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(Value::Null);
    }
    let value = match target {
        ValueType::String => Value::String(text.to_string()),
        ValueType::Integer => {
            let normalized = format.normalize_number(trimmed);
            Value::Integer(normalized.parse().ok()?)
        }
        ValueType::Number => {
            let normalized = format.normalize_number(trimmed);
            let f: f64 = normalized.parse().ok()?;
            if !f.is_finite() {
                return None;
            }
            Value::Number(f)
        }
        ValueType::BigNumber => {
            let normalized = format.normalize_number(trimmed);
            Value::BigNumber(BigDecimal::from_str(&normalized).ok()?)
        }
        ValueType::Date => Value::Date(format.parse_date(trimmed)?),
        ValueType::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "y" | "yes" | "true" | "1" => Value::Boolean(true),
            "n" | "no" | "false" | "0" => Value::Boolean(false),
            _ => return None,
        },
    };
    Some(value)
}

/// Parse with the pattern as a timestamp, then as a bare date at midnight.
pub fn parse_date(text: &str, pattern: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, pattern).ok().or_else(|| {
        NaiveDate::parse_from_str(text, pattern)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Scalar JSON (or YAML) value as an untyped [`Value`]. Arrays and objects
/// have no row representation and yield `None`.
#[must_use]
pub fn json_to_value(json: &serde_json::Value) -> Option<Value> {
    match json {
        serde_json::Value::Null => Some(Value::Null),
        serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Number)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
    }
}
