//! Structured error model for step execution.
//!
//! [`StepError`] carries a category, a blast radius ([`ErrorScope`]) and an
//! optional offending field name. Construct via category-specific factory
//! methods; row-scoped errors are subject to the step's row error policy,
//! step-scoped errors are fatal for the run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Broad classification of a step error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid step configuration.
    Config,
    /// A configured field is missing from, or mistyped in, the input schema.
    Schema,
    /// A value could not be processed (conversion, aggregation type mismatch).
    Data,
    /// File-system failure (spill files, output files).
    Io,
    /// External lookup failure (dimension store).
    Lookup,
    /// Row queue or runtime failure.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Config => "config",
            Self::Schema => "schema",
            Self::Data => "data",
            Self::Io => "io",
            Self::Lookup => "lookup",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Blast radius of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorScope {
    /// Aborts the whole step (and therefore the run).
    Step,
    /// Affects a single row.
    Row,
}

impl fmt::Display for ErrorScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Step => "step",
            Self::Row => "row",
        };
        f.write_str(s)
    }
}

/// Structured error from a step operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub scope: ErrorScope,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl StepError {
    fn new(
        category: ErrorCategory,
        scope: ErrorScope,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            scope,
            code: code.into(),
            message: message.into(),
            field: None,
        }
    }

    /// Configuration error (fatal).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, ErrorScope::Step, code, message)
    }

    /// Schema resolution error (fatal).
    #[must_use]
    pub fn schema(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Schema, ErrorScope::Step, code, message)
    }

    /// Bad value in a single row (row scope).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, ErrorScope::Row, code, message)
    }

    /// File-system failure (fatal).
    #[must_use]
    pub fn io(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Io, ErrorScope::Step, code, message)
    }

    /// External lookup failure (fatal).
    #[must_use]
    pub fn lookup(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Lookup, ErrorScope::Step, code, message)
    }

    /// Runtime failure (fatal).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, ErrorScope::Step, code, message)
    }

    /// Shorthand for the most common setup failure.
    #[must_use]
    pub fn field_not_found(field: &str, step: &str) -> Self {
        Self::schema(
            "FIELD_NOT_FOUND",
            format!("field '{field}' required by step '{step}' is not in the input row"),
        )
        .with_field(field)
    }

    /// Name the offending field.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Override the default error scope.
    #[must_use]
    pub fn with_scope(mut self, scope: ErrorScope) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn is_row_level(&self) -> bool {
        self.scope == ErrorScope::Row
    }
}
