//! Shared rowflow row, value, and error model types.
//!
//! Kept free of async and storage dependencies so that stores, operators and
//! embedding applications can all agree on the same data contracts.

pub mod dimension;
pub mod error;
pub mod metric;
pub mod policy;
pub mod row;
pub mod value;

pub use dimension::DimensionEntry;
pub use error::{ErrorCategory, ErrorScope, StepError};
pub use metric::{StepStatus, StepSummary};
pub use policy::RowErrorPolicy;
pub use row::{FieldMeta, Row, RowSchema, SchemaRef};
pub use value::{Value, ValueType};
