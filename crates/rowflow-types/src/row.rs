//! Row schemas and rows.
//!
//! A [`RowSchema`] is shared by reference ([`SchemaRef`]) between every row
//! that a step emits; rows themselves only own their values.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

/// Descriptor for one position of a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl FieldMeta {
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            length: None,
            precision: None,
        }
    }

    #[must_use]
    pub fn with_length(mut self, length: Option<u32>, precision: Option<u32>) -> Self {
        self.length = length;
        self.precision = precision;
        self
    }
}

/// Ordered list of field descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<FieldMeta>,
}

/// Shared schema handle carried by every row.
pub type SchemaRef = Arc<RowSchema>;

impl RowSchema {
    #[must_use]
    pub fn new(fields: Vec<FieldMeta>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldMeta] {
        &self.fields
    }

    #[must_use]
    pub fn field(&self, index: usize) -> Option<&FieldMeta> {
        self.fields.get(index)
    }

    /// Position of the first field called `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// New schema with `extra` appended after the existing fields.
    #[must_use]
    pub fn extended(&self, extra: impl IntoIterator<Item = FieldMeta>) -> Self {
        let mut fields = self.fields.clone();
        fields.extend(extra);
        Self { fields }
    }

    /// New schema holding only the listed positions, in the given order.
    #[must_use]
    pub fn project(&self, positions: &[usize]) -> Self {
        Self {
            fields: positions
                .iter()
                .filter_map(|&i| self.fields.get(i).cloned())
                .collect(),
        }
    }
}

impl fmt::Display for RowSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields
            .iter()
            .map(|m| format!("{}:{}", m.name, m.value_type))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

/// A fixed-arity tuple of values aligned with a shared schema.
#[derive(Debug, Clone)]
pub struct Row {
    schema: SchemaRef,
    values: Vec<Value>,
}

impl Row {
    /// Build a row. The value count must match the schema arity.
    #[must_use]
    pub fn new(schema: SchemaRef, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            schema.len(),
            values.len(),
            "row arity does not match schema {schema}"
        );
        Self { schema, values }
    }

    #[must_use]
    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, index: usize) -> &Value {
        self.values.get(index).unwrap_or(&Value::Null)
    }

    /// Value of the field called `name`, if the schema has one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema.index_of(name).map(|i| self.value(i))
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    #[must_use]
    pub fn into_parts(self) -> (SchemaRef, Vec<Value>) {
        (self.schema, self.values)
    }

    /// Null-safe comparison of the values at `positions`.
    #[must_use]
    pub fn same_key(&self, other: &Row, positions: &[usize]) -> bool {
        positions.iter().all(|&i| self.value(i) == other.value(i))
    }

    /// Copy of the values at `positions`.
    #[must_use]
    pub fn key_values(&self, positions: &[usize]) -> Vec<Value> {
        positions.iter().map(|&i| self.value(i).clone()).collect()
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .schema
            .fields()
            .iter()
            .zip(&self.values)
            .map(|(m, v)| format!("{}={v}", m.name))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}
