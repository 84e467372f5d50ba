//! Source step emitting rows written inline in the pipeline file.

use std::sync::Arc;

use rowflow_types::{FieldMeta, Row, RowSchema, SchemaRef, StepError, Value, ValueType};

use crate::config::types::DataGridConfig;
use crate::convert::{convert_value, json_to_value};
use crate::step::{StepContext, StepUnit};

pub struct DataGridStep {
    config: Arc<DataGridConfig>,
    schema: SchemaRef,
    /// All-string schema for rows rejected during conversion.
    raw_schema: SchemaRef,
    next: usize,
}

impl DataGridStep {
    #[must_use]
    pub fn new(config: Arc<DataGridConfig>) -> Self {
        let schema = RowSchema::new(
            config
                .fields
                .iter()
                .map(|f| FieldMeta::new(f.name.clone(), f.value_type))
                .collect(),
        )
        .into_ref();
        let raw_schema = RowSchema::new(
            config
                .fields
                .iter()
                .map(|f| FieldMeta::new(f.name.clone(), ValueType::String))
                .collect(),
        )
        .into_ref();
        Self {
            config,
            schema,
            raw_schema,
            next: 0,
        }
    }

    fn convert_row(&self, cells: &[serde_json::Value]) -> Result<Vec<Value>, StepError> {
        self.config
            .fields
            .iter()
            .zip(cells)
            .map(|(field, cell)| {
                let raw = json_to_value(cell).ok_or_else(|| {
                    StepError::data("INVALID_CELL", format!("{cell} is not a scalar"))
                        .with_field(field.name.clone())
                })?;
                convert_value(&raw, field.value_type, &field.format).map_err(|e| {
                    StepError::data("CONVERSION_FAILED", e.to_string()).with_field(field.name.clone())
                })
            })
            .collect()
    }

    fn raw_row(&self, cells: &[serde_json::Value]) -> Row {
        let values = cells
            .iter()
            .map(|cell| match cell {
                serde_json::Value::Null => Value::Null,
                serde_json::Value::String(s) => Value::String(s.clone()),
                other => Value::String(other.to_string()),
            })
            .collect();
        Row::new(self.raw_schema.clone(), values)
    }
}

impl StepUnit for DataGridStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(cells) = self.config.rows.get(self.next) else {
            return Ok(false);
        };
        self.next += 1;
        if cells.len() != self.schema.len() {
            return Err(StepError::config(
                "ROW_WIDTH",
                format!(
                    "row {} has {} value(s), expected {}",
                    self.next - 1,
                    cells.len(),
                    self.schema.len()
                ),
            ));
        }
        match self.convert_row(cells) {
            Ok(values) => ctx.put_row(Row::new(self.schema.clone(), values))?,
            Err(err) => ctx.put_error(self.raw_row(cells), err)?,
        }
        Ok(true)
    }
}
