//! Key/value pivot: folds the rows of a group into one wide row.
//!
//! Each input row carries a key field naming an attribute and one or more
//! value fields. Targets pick the value of the rows whose key matches their
//! `key_value`, convert it to the target type and aggregate it. On a group
//! change the last row of the group, minus the key and value fields, is
//! emitted with one column per target appended.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rowflow_types::{FieldMeta, Row, RowSchema, SchemaRef, StepError, Value};

use crate::aggregate::Accumulator;
use crate::config::types::DenormaliserConfig;
use crate::convert::convert_value;
use crate::step::{StepContext, StepUnit};

struct Layout {
    key: usize,
    group: Vec<usize>,
    /// Value field position per target.
    values: Vec<usize>,
    /// Input positions copied to the output.
    kept: Vec<usize>,
    /// Key literal to the targets it feeds.
    targets_by_key: HashMap<String, Vec<usize>>,
    output: SchemaRef,
}

pub struct DenormaliserStep {
    config: Arc<DenormaliserConfig>,
    layout: Option<Layout>,
    accumulators: Vec<Accumulator>,
    last_row: Option<Row>,
    unmatched_keys: u64,
}

impl DenormaliserStep {
    #[must_use]
    pub fn new(config: Arc<DenormaliserConfig>) -> Self {
        let accumulators = config
            .targets
            .iter()
            .map(|t| match &t.separator {
                Some(sep) => Accumulator::with_separator(t.aggregation, sep.clone()),
                None => Accumulator::new(t.aggregation),
            })
            .collect();
        Self {
            config,
            layout: None,
            accumulators,
            last_row: None,
            unmatched_keys: 0,
        }
    }

    fn resolve(&self, schema: &RowSchema, step: &str) -> Result<Layout, StepError> {
        let position = |name: &str| {
            schema
                .index_of(name)
                .ok_or_else(|| StepError::field_not_found(name, step))
        };
        let key = position(&self.config.key_field)?;
        let group = self
            .config
            .group
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<_>, _>>()?;
        let values = self
            .config
            .targets
            .iter()
            .map(|t| position(&t.value_field))
            .collect::<Result<Vec<_>, _>>()?;

        let removed: HashSet<usize> = values.iter().copied().chain([key]).collect();
        let kept: Vec<usize> = (0..schema.len()).filter(|p| !removed.contains(p)).collect();

        let mut targets_by_key: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, target) in self.config.targets.iter().enumerate() {
            targets_by_key
                .entry(target.key_value.clone())
                .or_default()
                .push(i);
        }

        let output = schema
            .project(&kept)
            .extended(
                self.config
                    .targets
                    .iter()
                    .map(|t| FieldMeta::new(t.name.clone(), t.value_type)),
            )
            .into_ref();
        Ok(Layout {
            key,
            group,
            values,
            kept,
            targets_by_key,
            output,
        })
    }

    fn fold(&mut self, row: &Row) -> Result<(), StepError> {
        let Some(layout) = self.layout.as_ref() else {
            return Ok(());
        };
        let Some(key) = row.value(layout.key).to_display_string() else {
            self.unmatched_keys += 1;
            return Ok(());
        };
        let Some(targets) = layout.targets_by_key.get(&key) else {
            self.unmatched_keys += 1;
            return Ok(());
        };
        let mut converted = Vec::with_capacity(targets.len());
        for &i in targets {
            let target = &self.config.targets[i];
            let raw = row.value(layout.values[i]);
            let value = convert_value(raw, target.value_type, &target.format).unwrap_or_else(|err| {
                tracing::trace!(target_field = %target.name, "Unconvertible value becomes null: {}", err);
                Value::Null
            });
            // Nothing is folded unless every target accepts its value.
            self.accumulators[i].check(&value).map_err(|e| {
                StepError::data(e.code(), e.to_string()).with_field(target.name.clone())
            })?;
            converted.push((i, value));
        }
        for (i, value) in converted {
            self.accumulators[i].fold(&value).map_err(|e| {
                StepError::internal("AGGREGATION_FAILED", e.to_string())
                    .with_field(self.config.targets[i].name.clone())
            })?;
        }
        Ok(())
    }

    fn emit_group(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let Some(last) = self.last_row.take() else {
            return Ok(());
        };
        let Some(layout) = self.layout.as_ref() else {
            return Ok(());
        };
        let mut values: Vec<Value> = layout
            .kept
            .iter()
            .map(|p| last.value(*p).clone())
            .collect();
        for (acc, target) in self.accumulators.iter_mut().zip(&self.config.targets) {
            let result = acc.result();
            values.push(convert_value(&result, target.value_type, &target.format).unwrap_or(Value::Null));
            acc.reset();
        }
        ctx.put_row(Row::new(layout.output.clone(), values))
    }
}

impl StepUnit for DenormaliserStep {
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        let Some(row) = ctx.get_row() else {
            self.emit_group(ctx)?;
            return Ok(false);
        };
        if self.layout.is_none() {
            self.layout = Some(self.resolve(row.schema(), ctx.step_name())?);
        }
        let new_group = match (&self.last_row, &self.layout) {
            (Some(last), Some(layout)) => !row.same_key(last, &layout.group),
            _ => false,
        };
        if new_group {
            self.emit_group(ctx)?;
        }
        if let Err(err) = self.fold(&row) {
            ctx.put_error(row, err)?;
            return Ok(true);
        }
        self.last_row = Some(row);
        Ok(true)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if self.unmatched_keys > 0 {
            tracing::debug!(
                step = ctx.step_name(),
                copy = ctx.copy(),
                rows = self.unmatched_keys,
                "Rows with unmatched keys ignored"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationKind;
    use crate::config::types::DenormaliserTarget;
    use crate::convert::ConversionFormat;
    use crate::step::testing::run_unit;
    use rowflow_types::{ErrorCategory, RowErrorPolicy, ValueType};

    fn target(key: &str, name: &str, value_type: ValueType, aggregation: AggregationKind) -> DenormaliserTarget {
        DenormaliserTarget {
            value_field: "val".into(),
            key_value: key.into(),
            name: name.into(),
            value_type,
            format: ConversionFormat::default(),
            aggregation,
            separator: None,
        }
    }

    fn input(data: &[(i64, &str, &str, &str)]) -> Vec<Row> {
        let schema = RowSchema::new(vec![
            FieldMeta::new("id", ValueType::Integer),
            FieldMeta::new("attr", ValueType::String),
            FieldMeta::new("val", ValueType::String),
            FieldMeta::new("note", ValueType::String),
        ])
        .into_ref();
        data.iter()
            .map(|(id, attr, val, note)| {
                Row::new(
                    schema.clone(),
                    vec![Value::Integer(*id), Value::from(*attr), Value::from(*val), Value::from(*note)],
                )
            })
            .collect()
    }

    fn run(targets: Vec<DenormaliserTarget>, rows: Vec<Row>) -> Result<Vec<Row>, StepError> {
        let mut step = DenormaliserStep::new(Arc::new(DenormaliserConfig {
            key_field: "attr".into(),
            group: vec!["id".into()],
            targets,
        }));
        run_unit(&mut step, rows, RowErrorPolicy::Skip).map(|(out, _, _)| out)
    }

    #[test]
    fn pivots_each_group_into_one_row() {
        let out = run(
            vec![
                target("age", "age", ValueType::Integer, AggregationKind::Overwrite),
                target("city", "city", ValueType::String, AggregationKind::Overwrite),
            ],
            input(&[
                (1, "age", "31", "a"),
                (1, "city", "Oslo", "b"),
                (2, "city", "Rome", "c"),
            ]),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].schema().names(), vec!["id", "note", "age", "city"]);
        assert_eq!(
            out[0].values(),
            &[Value::Integer(1), Value::from("b"), Value::Integer(31), Value::from("Oslo")]
        );
        assert_eq!(
            out[1].values(),
            &[Value::Integer(2), Value::from("c"), Value::Null, Value::from("Rome")]
        );
    }

    #[test]
    fn targets_aggregate_independently() {
        let out = run(
            vec![
                target("score", "total", ValueType::Number, AggregationKind::Sum),
                target("score", "n", ValueType::Integer, AggregationKind::CountAll),
                target("score", "avg", ValueType::Number, AggregationKind::Average),
                target("tag", "tags", ValueType::String, AggregationKind::Concat),
            ],
            input(&[
                (1, "score", "2", ""),
                (1, "tag", "x", ""),
                (1, "score", "4", ""),
                (1, "tag", "y", ""),
                (1, "score", "oops", ""),
            ]),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("total"), Some(&Value::Number(6.0)));
        assert_eq!(out[0].get("n"), Some(&Value::Integer(3)));
        assert_eq!(out[0].get("avg"), Some(&Value::Number(3.0)));
        assert_eq!(out[0].get("tags"), Some(&Value::from("x, y")));
    }

    #[test]
    fn unparsable_values_become_typed_null() {
        let out = run(
            vec![target("age", "age", ValueType::Integer, AggregationKind::Overwrite)],
            input(&[(1, "age", "unknown", "")]),
        )
        .unwrap();
        assert_eq!(out[0].get("age"), Some(&Value::Null));
        assert_eq!(out[0].schema().field(2).unwrap().value_type, ValueType::Integer);
    }

    #[test]
    fn unmatched_keys_are_ignored() {
        let out = run(
            vec![target("age", "age", ValueType::Integer, AggregationKind::Max)],
            input(&[(1, "age", "5", ""), (1, "shoe", "44", ""), (1, "age", "7", "")]),
        )
        .unwrap();
        assert_eq!(out[0].get("age"), Some(&Value::Integer(7)));
    }

    #[test]
    fn missing_value_field_is_fatal() {
        let mut bad = target("age", "age", ValueType::Integer, AggregationKind::Overwrite);
        bad.value_field = "missing".into();
        let err = run(vec![bad], input(&[(1, "age", "5", "")])).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Schema);
        assert_eq!(err.field.as_deref(), Some("missing"));
    }

    #[test]
    fn integer_sum_overflow_rejects_the_row() {
        let mut step = DenormaliserStep::new(Arc::new(DenormaliserConfig {
            key_field: "attr".into(),
            group: vec!["id".into()],
            targets: vec![
                target("qty", "total", ValueType::Integer, AggregationKind::Sum),
                target("qty", "n", ValueType::Integer, AggregationKind::CountAll),
            ],
        }));
        let max = i64::MAX.to_string();
        let (out, errors, summary) = run_unit(
            &mut step,
            input(&[(1, "qty", max.as_str(), ""), (1, "qty", "1", ""), (1, "qty", "-2", "")]),
            RowErrorPolicy::Redirect,
        )
        .unwrap();
        assert_eq!(summary.rows_rejected, 1);
        assert_eq!(errors[0].get("error_code"), Some(&Value::from("INTEGER_OVERFLOW")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("total"), Some(&Value::Integer(i64::MAX - 2)));
        assert_eq!(out[0].get("n"), Some(&Value::Integer(2)));
        for (value, field) in out[0].values().iter().zip(out[0].schema().fields()) {
            assert_eq!(value.value_type(), Some(field.value_type), "{}", field.name);
        }
    }

    #[test]
    fn empty_input_emits_nothing() {
        let out = run(
            vec![target("age", "age", ValueType::Integer, AggregationKind::Overwrite)],
            Vec::new(),
        )
        .unwrap();
        assert!(out.is_empty());
    }
}
