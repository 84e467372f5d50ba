//! Streaming group-by over input sorted on the group fields.
//!
//! Consecutive rows with an equal group key form one group. When the key
//! changes, the finished group is emitted as one row of group values plus
//! aggregates, or, in pass-all-rows mode, as every row of the group with the
//! aggregates appended.

use std::sync::Arc;

use rowflow_types::{FieldMeta, Row, RowSchema, SchemaRef, StepError, Value};

use crate::aggregate::Accumulator;
use crate::config::types::GroupByConfig;
use crate::spill::GroupBuffer;
use crate::step::{StepContext, StepUnit};

static NULL: Value = Value::Null;

/// Field positions and output schema, fixed by the first row.
struct Layout {
    group: Vec<usize>,
    subjects: Vec<Option<usize>>,
    output: SchemaRef,
}

pub struct GroupByStep {
    config: Arc<GroupByConfig>,
    layout: Option<Layout>,
    accumulators: Vec<Accumulator>,
    current_key: Option<Vec<Value>>,
    buffer: Option<GroupBuffer>,
    groups_emitted: u64,
    done: bool,
}

impl GroupByStep {
    #[must_use]
    pub fn new(config: Arc<GroupByConfig>) -> Self {
        let accumulators = config
            .aggregates
            .iter()
            .map(|agg| match &agg.separator {
                Some(sep) => Accumulator::with_separator(agg.kind, sep.clone()),
                None => Accumulator::new(agg.kind),
            })
            .collect();
        Self {
            config,
            layout: None,
            accumulators,
            current_key: None,
            buffer: None,
            groups_emitted: 0,
            done: false,
        }
    }

    fn resolve(&self, schema: &RowSchema, step: &str) -> Result<Layout, StepError> {
        let position = |name: &str| {
            schema
                .index_of(name)
                .ok_or_else(|| StepError::field_not_found(name, step))
        };
        let group = self
            .config
            .group
            .iter()
            .map(|name| position(name))
            .collect::<Result<Vec<_>, _>>()?;
        let subjects = self
            .config
            .aggregates
            .iter()
            .map(|agg| agg.subject.as_deref().map(position).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        let aggregate_fields = self.aggregate_fields(schema, &subjects);
        let output = if self.config.pass_all_rows {
            schema.extended(aggregate_fields)
        } else {
            schema.project(&group).extended(aggregate_fields)
        };
        Ok(Layout {
            group,
            subjects,
            output: output.into_ref(),
        })
    }

    fn aggregate_fields(&self, schema: &RowSchema, subjects: &[Option<usize>]) -> Vec<FieldMeta> {
        self.config
            .aggregates
            .iter()
            .zip(subjects)
            .map(|(agg, subject)| {
                let subject_type = subject
                    .and_then(|p| schema.field(p))
                    .map(|f| f.value_type);
                FieldMeta::new(agg.name.clone(), agg.kind.result_type(subject_type))
            })
            .collect()
    }

    fn subject_value<'r>(row: &'r Row, subject: Option<usize>) -> &'r Value {
        match subject {
            Some(p) => row.value(p),
            None => &NULL,
        }
    }

    /// Reject a row whose values cannot be folded, before touching any state.
    fn check_row(&self, row: &Row, layout: &Layout) -> Result<(), StepError> {
        for ((acc, subject), agg) in self
            .accumulators
            .iter()
            .zip(&layout.subjects)
            .zip(&self.config.aggregates)
        {
            if let Err(err) = acc.check(Self::subject_value(row, *subject)) {
                let mut step_err = StepError::data(err.code(), err.to_string());
                if let Some(field) = &agg.subject {
                    step_err = step_err.with_field(field.clone());
                }
                return Err(step_err);
            }
        }
        Ok(())
    }

    fn fold(&mut self, row: &Row, subjects: &[Option<usize>]) -> Result<(), StepError> {
        for (acc, subject) in self.accumulators.iter_mut().zip(subjects) {
            acc.fold(Self::subject_value(row, *subject))
                .map_err(|e| StepError::data(e.code(), e.to_string()))?;
        }
        Ok(())
    }

    fn results(&self) -> Vec<Value> {
        self.accumulators.iter().map(Accumulator::result).collect()
    }

    fn emit_group(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        let Some(key) = self.current_key.take() else {
            return Ok(());
        };
        let Some(layout) = self.layout.as_ref() else {
            return Ok(());
        };
        let results = self.results();
        let output = layout.output.clone();

        match self.buffer.as_mut() {
            Some(buffer) => {
                let drained = buffer.drain(|row| -> Result<(), StepError> {
                    let mut values = row.into_values();
                    values.extend(results.iter().cloned());
                    ctx.put_row(Row::new(output.clone(), values))
                });
                if let Err(err) = drained {
                    buffer.discard();
                    return Err(err);
                }
            }
            None => {
                let mut values = key;
                values.extend(results);
                ctx.put_row(Row::new(output, values))?;
            }
        }

        self.groups_emitted += 1;
        for acc in &mut self.accumulators {
            acc.reset();
        }
        Ok(())
    }

    /// The single row emitted for empty input with `always_emit`.
    fn emit_empty_result(&self, ctx: &mut StepContext) -> Result<(), StepError> {
        let fields = self
            .config
            .aggregates
            .iter()
            .map(|agg| FieldMeta::new(agg.name.clone(), agg.kind.result_type(None)))
            .collect();
        let schema = RowSchema::new(fields).into_ref();
        ctx.put_row(Row::new(schema, self.results()))
    }

    fn accept(&mut self, ctx: &mut StepContext, row: Row) -> Result<(), StepError> {
        if self.layout.is_none() {
            self.layout = Some(self.resolve(row.schema(), ctx.step_name())?);
        }
        let Some(layout) = self.layout.as_ref() else {
            return Ok(());
        };
        if let Err(err) = self.check_row(&row, layout) {
            return ctx.put_error(row, err);
        }

        let same_group = self.current_key.as_ref().is_some_and(|key| {
            layout
                .group
                .iter()
                .zip(key)
                .all(|(p, k)| row.value(*p) == k)
        });
        if !same_group {
            let key = row.key_values(&layout.group);
            self.emit_group(ctx)?;
            self.current_key = Some(key);
        }

        let subjects = self
            .layout
            .as_ref()
            .map(|l| l.subjects.clone())
            .unwrap_or_default();
        self.fold(&row, &subjects)?;

        if let Some(buffer) = self.buffer.as_mut() {
            if let Err(err) = buffer.push(row) {
                buffer.discard();
                return Err(err.into());
            }
        }
        Ok(())
    }
}

impl StepUnit for GroupByStep {
    fn init(&mut self, ctx: &mut StepContext) -> Result<(), StepError> {
        if self.config.pass_all_rows {
            self.buffer = Some(GroupBuffer::new(
                self.config.spill_threshold,
                ctx.spill_dir(),
            ));
        }
        Ok(())
    }

    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError> {
        if self.done {
            return Ok(false);
        }
        if let Some(row) = ctx.get_row() {
            self.accept(ctx, row)?;
            return Ok(true);
        }

        if self.current_key.is_some() {
            self.emit_group(ctx)?;
        } else if self.config.always_emit && self.config.group.is_empty() {
            self.emit_empty_result(ctx)?;
        }
        self.done = true;
        Ok(false)
    }

    fn dispose(&mut self, ctx: &mut StepContext) {
        if let Some(mut buffer) = self.buffer.take() {
            if buffer.spill_count() > 0 {
                tracing::info!(
                    step = ctx.step_name(),
                    copy = ctx.copy(),
                    spills = buffer.spill_count(),
                    "Group buffer spilled to disk"
                );
            }
            buffer.discard();
        }
        tracing::debug!(
            step = ctx.step_name(),
            copy = ctx.copy(),
            groups = self.groups_emitted,
            "Group-by finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationKind;
    use crate::config::types::AggregateConfig;
    use crate::step::testing::run_unit;
    use rowflow_types::{ErrorCategory, RowErrorPolicy, ValueType};

    fn agg(name: &str, subject: Option<&str>, kind: AggregationKind) -> AggregateConfig {
        AggregateConfig {
            name: name.into(),
            subject: subject.map(Into::into),
            kind,
            separator: None,
        }
    }

    fn config(group: &[&str], aggregates: Vec<AggregateConfig>) -> GroupByConfig {
        GroupByConfig {
            group: group.iter().map(|s| (*s).to_string()).collect(),
            aggregates,
            pass_all_rows: false,
            spill_threshold: 5_000,
            always_emit: false,
        }
    }

    fn rows(data: &[(&str, Option<i64>)]) -> Vec<Row> {
        let schema = RowSchema::new(vec![
            FieldMeta::new("k", ValueType::String),
            FieldMeta::new("v", ValueType::Integer),
        ])
        .into_ref();
        data.iter()
            .map(|(k, v)| Row::new(schema.clone(), vec![Value::from(*k), Value::from(*v)]))
            .collect()
    }

    fn run(config: GroupByConfig, input: Vec<Row>) -> Vec<Row> {
        let mut step = GroupByStep::new(Arc::new(config));
        run_unit(&mut step, input, RowErrorPolicy::Skip).unwrap().0
    }

    #[test]
    fn sums_consecutive_groups() {
        let out = run(
            config(&["k"], vec![agg("total", Some("v"), AggregationKind::Sum)]),
            rows(&[("A", Some(1)), ("A", Some(2)), ("B", Some(5))]),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values(), &[Value::from("A"), Value::Integer(3)]);
        assert_eq!(out[1].values(), &[Value::from("B"), Value::Integer(5)]);
        assert_eq!(out[0].schema().names(), vec!["k", "total"]);
    }

    #[test]
    fn unsorted_input_splits_groups() {
        let out = run(
            config(&["k"], vec![agg("total", Some("v"), AggregationKind::Sum)]),
            rows(&[("A", Some(1)), ("B", Some(5)), ("A", Some(2))]),
        );
        let keys: Vec<_> = out.iter().map(|r| r.value(0).clone()).collect();
        assert_eq!(keys, vec![Value::from("A"), Value::from("B"), Value::from("A")]);
    }

    #[test]
    fn count_average_and_nulls() {
        let out = run(
            config(
                &["k"],
                vec![
                    agg("n", None, AggregationKind::CountAll),
                    agg("avg", Some("v"), AggregationKind::Average),
                    agg("lo", Some("v"), AggregationKind::Min),
                ],
            ),
            rows(&[("A", Some(2)), ("A", None), ("A", Some(4))]),
        );
        assert_eq!(
            out[0].values(),
            &[Value::from("A"), Value::Integer(3), Value::Number(3.0), Value::Integer(2)]
        );
        let types: Vec<_> = out[0].schema().fields().iter().map(|f| f.value_type).collect();
        assert_eq!(
            types,
            vec![ValueType::String, ValueType::Integer, ValueType::Number, ValueType::Integer]
        );
    }

    #[test]
    fn null_group_values_form_one_group() {
        let schema = RowSchema::new(vec![
            FieldMeta::new("k", ValueType::String),
            FieldMeta::new("v", ValueType::Integer),
        ])
        .into_ref();
        let input = vec![
            Row::new(schema.clone(), vec![Value::Null, Value::Integer(1)]),
            Row::new(schema.clone(), vec![Value::Null, Value::Integer(1)]),
        ];
        let out = run(config(&["k"], vec![agg("n", None, AggregationKind::CountAll)]), input);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value(1), &Value::Integer(2));
    }

    #[test]
    fn pass_all_rows_appends_aggregates_across_spill() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&["k"], vec![agg("total", Some("v"), AggregationKind::Sum)]);
        cfg.pass_all_rows = true;
        cfg.spill_threshold = 2;
        let input = rows(&[
            ("A", Some(1)),
            ("A", Some(2)),
            ("A", Some(3)),
            ("A", Some(4)),
            ("A", Some(5)),
            ("B", Some(10)),
        ]);
        let mut step = GroupByStep::new(Arc::new(cfg));

        let mut h = crate::step::testing::harness(input, RowErrorPolicy::Skip);
        h.ctx.set_spill_dir(Some(dir.path().to_path_buf()));
        step.init(&mut h.ctx).unwrap();
        while step.process_row(&mut h.ctx).unwrap() {}
        step.dispose(&mut h.ctx);
        drop(h.ctx);

        let mut out = Vec::new();
        while let Some(row) = h.output.get() {
            out.push(row);
        }
        let values: Vec<(i64, i64)> = out
            .iter()
            .map(|r| (r.value(1).as_i64().unwrap(), r.value(2).as_i64().unwrap()))
            .collect();
        assert_eq!(values, vec![(1, 15), (2, 15), (3, 15), (4, 15), (5, 15), (10, 10)]);
        assert_eq!(out[0].schema().names(), vec!["k", "v", "total"]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn missing_group_field_is_fatal() {
        let mut step = GroupByStep::new(Arc::new(config(&["nope"], vec![])));
        let err = run_unit(&mut step, rows(&[("A", Some(1))]), RowErrorPolicy::Skip).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Schema);
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn non_numeric_subject_is_a_row_error() {
        let mut step = GroupByStep::new(Arc::new(config(
            &[],
            vec![agg("total", Some("k"), AggregationKind::Sum)],
        )));
        let (out, _, summary) = run_unit(
            &mut step,
            rows(&[("A", Some(1)), ("B", Some(2))]),
            RowErrorPolicy::Skip,
        )
        .unwrap();
        assert_eq!(summary.rows_rejected, 2);
        assert!(out.is_empty());
    }

    #[test]
    fn integer_overflow_rejects_row_and_keeps_declared_type() {
        let mut step = GroupByStep::new(Arc::new(config(
            &["k"],
            vec![
                agg("total", Some("v"), AggregationKind::Sum),
                agg("avg", Some("v"), AggregationKind::Average),
            ],
        )));
        let (out, errors, summary) = run_unit(
            &mut step,
            rows(&[("A", Some(i64::MAX)), ("A", Some(1)), ("A", Some(-5))]),
            RowErrorPolicy::Redirect,
        )
        .unwrap();
        assert_eq!(summary.rows_rejected, 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].get("error_code"), Some(&Value::from("INTEGER_OVERFLOW")));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].get("total"), Some(&Value::Integer(i64::MAX - 5)));
        for (value, field) in out[0].values().iter().zip(out[0].schema().fields()) {
            assert_eq!(value.value_type(), Some(field.value_type), "{}", field.name);
        }
    }

    #[test]
    fn always_emit_on_empty_input() {
        let mut cfg = config(
            &[],
            vec![
                agg("n", None, AggregationKind::CountAll),
                agg("total", Some("v"), AggregationKind::Sum),
            ],
        );
        cfg.always_emit = true;
        let out = run(cfg, Vec::new());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].values(), &[Value::Integer(0), Value::Null]);

        let out = run(
            config(&[], vec![agg("n", None, AggregationKind::CountAll)]),
            Vec::new(),
        );
        assert!(out.is_empty());
    }
}
