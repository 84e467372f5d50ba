//! The step unit contract and the per-copy runtime context.
//!
//! Every operator implements [`StepUnit`]. The orchestrator gives each copy a
//! [`StepContext`] holding its input queues, its output queues grouped by
//! target step, the error hop (if any) and its row counters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;
use rowflow_types::{
    FieldMeta, Row, RowErrorPolicy, RowSchema, SchemaRef, StepError, StepSummary, Value,
    ValueType,
};

use crate::rowset::{InputSet, RowProducer};

/// Names of the fields appended to rows sent down an error hop.
pub const ERROR_FIELDS: [&str; 4] = ["error_count", "error_description", "error_fields", "error_code"];

/// A runnable operator: `init`, then `process_row` until it returns `false`
/// or the pipeline stops, then `dispose`.
///
/// State is owned by the unit and never shared across copies.
pub trait StepUnit: Send {
    /// Prepare resources before the first row.
    ///
    /// # Errors
    ///
    /// Any error is fatal for the run.
    fn init(&mut self, _ctx: &mut StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Do a bounded amount of work, typically one input row.
    /// Return `Ok(false)` once all input is consumed and retained state flushed.
    ///
    /// # Errors
    ///
    /// Any error returned here is fatal for the run. Row-level problems go
    /// through [`StepContext::put_error`] instead.
    fn process_row(&mut self, ctx: &mut StepContext) -> Result<bool, StepError>;

    /// Release resources. Runs on every exit path.
    fn dispose(&mut self, _ctx: &mut StepContext) {}
}

/// Creates one [`StepUnit`] per copy of a step.
pub trait StepFactory: Send + Sync {
    /// Build the unit for copy number `copy`.
    ///
    /// # Errors
    ///
    /// Returns a config error if the unit cannot be built.
    fn create(&self, copy: usize) -> Result<Box<dyn StepUnit>, StepError>;
}

impl<F> StepFactory for F
where
    F: Fn(usize) -> Result<Box<dyn StepUnit>, StepError> + Send + Sync,
{
    fn create(&self, copy: usize) -> Result<Box<dyn StepUnit>, StepError> {
        self(copy)
    }
}

/// Outgoing queues towards the copies of one target step.
#[derive(Debug)]
pub(crate) struct OutputGroup {
    target: String,
    producers: Vec<RowProducer>,
    distribute: bool,
    next: usize,
}

impl OutputGroup {
    pub(crate) fn new(target: impl Into<String>, distribute: bool) -> Self {
        Self {
            target: target.into(),
            producers: Vec::new(),
            distribute,
            next: 0,
        }
    }

    pub(crate) fn target(&self) -> &str {
        &self.target
    }

    pub(crate) fn push(&mut self, producer: RowProducer) {
        self.producers.push(producer);
    }

    /// Round-robin to one copy, or a value copy to each copy.
    fn send(&mut self, row: Row) -> Result<(), crate::rowset::QueueClosed> {
        if self.producers.is_empty() {
            return Ok(());
        }
        if self.distribute {
            let idx = self.next % self.producers.len();
            self.next = idx + 1;
            return self.producers[idx].put(row);
        }
        let (last, rest) = self
            .producers
            .split_last()
            .ok_or(crate::rowset::QueueClosed)?;
        for producer in rest {
            producer.put(row.clone())?;
        }
        last.put(row)
    }
}

/// Runtime services for one step copy.
pub struct StepContext {
    step_name: String,
    copy: usize,
    inputs: InputSet,
    outputs: Vec<OutputGroup>,
    error_output: Option<OutputGroup>,
    error_schema: Option<(SchemaRef, SchemaRef)>,
    policy: RowErrorPolicy,
    stop: Arc<AtomicBool>,
    spill_dir: Option<PathBuf>,
    run_started: NaiveDateTime,
    summary: StepSummary,
}

impl StepContext {
    pub(crate) fn new(
        step_name: impl Into<String>,
        copy: usize,
        policy: RowErrorPolicy,
        stop: Arc<AtomicBool>,
        run_started: NaiveDateTime,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            copy,
            inputs: InputSet::default(),
            outputs: Vec::new(),
            error_output: None,
            error_schema: None,
            policy,
            stop,
            spill_dir: None,
            run_started,
            summary: StepSummary::default(),
        }
    }

    pub(crate) fn set_inputs(&mut self, inputs: InputSet) {
        self.inputs = inputs;
    }

    pub(crate) fn add_output(&mut self, group: OutputGroup) {
        self.outputs.push(group);
    }

    pub(crate) fn set_error_output(&mut self, group: OutputGroup) {
        self.error_output = Some(group);
    }

    pub(crate) fn set_spill_dir(&mut self, dir: Option<PathBuf>) {
        self.spill_dir = dir;
    }

    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    #[must_use]
    pub fn copy(&self) -> usize {
        self.copy
    }

    /// Directory for temporary spill files; `None` means the system default.
    #[must_use]
    pub fn spill_dir(&self) -> Option<&Path> {
        self.spill_dir.as_deref()
    }

    /// Fixed wall-clock time at which the run started.
    #[must_use]
    pub fn run_started(&self) -> NaiveDateTime {
        self.run_started
    }

    #[must_use]
    pub fn summary(&self) -> &StepSummary {
        &self.summary
    }

    pub(crate) fn summary_mut(&mut self) -> &mut StepSummary {
        &mut self.summary
    }

    #[must_use]
    pub fn has_inputs(&self) -> bool {
        self.inputs.open_count() > 0
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Ask every step of the pipeline to stop.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Next input row, or `None` once every input is drained and closed.
    pub fn get_row(&mut self) -> Option<Row> {
        let row = self.inputs.next_row();
        if row.is_some() {
            self.summary.rows_read += 1;
        }
        row
    }

    /// Send `row` to every target step.
    ///
    /// After a stop the row is discarded.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a downstream queue closed while the
    /// pipeline is still running.
    pub fn put_row(&mut self, row: Row) -> Result<(), StepError> {
        if self.is_stopped() {
            return Ok(());
        }
        let Some((last, rest)) = self.outputs.split_last_mut() else {
            self.summary.rows_written += 1;
            return Ok(());
        };
        let stopped = &self.stop;
        let deliver = |group: &mut OutputGroup, row: Row| -> Result<(), StepError> {
            match group.send(row) {
                Ok(()) => Ok(()),
                Err(_) if stopped.load(Ordering::Acquire) => Ok(()),
                Err(_) => Err(StepError::internal(
                    "QUEUE_CLOSED",
                    format!("queue towards step '{}' closed early", group.target()),
                )),
            }
        };
        for group in rest {
            deliver(group, row.clone())?;
        }
        deliver(last, row)?;
        self.summary.rows_written += 1;
        Ok(())
    }

    /// Handle a row-level error according to the step's row error policy.
    ///
    /// # Errors
    ///
    /// Returns `err` itself under [`RowErrorPolicy::Fail`], or an internal
    /// error if the error hop closed early.
    pub fn put_error(&mut self, row: Row, err: StepError) -> Result<(), StepError> {
        match self.policy {
            RowErrorPolicy::Fail => return Err(err),
            RowErrorPolicy::Skip => {
                tracing::warn!(
                    step = %self.step_name,
                    copy = self.copy,
                    code = %err.code,
                    "Row rejected: {}",
                    err.message
                );
            }
            RowErrorPolicy::Redirect => {
                let error_row = self.error_row(row, &err);
                if !self.is_stopped() {
                    if let Some(group) = self.error_output.as_mut() {
                        if group.send(error_row).is_err() && !self.stop.load(Ordering::Acquire) {
                            return Err(StepError::internal(
                                "QUEUE_CLOSED",
                                format!("error hop towards '{}' closed early", group.target()),
                            ));
                        }
                    } else {
                        tracing::warn!(
                            step = %self.step_name,
                            code = %err.code,
                            "Row rejected without an error hop: {}",
                            err.message
                        );
                    }
                }
            }
        }
        self.summary.rows_rejected += 1;
        self.summary.errors += 1;
        Ok(())
    }

    /// The rejected row with the four error fields appended.
    fn error_row(&mut self, row: Row, err: &StepError) -> Row {
        let (schema, mut values) = row.into_parts();
        let extended = match &self.error_schema {
            Some((input, extended)) if Arc::ptr_eq(input, &schema) => extended.clone(),
            _ => {
                let extended = error_schema(&schema);
                self.error_schema = Some((schema, extended.clone()));
                extended
            }
        };
        values.push(Value::Integer(1));
        values.push(Value::String(err.message.clone()));
        values.push(Value::from(err.field.clone()));
        values.push(Value::String(err.code.clone()));
        Row::new(extended, values)
    }
}

fn error_schema(input: &RowSchema) -> SchemaRef {
    input
        .extended([
            FieldMeta::new(ERROR_FIELDS[0], ValueType::Integer),
            FieldMeta::new(ERROR_FIELDS[1], ValueType::String),
            FieldMeta::new(ERROR_FIELDS[2], ValueType::String),
            FieldMeta::new(ERROR_FIELDS[3], ValueType::String),
        ])
        .into_ref()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::rowset::row_queue;

    fn schema() -> SchemaRef {
        RowSchema::new(vec![FieldMeta::new("name", ValueType::String)]).into_ref()
    }

    fn row(name: &str) -> Row {
        Row::new(schema(), vec![Value::from(name)])
    }

    #[test]
    fn put_row_copies_to_each_target_step() {
        let mut h = harness(vec![], RowErrorPolicy::Skip);
        let (tx, mut second) = row_queue(4);
        let mut group = OutputGroup::new("second", true);
        group.push(tx);
        h.ctx.add_output(group);

        h.ctx.put_row(row("a")).unwrap();
        assert_eq!(h.ctx.summary().rows_written, 1);
        drop(h.ctx);
        assert_eq!(h.output.get().unwrap(), row("a"));
        assert_eq!(second.get().unwrap(), row("a"));
    }

    #[test]
    fn distribute_round_robins_over_copies() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut ctx = StepContext::new("s", 0, RowErrorPolicy::Skip, stop, fixed_start());
        let (tx0, mut rx0) = row_queue(4);
        let (tx1, mut rx1) = row_queue(4);
        let mut group = OutputGroup::new("t", true);
        group.push(tx0);
        group.push(tx1);
        ctx.add_output(group);
        for name in ["a", "b", "c"] {
            ctx.put_row(row(name)).unwrap();
        }
        drop(ctx);
        assert_eq!(rx0.get().unwrap(), row("a"));
        assert_eq!(rx1.get().unwrap(), row("b"));
        assert_eq!(rx0.get().unwrap(), row("c"));
        assert!(rx1.get().is_none());
    }

    #[test]
    fn copy_mode_sends_every_row_to_every_copy() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut ctx = StepContext::new("s", 0, RowErrorPolicy::Skip, stop, fixed_start());
        let (tx0, mut rx0) = row_queue(4);
        let (tx1, mut rx1) = row_queue(4);
        let mut group = OutputGroup::new("t", false);
        group.push(tx0);
        group.push(tx1);
        ctx.add_output(group);
        ctx.put_row(row("a")).unwrap();
        drop(ctx);
        assert_eq!(rx0.get().unwrap(), row("a"));
        assert_eq!(rx1.get().unwrap(), row("a"));
    }

    #[test]
    fn rows_are_dropped_after_stop() {
        let mut h = harness(vec![], RowErrorPolicy::Skip);
        h.ctx.request_stop();
        h.ctx.put_row(row("a")).unwrap();
        drop(h.ctx);
        assert!(h.output.get().is_none());
    }

    #[test]
    fn closed_output_while_running_is_an_error() {
        let h = harness(vec![], RowErrorPolicy::Skip);
        let Harness {
            mut ctx, output, ..
        } = h;
        drop(output);
        let err = ctx.put_row(row("a")).unwrap_err();
        assert_eq!(err.code, "QUEUE_CLOSED");
    }

    #[test]
    fn skip_policy_counts_rejected_rows() {
        let mut h = harness(vec![], RowErrorPolicy::Skip);
        h.ctx
            .put_error(row("a"), StepError::data("BAD", "bad value"))
            .unwrap();
        assert_eq!(h.ctx.summary().rows_rejected, 1);
        assert_eq!(h.ctx.summary().errors, 1);
        drop(h.ctx);
        assert!(h.errors.get().is_none());
    }

    #[test]
    fn fail_policy_returns_the_error() {
        let mut h = harness(vec![], RowErrorPolicy::Fail);
        let err = h
            .ctx
            .put_error(row("a"), StepError::data("BAD", "bad value"))
            .unwrap_err();
        assert_eq!(err.code, "BAD");
    }

    #[test]
    fn redirect_appends_error_fields() {
        let mut h = harness(vec![], RowErrorPolicy::Redirect);
        h.ctx
            .put_error(
                row("a"),
                StepError::data("CONVERSION", "not a number").with_field("amount"),
            )
            .unwrap();
        drop(h.ctx);
        let err_row = h.errors.get().unwrap();
        assert_eq!(err_row.schema().len(), 5);
        assert_eq!(err_row.get("error_count"), Some(&Value::Integer(1)));
        assert_eq!(
            err_row.get("error_description"),
            Some(&Value::from("not a number"))
        );
        assert_eq!(err_row.get("error_fields"), Some(&Value::from("amount")));
        assert_eq!(err_row.get("error_code"), Some(&Value::from("CONVERSION")));
        assert!(h.output.get().is_none());
    }

    #[test]
    fn get_row_counts_reads() {
        let mut h = harness(vec![row("a"), row("b")], RowErrorPolicy::Skip);
        assert!(h.ctx.get_row().is_some());
        assert!(h.ctx.get_row().is_some());
        assert!(h.ctx.get_row().is_none());
        assert_eq!(h.ctx.summary().rows_read, 2);
    }
}
