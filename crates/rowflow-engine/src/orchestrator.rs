//! Pipeline orchestration: topology validation, queue wiring, concurrent
//! start of every step copy and collection of their results.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use rowflow_types::{RowErrorPolicy, StepStatus, StepSummary};
use tokio::task::JoinSet;

use crate::config::{validate_pipeline, PipelineConfig};
use crate::errors::PipelineError;
use crate::result::{CheckResult, PipelineResult, StepResult};
use crate::rowset::{row_queue, InputSet, RowConsumer, DEFAULT_QUEUE_CAPACITY};
use crate::runner::run_step_copy;
use crate::step::{OutputGroup, StepContext, StepFactory, StepUnit};
use crate::steps::build_pipeline;

/// One step of a pipeline: its name, how many copies run, and how to build
/// each copy.
#[derive(Clone)]
pub struct StepDefinition {
    pub name: String,
    /// Operator type, for reporting.
    pub kind: String,
    pub copies: usize,
    /// Round-robin rows over the copies of each target step (`true`) or send
    /// every row to every copy (`false`).
    pub distribute: bool,
    pub on_row_error: RowErrorPolicy,
    /// `false` for steps that only produce rows.
    pub accepts_input: bool,
    factory: Arc<dyn StepFactory>,
}

impl StepDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        factory: impl StepFactory + 'static,
    ) -> Self {
        Self::from_shared(name, kind, Arc::new(factory))
    }

    pub fn from_shared(
        name: impl Into<String>,
        kind: impl Into<String>,
        factory: Arc<dyn StepFactory>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            copies: 1,
            distribute: true,
            on_row_error: RowErrorPolicy::default(),
            accepts_input: true,
            factory,
        }
    }

    #[must_use]
    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    #[must_use]
    pub fn with_distribute(mut self, distribute: bool) -> Self {
        self.distribute = distribute;
        self
    }

    #[must_use]
    pub fn with_row_error_policy(mut self, policy: RowErrorPolicy) -> Self {
        self.on_row_error = policy;
        self
    }

    #[must_use]
    pub fn without_input(mut self) -> Self {
        self.accepts_input = false;
        self
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("copies", &self.copies)
            .field("distribute", &self.distribute)
            .field("on_row_error", &self.on_row_error)
            .finish_non_exhaustive()
    }
}

/// A directed connection between two steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hop {
    pub from: String,
    pub to: String,
    /// Carries rejected rows of `from` instead of its regular output.
    pub error: bool,
}

/// A directed acyclic graph of steps connected by bounded row queues.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    steps: Vec<StepDefinition>,
    hops: Vec<Hop>,
    queue_capacity: usize,
    spill_dir: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            hops: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            spill_dir: None,
        }
    }

    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_spill_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.spill_dir = dir;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    #[must_use]
    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn add_step(&mut self, step: StepDefinition) -> &mut Self {
        self.steps.push(step);
        self
    }

    pub fn add_hop(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.hops.push(Hop {
            from: from.into(),
            to: to.into(),
            error: false,
        });
        self
    }

    pub fn add_error_hop(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.hops.push(Hop {
            from: from.into(),
            to: to.into(),
            error: true,
        });
        self
    }

    /// Check the topology. Reports every problem at once.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] listing each violation.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut errors = Vec::new();

        if self.steps.is_empty() {
            errors.push("Pipeline must define at least one step".to_string());
        }
        if self.queue_capacity == 0 {
            errors.push("queue_capacity must be at least 1".to_string());
        }

        let mut names = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                errors.push("Step names must not be empty".to_string());
            } else if !names.insert(step.name.as_str()) {
                errors.push(format!("Duplicate step name '{}'", step.name));
            }
            if step.copies == 0 {
                errors.push(format!("Step '{}': copies must be at least 1", step.name));
            }
        }

        let by_name: HashMap<&str, &StepDefinition> =
            self.steps.iter().map(|s| (s.name.as_str(), s)).collect();
        let mut seen_hops = HashSet::new();
        let mut error_hops: HashMap<&str, usize> = HashMap::new();
        for hop in &self.hops {
            let from = by_name.get(hop.from.as_str());
            let to = by_name.get(hop.to.as_str());
            if from.is_none() {
                errors.push(format!("Hop references unknown step '{}'", hop.from));
            }
            if to.is_none() {
                errors.push(format!("Hop references unknown step '{}'", hop.to));
            }
            if hop.from == hop.to {
                errors.push(format!("Step '{}' cannot hop to itself", hop.from));
            }
            if !seen_hops.insert(hop) {
                errors.push(format!("Duplicate hop '{}' -> '{}'", hop.from, hop.to));
            }
            if let Some(to) = to {
                if !to.accepts_input {
                    errors.push(format!(
                        "Step '{}' ({}) does not accept input rows",
                        to.name, to.kind
                    ));
                }
            }
            if hop.error {
                *error_hops.entry(hop.from.as_str()).or_default() += 1;
                if let Some(from) = from {
                    if from.on_row_error != RowErrorPolicy::Redirect {
                        errors.push(format!(
                            "Error hop from '{}' requires on_row_error: redirect",
                            from.name
                        ));
                    }
                }
            }
        }
        for (step, count) in &error_hops {
            if *count > 1 {
                errors.push(format!("Step '{step}' has {count} error hops, at most one is allowed"));
            }
        }
        for step in &self.steps {
            if step.on_row_error == RowErrorPolicy::Redirect
                && !error_hops.contains_key(step.name.as_str())
            {
                errors.push(format!(
                    "Step '{}' redirects row errors but has no error hop",
                    step.name
                ));
            }
        }

        if let Some(step) = self.find_cycle() {
            errors.push(format!("Hops form a cycle through step '{step}'"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Config(anyhow!(
                "Pipeline validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }

    /// Kahn's algorithm; returns a step left over when the graph has a cycle.
    fn find_cycle(&self) -> Option<&str> {
        let mut indegree: HashMap<&str, usize> =
            self.steps.iter().map(|s| (s.name.as_str(), 0)).collect();
        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for hop in &self.hops {
            if !indegree.contains_key(hop.from.as_str()) || !indegree.contains_key(hop.to.as_str())
            {
                continue;
            }
            edges.entry(hop.from.as_str()).or_default().push(hop.to.as_str());
            *indegree.entry(hop.to.as_str()).or_default() += 1;
        }
        let mut ready: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| *n)
            .collect();
        while let Some(step) = ready.pop_front() {
            for next in edges.get(step).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(*next);
                    }
                }
            }
            indegree.remove(step);
        }
        let mut left: Vec<&str> = indegree.into_keys().collect();
        left.sort_unstable();
        left.first().copied()
    }

    /// Validate and describe the topology without running it.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if validation fails.
    pub fn check(&self) -> Result<CheckResult, PipelineError> {
        self.validate()?;
        let copies: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.copies))
            .collect();
        let queues = self
            .hops
            .iter()
            .map(|h| {
                let m = copies.get(h.from.as_str()).copied().unwrap_or(1);
                let n = copies.get(h.to.as_str()).copied().unwrap_or(1);
                if m == n {
                    m
                } else {
                    m * n
                }
            })
            .sum();
        Ok(CheckResult {
            pipeline: self.name.clone(),
            steps: self
                .steps
                .iter()
                .map(|s| (s.name.clone(), s.kind.clone(), s.copies))
                .collect(),
            hops: self.hops.len(),
            queues,
        })
    }

    /// Run every step copy to completion.
    ///
    /// Never fails outward: validation and build problems, fatal step errors
    /// and panics are all reported in the returned [`PipelineResult`].
    pub async fn run(&self) -> PipelineResult {
        let start = Instant::now();
        let run_started = chrono::Local::now().naive_local();
        let stop = Arc::new(AtomicBool::new(false));

        tracing::info!(
            pipeline = self.name,
            steps = self.steps.len(),
            hops = self.hops.len(),
            "Starting pipeline"
        );

        let copies = match self.build(run_started, &stop) {
            Ok(copies) => copies,
            Err(err) => {
                tracing::error!(pipeline = self.name, "Pipeline could not start: {}", err);
                return PipelineResult {
                    pipeline: self.name.clone(),
                    success: false,
                    error_count: 1,
                    duration_secs: start.elapsed().as_secs_f64(),
                    steps: Vec::new(),
                    messages: vec![err.to_string()],
                };
            }
        };

        let mut join_set: JoinSet<StepResult> = JoinSet::new();
        for (unit, ctx) in copies {
            let stop = stop.clone();
            join_set.spawn_blocking(move || run_guarded(unit, ctx, &stop));
        }

        let mut steps = Vec::new();
        let mut messages = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => steps.push(result),
                Err(join_err) => {
                    stop.store(true, Ordering::Release);
                    messages.push(format!("Step task failed: {join_err}"));
                }
            }
        }

        let order: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        steps.sort_by_key(|s| (order.get(s.step.as_str()).copied(), s.copy));

        let success = messages.is_empty() && steps.iter().all(|s| s.status != StepStatus::Failed);
        let error_count = steps.iter().map(|s| s.summary.errors).sum::<u64>()
            + u64::try_from(messages.len()).unwrap_or(u64::MAX);
        let duration_secs = start.elapsed().as_secs_f64();

        let mut total = StepSummary::default();
        for s in &steps {
            total.absorb(&s.summary);
        }
        if success {
            tracing::info!(
                pipeline = self.name,
                error_count,
                rows_rejected = total.rows_rejected,
                duration_secs,
                "Pipeline finished"
            );
        } else {
            tracing::error!(pipeline = self.name, error_count, duration_secs, "Pipeline failed");
        }

        PipelineResult {
            pipeline: self.name.clone(),
            success,
            error_count,
            duration_secs,
            steps,
            messages,
        }
    }

    /// Build every unit and wire its queues. Nothing runs yet.
    fn build(
        &self,
        run_started: NaiveDateTime,
        stop: &Arc<AtomicBool>,
    ) -> Result<Vec<(Box<dyn StepUnit>, StepContext)>, PipelineError> {
        self.validate()?;

        let index: HashMap<&str, usize> = self
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();

        let mut contexts: Vec<Vec<StepContext>> = self
            .steps
            .iter()
            .map(|step| {
                (0..step.copies)
                    .map(|copy| {
                        let mut ctx = StepContext::new(
                            step.name.clone(),
                            copy,
                            step.on_row_error,
                            stop.clone(),
                            run_started,
                        );
                        ctx.set_spill_dir(self.spill_dir.clone());
                        ctx
                    })
                    .collect()
            })
            .collect();
        let mut inputs: Vec<Vec<Vec<RowConsumer>>> = self
            .steps
            .iter()
            .map(|step| (0..step.copies).map(|_| Vec::new()).collect())
            .collect();

        for hop in &self.hops {
            let (Some(&f), Some(&t)) = (index.get(hop.from.as_str()), index.get(hop.to.as_str()))
            else {
                continue;
            };
            let from = &self.steps[f];
            let m = from.copies;
            let n = self.steps[t].copies;
            for i in 0..m {
                let targets = if m == n { i..i + 1 } else { 0..n };
                let mut group = OutputGroup::new(hop.to.clone(), from.distribute);
                for j in targets {
                    let (tx, rx) = row_queue(self.queue_capacity);
                    group.push(tx);
                    inputs[t][j].push(rx);
                }
                if hop.error {
                    contexts[f][i].set_error_output(group);
                } else {
                    contexts[f][i].add_output(group);
                }
            }
        }

        let mut copies = Vec::new();
        for ((step, step_contexts), step_inputs) in self.steps.iter().zip(contexts).zip(inputs) {
            for (mut ctx, queues) in step_contexts.into_iter().zip(step_inputs) {
                let unit = step.factory.create(ctx.copy()).map_err(|err| {
                    tracing::error!(step = step.name, "Step could not be built: {}", err);
                    PipelineError::Step(err)
                })?;
                ctx.set_inputs(InputSet::new(queues));
                copies.push((unit, ctx));
            }
        }
        Ok(copies)
    }
}

/// Validate `config`, build its pipeline and run it.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the configuration or topology is
/// invalid. Failures during the run are reported in the [`PipelineResult`].
pub async fn run_pipeline(config: &PipelineConfig) -> Result<PipelineResult, PipelineError> {
    validate_pipeline(config).map_err(PipelineError::Config)?;
    let pipeline = build_pipeline(config);
    pipeline.validate()?;
    Ok(pipeline.run().await)
}

/// Validate `config` and describe the pipeline it builds, without running it.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] if the configuration or topology is
/// invalid.
pub fn check_pipeline(config: &PipelineConfig) -> Result<CheckResult, PipelineError> {
    validate_pipeline(config).map_err(PipelineError::Config)?;
    build_pipeline(config).check()
}

/// Run one copy, turning a panic into a failed result.
fn run_guarded(unit: Box<dyn StepUnit>, ctx: StepContext, stop: &AtomicBool) -> StepResult {
    let step = ctx.step_name().to_string();
    let copy = ctx.copy();
    let start = Instant::now();
    match std::panic::catch_unwind(AssertUnwindSafe(|| run_step_copy(unit, ctx))) {
        Ok(result) => result,
        Err(payload) => {
            stop.store(true, Ordering::Release);
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(step, copy, "Step panicked: {}", detail);
            StepResult {
                step,
                copy,
                status: StepStatus::Failed,
                summary: StepSummary {
                    errors: 1,
                    ..StepSummary::default()
                },
                duration_secs: start.elapsed().as_secs_f64(),
                error: Some(format!("step panicked: {detail}")),
            }
        }
    }
}
