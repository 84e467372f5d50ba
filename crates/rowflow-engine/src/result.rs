//! Pipeline execution result types.

use rowflow_types::{StepStatus, StepSummary};
use serde::Serialize;

/// Final report of one step copy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step: String,
    pub copy: usize,
    pub status: StepStatus,
    pub summary: StepSummary,
    pub duration_secs: f64,
    /// Fatal error message, if the copy failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub pipeline: String,
    /// `true` iff no step copy failed fatally.
    pub success: bool,
    /// Rejected rows plus fatal failures over all steps.
    pub error_count: u64,
    pub duration_secs: f64,
    /// One entry per step copy, in step definition order.
    pub steps: Vec<StepResult>,
    /// Pipeline-level failures (validation, build, task join).
    pub messages: Vec<String>,
}

impl PipelineResult {
    /// Counters of every copy of `step` folded together.
    #[must_use]
    pub fn step_totals(&self, step: &str) -> Option<StepSummary> {
        let mut copies = self.steps.iter().filter(|s| s.step == step).peekable();
        copies.peek()?;
        let mut total = StepSummary::default();
        for copy in copies {
            total.absorb(&copy.summary);
        }
        Some(total)
    }

    /// Pipeline-level messages, then `step[copy]: message` for every
    /// failed copy.
    #[must_use]
    pub fn error_messages(&self) -> Vec<String> {
        self.messages
            .iter()
            .cloned()
            .chain(self.steps.iter().filter_map(|s| {
                s.error
                    .as_ref()
                    .map(|e| format!("{}[{}]: {e}", s.step, s.copy))
            }))
            .collect()
    }

    /// The first failed copy, if any.
    #[must_use]
    pub fn first_failure(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }
}

/// Result of a pipeline check: the topology that would run.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub pipeline: String,
    /// `(name, type, copies)` per step, in definition order.
    pub steps: Vec<(String, String, usize)>,
    pub hops: usize,
    pub queues: usize,
}
