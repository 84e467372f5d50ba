//! Per-step execution summaries.
//!
//! Every step copy maintains a [`StepSummary`] while it runs and hands it to
//! the orchestrator when it finishes, together with its [`StepStatus`].

use serde::{Deserialize, Serialize};

/// Row counters for one step copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    /// Rows taken from input queues.
    pub rows_read: u64,
    /// Rows put on output queues (error rows excluded).
    pub rows_written: u64,
    /// Rows dropped or redirected by the row error policy.
    pub rows_rejected: u64,
    /// Error count: rejected rows plus one for a fatal failure.
    pub errors: u64,
}

impl StepSummary {
    /// Fold another copy's counters into this one.
    pub fn absorb(&mut self, other: &StepSummary) {
        self.rows_read += other.rows_read;
        self.rows_written += other.rows_written;
        self.rows_rejected += other.rows_rejected;
        self.errors += other.errors;
    }
}

/// Final state of a step copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Read all input and flushed all state.
    Finished,
    /// Exited early because the pipeline was asked to stop.
    Stopped,
    /// Failed with a fatal error.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Finished => "finished",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
