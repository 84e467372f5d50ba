//! Drives one step copy through `init -> process_row* -> dispose`.

use std::time::Instant;

use rowflow_types::{StepError, StepStatus};

use crate::result::StepResult;
use crate::step::{StepContext, StepUnit};

/// Run `unit` to completion on the current (blocking) thread.
///
/// A fatal error raises the pipeline-wide stop flag before `dispose` runs, so
/// sibling steps start winding down while this one releases its resources.
/// Output queues close when `ctx` is dropped at the end.
pub(crate) fn run_step_copy(mut unit: Box<dyn StepUnit>, mut ctx: StepContext) -> StepResult {
    let start = Instant::now();
    tracing::debug!(step = ctx.step_name(), copy = ctx.copy(), "Starting step");

    let outcome = drive(unit.as_mut(), &mut ctx);
    let (status, error) = match outcome {
        Ok(true) => (StepStatus::Finished, None),
        Ok(false) => (StepStatus::Stopped, None),
        Err(err) => {
            ctx.request_stop();
            ctx.summary_mut().errors += 1;
            tracing::error!(
                step = ctx.step_name(),
                copy = ctx.copy(),
                category = %err.category,
                code = %err.code,
                "Step failed: {}",
                err.message
            );
            (StepStatus::Failed, Some(err.to_string()))
        }
    };

    unit.dispose(&mut ctx);

    let summary = *ctx.summary();
    let duration_secs = start.elapsed().as_secs_f64();
    tracing::info!(
        step = ctx.step_name(),
        copy = ctx.copy(),
        status = %status,
        rows_read = summary.rows_read,
        rows_written = summary.rows_written,
        rows_rejected = summary.rows_rejected,
        duration_secs,
        "Step completed"
    );

    StepResult {
        step: ctx.step_name().to_string(),
        copy: ctx.copy(),
        status,
        summary,
        duration_secs,
        error,
    }
}

/// `Ok(true)` when the unit ran out of work, `Ok(false)` when it was stopped.
fn drive(unit: &mut dyn StepUnit, ctx: &mut StepContext) -> Result<bool, StepError> {
    unit.init(ctx)?;
    loop {
        if ctx.is_stopped() {
            return Ok(false);
        }
        if !unit.process_row(ctx)? {
            return Ok(true);
        }
    }
}
