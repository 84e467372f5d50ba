use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::config::{parser, validator};
use rowflow_engine::{run_pipeline, PipelineResult};

/// Execute the `run` command: parse, validate, and run a pipeline.
pub async fn execute(pipeline_path: &Path, json: bool) -> Result<()> {
    // 1. Parse pipeline YAML
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    // 2. Validate
    validator::validate_pipeline(&config)?;

    tracing::info!(
        pipeline = config.pipeline,
        steps = config.steps.len(),
        hops = config.hops.len(),
        "Pipeline validated"
    );

    // 3. Run
    let result = run_pipeline(&config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_summary(&result));
    }

    if result.success {
        Ok(())
    } else {
        anyhow::bail!(
            "Pipeline '{}' failed:\n  - {}",
            result.pipeline,
            result.error_messages().join("\n  - ")
        )
    }
}

fn render_summary(result: &PipelineResult) -> String {
    let mut out = String::new();
    let outcome = if result.success {
        "completed successfully"
    } else {
        "failed"
    };
    let _ = writeln!(out, "Pipeline '{}' {outcome}.", result.pipeline);
    let _ = writeln!(
        out,
        "  {:<20} {:>4} {:<9} {:>10} {:>10} {:>9}",
        "Step", "Copy", "Status", "Read", "Written", "Rejected"
    );
    for step in &result.steps {
        let _ = writeln!(
            out,
            "  {:<20} {:>4} {:<9} {:>10} {:>10} {:>9}",
            step.step,
            step.copy,
            step.status.to_string(),
            step.summary.rows_read,
            step.summary.rows_written,
            step.summary.rows_rejected,
        );
    }
    let _ = writeln!(out, "  Errors:   {}", result.error_count);
    let _ = writeln!(out, "  Duration: {:.2}s", result.duration_secs);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_engine::StepResult;
    use rowflow_types::{StepStatus, StepSummary};

    #[test]
    fn summary_lists_every_copy() {
        let result = PipelineResult {
            pipeline: "sales".into(),
            success: true,
            error_count: 1,
            duration_secs: 0.5,
            steps: vec![StepResult {
                step: "totals".into(),
                copy: 0,
                status: StepStatus::Finished,
                summary: StepSummary {
                    rows_read: 5,
                    rows_written: 3,
                    rows_rejected: 1,
                    ..StepSummary::default()
                },
                duration_secs: 0.1,
                error: None,
            }],
            messages: Vec::new(),
        };
        let text = render_summary(&result);
        assert!(text.starts_with("Pipeline 'sales' completed successfully."));
        let line = text.lines().find(|l| l.contains("totals")).unwrap();
        let cols: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(cols, vec!["totals", "0", "finished", "5", "3", "1"]);
        assert!(text.contains("Errors:   1"));
    }
}
