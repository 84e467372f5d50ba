use std::path::Path;

use anyhow::{Context, Result};

use rowflow_engine::check_pipeline;
use rowflow_engine::config::parser;

/// Execute the `check` command: validate the pipeline and describe its
/// topology without opening any store or file.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    let config = parser::parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;

    let result = check_pipeline(&config)?;
    println!("Pipeline structure: OK");
    println!("  Pipeline: {}", result.pipeline);
    for (name, kind, copies) in &result.steps {
        if *copies > 1 {
            println!("  {name:20} {kind} x{copies}");
        } else {
            println!("  {name:20} {kind}");
        }
    }
    println!("  Hops:   {}", result.hops);
    println!("  Queues: {}", result.queues);
    Ok(())
}
