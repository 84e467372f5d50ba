use rowflow_engine::steps::STEP_TYPES;

/// Execute the `steps` command: list the built-in step types.
pub fn execute() {
    println!("Built-in step types:");
    for (name, summary) in STEP_TYPES {
        println!("  {name:18} {summary}");
    }
}
