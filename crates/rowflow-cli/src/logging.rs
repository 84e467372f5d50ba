//! Log setup for the `rowflow` binary.
//!
//! Step runners and the orchestrator emit `tracing` events carrying `step`
//! and `copy` fields. Those go to stderr so a `json_output` step writing rows
//! to stdout produces clean JSON lines.

use tracing_subscriber::EnvFilter;

const ROWFLOW_CRATES: [&str; 3] = ["rowflow_cli", "rowflow_engine", "rowflow_state"];

/// Directive applying `level` to rowflow's own crates and `warn` elsewhere.
fn default_directive(level: &str) -> String {
    let mut directive = String::from("warn");
    for krate in ROWFLOW_CRATES {
        directive.push_str(&format!(",{krate}={level}"));
    }
    directive
}

/// Initialize structured logging.
///
/// `RUST_LOG` wins when set; otherwise `--log-level` applies to rowflow's
/// crates only.
pub fn init(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
