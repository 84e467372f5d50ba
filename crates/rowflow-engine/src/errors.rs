//! Pipeline error model.

use rowflow_types::StepError;

/// Error surfaced at the engine boundary.
///
/// A finished run never returns this: step failures are folded into
/// [`PipelineResult`](crate::result::PipelineResult). These variants cover
/// what stops a pipeline from being built or started at all.
#[derive(Debug)]
pub enum PipelineError {
    /// Typed step error raised while building a step (bad settings, store
    /// that cannot be opened, ...).
    Step(StepError),
    /// Invalid pipeline file or topology. Lists every problem found.
    Config(anyhow::Error),
    /// Infrastructure error (runtime, task join, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Step(e) => write!(f, "{e}"),
            Self::Config(e) | Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<StepError> for PipelineError {
    fn from(e: StepError) -> Self {
        Self::Step(e)
    }
}

impl PipelineError {
    /// Returns the typed step error if this is a `Step` variant.
    #[must_use]
    pub fn as_step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step(e) => Some(e),
            Self::Config(_) | Self::Infrastructure(_) => None,
        }
    }

    #[must_use]
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowflow_types::ErrorCategory;

    #[test]
    fn test_step_variant_exposes_typed_error() {
        let err = PipelineError::from(StepError::config("BAD_AGGREGATE", "unknown subject"));
        let se = err.as_step_error().unwrap();
        assert_eq!(se.category, ErrorCategory::Config);
        assert_eq!(err.to_string(), "[config] BAD_AGGREGATE: unknown subject");
    }

    #[test]
    fn test_infrastructure_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("runtime gone").into();
        assert!(err.as_step_error().is_none());
        assert!(!err.is_config());
        assert_eq!(err.to_string(), "runtime gone");
    }

    #[test]
    fn test_config_display_includes_context() {
        let err = PipelineError::Config(
            anyhow::anyhow!("step 'x' is unknown").context("Pipeline validation failed"),
        );
        assert!(err.is_config());
        let msg = err.to_string();
        assert!(msg.contains("Pipeline validation failed"));
        assert!(msg.contains("step 'x' is unknown"));
    }
}
