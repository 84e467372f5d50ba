//! Row-level error handling policy.

use serde::{Deserialize, Serialize};

/// What a step does with a row that raised a row-scoped error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Drop the row, log it and count it as rejected.
    #[default]
    Skip,
    /// Treat the row error as fatal for the run.
    Fail,
    /// Send the row, extended with error fields, down the step's error hop.
    Redirect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_skip() {
        assert_eq!(RowErrorPolicy::default(), RowErrorPolicy::Skip);
    }

    #[test]
    fn serde_names() {
        let p: RowErrorPolicy = serde_json::from_str("\"redirect\"").unwrap();
        assert_eq!(p, RowErrorPolicy::Redirect);
    }
}
