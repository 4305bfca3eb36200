//! Runtime Configuration
//!
//! Bounds that keep evaluation and flushing finite. Every field has a
//! default, so a partial JSON document only overrides what it names.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tunables for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Nested computed-evaluation depth past which activation stops
    /// recursing and continues on the iterative worklist.
    pub max_eval_depth: usize,

    /// Maximum number of worklist suspensions for a single activation.
    pub max_worklist_passes: usize,

    /// Maximum number of carry-over rounds within one flush.
    pub max_flush_rounds: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_eval_depth: 256,
            max_worklist_passes: 65_536,
            max_flush_rounds: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = RuntimeConfig::from_json(r#"{ "max_eval_depth": 32 }"#).unwrap();
        assert_eq!(config.max_eval_depth, 32);
        assert_eq!(config.max_flush_rounds, RuntimeConfig::default().max_flush_rounds);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = RuntimeConfig::from_json("max_eval_depth = 3").unwrap_err();
        assert!(matches!(err, ReactiveError::Config(_)));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = RuntimeConfig {
            max_eval_depth: 8,
            max_worklist_passes: 9,
            max_flush_rounds: 10,
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(RuntimeConfig::from_json(&json).unwrap(), config);
    }
}
