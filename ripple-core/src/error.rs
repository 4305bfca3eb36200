//! Error types for the reactive engine.

use thiserror::Error;

use crate::graph::NodeId;

/// Errors surfaced by graph evaluation and flushing.
///
/// None of these are retried. `Cycle`, `Diverged` and `FlushLimit` indicate
/// a misuse of the graph (a dependency cycle or a subscriber that keeps
/// rescheduling work) rather than a transient condition.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A computed was read while its own evaluation was still running.
    #[error("dependency cycle detected at node {node}")]
    Cycle { node: NodeId },

    /// The iterative worklist did not settle within the configured passes.
    #[error("evaluation of node {node} did not converge after {passes} worklist passes")]
    Diverged { node: NodeId, passes: usize },

    /// A flush kept pulling already-run subscribers back into new rounds.
    #[error("flush did not settle after {rounds} rounds")]
    FlushLimit { rounds: usize },

    /// The runtime configuration could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Arena;

    #[test]
    fn errors_render_node_handles() {
        let mut arena = Arena::new();
        let node = arena.insert(());
        let err = ReactiveError::Cycle { node };
        assert_eq!(err.to_string(), format!("dependency cycle detected at node {node}"));

        let err = ReactiveError::FlushLimit { rounds: 7 };
        assert_eq!(err.to_string(), "flush did not settle after 7 rounds");
    }

    #[test]
    fn config_errors_convert_from_serde() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ReactiveError = parse.into();
        assert!(matches!(err, ReactiveError::Config(_)));
    }
}
