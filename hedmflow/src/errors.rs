//! Error types for the hedmflow orchestrator.
//!
//! All errors abort the run; there is no partial pipeline continuation.

use crate::stages::StageKind;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for hedmflow operations.
#[derive(Debug, Error)]
pub enum HedmflowError {
    /// A required parameter was absent or empty.
    #[error("Missing required parameter: {name}")]
    MissingParameter {
        /// The parameter name.
        name: String,
    },

    /// An external invocation exited non-zero or could not be launched.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// A join stage was invoked before all predecessor outputs existed.
    ///
    /// Should not occur under correct sequencing, but guarded defensively.
    #[error("Dependency not ready for stage '{stage}': missing output {}", .path.display())]
    DependencyNotReady {
        /// The join stage that was about to run.
        stage: StageKind,
        /// The missing predecessor output file.
        path: PathBuf,
    },

    /// The run was cancelled.
    #[error("Run cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// A spawned node task panicked or was aborted.
    #[error("Node task join error: {0}")]
    TaskJoin(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HedmflowError {
    /// Creates a missing parameter error.
    #[must_use]
    pub fn missing_parameter(name: impl Into<String>) -> Self {
        Self::MissingParameter { name: name.into() }
    }

    /// Creates a cancelled error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }
}

/// Error raised when an external stage invocation fails.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}'{} failed: {detail}", node_suffix(.node))]
pub struct StageExecutionError {
    /// The stage whose invocation failed.
    pub stage: StageKind,
    /// The node index, for fan-out stages.
    pub node: Option<u32>,
    /// What went wrong (exit status, spawn failure, stderr tail).
    pub detail: String,
}

impl StageExecutionError {
    /// Creates a new stage execution error.
    #[must_use]
    pub fn new(stage: StageKind, node: Option<u32>, detail: impl Into<String>) -> Self {
        Self {
            stage,
            node,
            detail: detail.into(),
        }
    }
}

fn node_suffix(node: &Option<u32>) -> String {
    node.map_or_else(String::new, |n| format!(" (node {n})"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_parameter_display() {
        let err = HedmflowError::missing_parameter("folder");
        assert_eq!(err.to_string(), "Missing required parameter: folder");
    }

    #[test]
    fn test_stage_execution_error_with_node() {
        let err = StageExecutionError::new(StageKind::Peaks, Some(4), "exit status 1");
        assert_eq!(err.to_string(), "Stage 'peaks' (node 4) failed: exit status 1");
    }

    #[test]
    fn test_stage_execution_error_without_node() {
        let err = StageExecutionError::new(StageKind::PostPeaks, None, "spawn failed");
        assert_eq!(err.to_string(), "Stage 'postPeaks' failed: spawn failed");
    }

    #[test]
    fn test_dependency_not_ready_display() {
        let err = HedmflowError::DependencyNotReady {
            stage: StageKind::ProcessGrains,
            path: PathBuf::from("/data/output/IndexRefine_2_.out"),
        };
        let msg = err.to_string();
        assert!(msg.contains("processGrains"));
        assert!(msg.contains("IndexRefine_2_.out"));
    }

    #[test]
    fn test_stage_execution_wraps_into_main_error() {
        let err: HedmflowError =
            StageExecutionError::new(StageKind::IndexRefine, Some(0), "exit status 2").into();
        assert!(matches!(err, HedmflowError::StageExecution(_)));
    }
}
