//! Error taxonomy for the evaluation engine.

use std::path::PathBuf;

use revbench_tools::ToolError;

/// revbench errors.
///
/// `Build`, `Run` and `Metadata` describe one revision and are recoverable:
/// the Evaluator, Bisector and Dispatcher turn them into a failed outcome or
/// a SKIP verdict. The rest mean the harness cannot make progress at all.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("build of {revision} failed: {stderr}")]
    Build { revision: String, stderr: String },

    #[error("benchmark of {revision} failed: {reason}")]
    Run { revision: String, reason: String },

    #[error("metadata resolution failed for {revision}: {reason}")]
    Metadata { revision: String, reason: String },

    #[error("metric store {path} unusable: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl HarnessError {
    pub(crate) fn build(revision: &str, err: ToolError) -> Self {
        HarnessError::Build {
            revision: revision.to_string(),
            stderr: err.stderr(),
        }
    }

    pub(crate) fn run(revision: &str, err: ToolError) -> Self {
        HarnessError::Run {
            revision: revision.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn metadata(revision: &str, err: ToolError) -> Self {
        HarnessError::Metadata {
            revision: revision.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn store(path: impl Into<PathBuf>, source: impl Into<csv::Error>) -> Self {
        HarnessError::Store {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Whether the error must abort the whole operation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::Store { .. } | HarnessError::Worker(_) | HarnessError::Config(_)
        )
    }
}

/// Result type for revbench operations.
pub type Result<T> = std::result::Result<T, HarnessError>;
