//! Error types for revbench-tools

use thiserror::Error;

/// Errors raised by the external collaborators (git, build, profiler, engine).
#[derive(Error, Debug)]
pub enum ToolError {
    /// A collaborator binary could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A collaborator command exited unsuccessfully.
    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Collaborator output could not be interpreted.
    #[error("unparseable output from {source_name}: {detail}")]
    Parse { source_name: String, detail: String },

    /// The repository does not know the revision.
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Captured stderr for command failures, the display string otherwise.
    pub fn stderr(&self) -> String {
        match self {
            ToolError::CommandFailed { stderr, .. } => stderr.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_display() {
        let err = ToolError::CommandFailed {
            command: "make -j8".to_string(),
            code: 2,
            stderr: "No rule to make target".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("make -j8"));
        assert!(msg.contains("code 2"));
        assert_eq!(err.stderr(), "No rule to make target");
    }

    #[test]
    fn test_stderr_falls_back_to_display() {
        let err = ToolError::UnknownRevision("deadbeef".to_string());
        assert_eq!(err.stderr(), "unknown revision: deadbeef");
    }
}
