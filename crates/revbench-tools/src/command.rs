//! Subprocess helpers shared by the collaborator implementations.

use std::process::Output;

use tokio::process::Command;
use tracing::debug;

use crate::error::ToolError;
use crate::Result;

/// Render a command line for logs and error messages.
pub(crate) fn describe(command: &Command) -> String {
    let std_cmd = command.as_std();
    let mut parts = vec![std_cmd.get_program().to_string_lossy().to_string()];
    parts.extend(std_cmd.get_args().map(|a| a.to_string_lossy().to_string()));
    parts.join(" ")
}

/// Run `command` to completion, failing on spawn errors and non-zero exits.
pub(crate) async fn run_checked(mut command: Command) -> Result<Output> {
    let command_line = describe(&command);
    debug!(command = %command_line, "running");

    let output = command
        .output()
        .await
        .map_err(|source| ToolError::Spawn {
            program: command_line.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ToolError::CommandFailed {
            command: command_line,
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output)
}
