//! The benchmarked engine, as seen from outside: an installed binary that
//! answers `--version`.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::command::run_checked;
use crate::error::ToolError;
use crate::Result;

/// Version query against an installed engine binary.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Self-reported version string of `binary`.
    async fn version(&self, binary: &Path) -> Result<String>;
}

/// Runs `<binary> --version`.
#[derive(Debug, Clone, Default)]
pub struct InstalledEngine;

#[async_trait]
impl Engine for InstalledEngine {
    async fn version(&self, binary: &Path) -> Result<String> {
        let mut cmd = Command::new(binary);
        cmd.arg("--version");
        let output = run_checked(cmd).await?;

        // Older releases print the banner on stderr.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let banner = if stdout.trim().is_empty() {
            String::from_utf8_lossy(&output.stderr).to_string()
        } else {
            stdout.to_string()
        };
        parse_version(&banner)
    }
}

/// Last whitespace-separated token of the first non-empty line
/// (`bro version 2.5-467` -> `2.5-467`).
pub fn parse_version(banner: &str) -> Result<String> {
    banner
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.split_whitespace().last())
        .map(str::to_string)
        .ok_or_else(|| ToolError::Parse {
            source_name: "--version".to_string(),
            detail: "empty version banner".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_parse_version_banner() {
        assert_eq!(parse_version("bro version 2.5-467\n").unwrap(), "2.5-467");
        assert_eq!(parse_version("\nzeek version 3.1.0-dev.12\n").unwrap(), "3.1.0-dev.12");
    }

    #[test]
    fn test_parse_version_bare() {
        assert_eq!(parse_version("2.6").unwrap(), "2.6");
    }

    #[test]
    fn test_parse_version_empty() {
        assert!(parse_version("  \n\n").is_err());
    }

    #[tokio::test]
    async fn test_installed_engine_reads_stderr_banner() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bro");
        std::fs::write(&bin, "#!/bin/sh\necho 'bro version 2.4.1' >&2\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let version = InstalledEngine.version(&bin).await.expect("version query failed");
        assert_eq!(version, "2.4.1");
    }

    #[tokio::test]
    async fn test_installed_engine_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let result = InstalledEngine.version(&dir.path().join("nope")).await;
        assert!(result.is_err());
    }
}
