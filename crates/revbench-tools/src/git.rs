//! Version-control collaborator backed by the `git` CLI.
//!
//! The source checkout is a singleton that `checkout` and `clean` mutate in
//! place; callers must never run two of those concurrently.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::run_checked;
use crate::error::ToolError;
use crate::Result;

/// Commit metadata attached to every metric record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Committer date.
    pub date: DateTime<FixedOffset>,
    /// First line of the commit message.
    pub subject: String,
}

impl CommitInfo {
    /// Committer date in git's `%ci` layout (`2015-03-01 12:00:00 -0800`).
    pub fn date_string(&self) -> String {
        self.date.format("%Y-%m-%d %H:%M:%S %z").to_string()
    }
}

/// Version-control operations the harness depends on.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Resolve a reference (`HEAD`, branch, short sha) to a full commit id.
    async fn resolve(&self, reference: &str) -> Result<String>;

    /// Resolve the currently checked-out commit.
    async fn resolve_head(&self) -> Result<String> {
        self.resolve("HEAD").await
    }

    /// Every commit reachable from HEAD, newest first.
    async fn list_history(&self) -> Result<Vec<String>>;

    /// Date and subject of a commit.
    async fn metadata(&self, revision: &str) -> Result<CommitInfo>;

    /// Check out `revision`, discarding local modifications first.
    async fn checkout(&self, revision: &str) -> Result<()>;

    /// Discard uncommitted changes and remove generated artifacts.
    async fn clean(&self) -> Result<()>;
}

/// `git` CLI implementation of [`VersionControl`].
#[derive(Debug, Clone)]
pub struct GitRepo {
    repo_dir: PathBuf,
    /// Top-level entries of the checkout that `clean` must leave alone.
    preserved: Vec<String>,
}

impl GitRepo {
    /// Wrap the checkout at `repo_dir`.
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            preserved: Vec::new(),
        }
    }

    /// Keep `path` across [`clean`](VersionControl::clean) when it lives
    /// inside the checkout. The whole top-level entry containing it is
    /// kept. Paths outside the checkout are ignored.
    pub fn preserving(mut self, path: impl AsRef<Path>) -> Self {
        if let Some(entry) = top_level_entry(&self.repo_dir, path.as_ref()) {
            if !self.preserved.contains(&entry) {
                self.preserved.push(entry);
            }
        }
        self
    }

    /// Exclusion patterns passed to `git clean`.
    pub fn preserved(&self) -> &[String] {
        &self.preserved
    }

    /// Root of the checkout.
    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.repo_dir);
        let output = run_checked(cmd).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VersionControl for GitRepo {
    async fn resolve(&self, reference: &str) -> Result<String> {
        let revspec = format!("{reference}^{{commit}}");
        match self.git(&["rev-parse", "--verify", "--quiet", &revspec]).await {
            Ok(sha) if !sha.is_empty() => Ok(sha),
            Ok(_) | Err(ToolError::CommandFailed { .. }) => {
                Err(ToolError::UnknownRevision(reference.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn list_history(&self) -> Result<Vec<String>> {
        let out = self.git(&["rev-list", "HEAD"]).await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn metadata(&self, revision: &str) -> Result<CommitInfo> {
        let out = self
            .git(&["log", "-1", "--format=%cI%x00%s", revision])
            .await
            .map_err(|e| match e {
                ToolError::CommandFailed { .. } => {
                    ToolError::UnknownRevision(revision.to_string())
                }
                other => other,
            })?;
        parse_commit_info(&out)
    }

    async fn checkout(&self, revision: &str) -> Result<()> {
        info!(revision = %revision, "checking out");
        self.git(&["reset", "--hard", "--quiet"]).await?;
        self.git(&["checkout", "--force", "--quiet", revision]).await?;
        self.git(&["submodule", "--quiet", "update", "--init", "--recursive"])
            .await?;
        Ok(())
    }

    async fn clean(&self) -> Result<()> {
        debug!(repo = %self.repo_dir.display(), "cleaning checkout");
        self.git(&["reset", "--hard", "--quiet"]).await?;
        let mut args = vec!["clean", "-ffdx", "--quiet"];
        for pattern in &self.preserved {
            args.push("-e");
            args.push(pattern.as_str());
        }
        self.git(&args).await?;
        Ok(())
    }
}

/// Anchored `git clean -e` pattern for the first component of `path`
/// below `repo_dir`, if `path` is inside it.
fn top_level_entry(repo_dir: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(repo_dir).ok()?;
    match relative.components().next()? {
        Component::Normal(name) => Some(format!("/{}", name.to_string_lossy())),
        _ => None,
    }
}

/// Parse `git log --format=%cI%x00%s` output.
fn parse_commit_info(raw: &str) -> Result<CommitInfo> {
    let (date, subject) = raw.split_once('\0').ok_or_else(|| ToolError::Parse {
        source_name: "git log".to_string(),
        detail: format!("missing field separator in {raw:?}"),
    })?;
    let date = DateTime::parse_from_rfc3339(date.trim()).map_err(|e| ToolError::Parse {
        source_name: "git log".to_string(),
        detail: format!("bad committer date {date:?}: {e}"),
    })?;
    Ok(CommitInfo {
        date,
        subject: subject.to_string(),
    })
}
