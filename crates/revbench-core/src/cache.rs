//! Disk-backed cache of installed revisions.
//!
//! A revision is installed under `install_root/<revision>`; whether the
//! engine binary exists there is the only record of "already built". Every
//! successful lookup also (re)creates `install_root/by-version/<version>`,
//! a symlink to the install directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use revbench_tools::{BuildOptions, BuildTool, Engine, ToolError, VersionControl};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};
use crate::metrics::METRICS;

/// Directory under the install root holding the by-version aliases.
pub const ALIAS_DIR: &str = "by-version";

/// An installed, runnable build of one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub revision: String,
    pub install_path: PathBuf,
    /// The engine executable inside `install_path`.
    pub binary: PathBuf,
    /// Version reported by the binary itself.
    pub version: String,
}

impl BuildArtifact {
    /// Name of the installed executable (`zeek`, `bro`, ...).
    pub fn binary_kind(&self) -> &str {
        self.binary
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Map an arbitrary name to a single safe path component.
fn path_component(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    if out.is_empty() || out.starts_with('.') {
        out.insert(0, '_');
    }
    out
}

pub struct BuildCache {
    install_root: PathBuf,
    binary_names: Vec<String>,
    options: BuildOptions,
    vcs: Arc<dyn VersionControl>,
    builder: Arc<dyn BuildTool>,
    engine: Arc<dyn Engine>,
}

impl BuildCache {
    pub fn new(
        install_root: impl Into<PathBuf>,
        binary_names: Vec<String>,
        options: BuildOptions,
        vcs: Arc<dyn VersionControl>,
        builder: Arc<dyn BuildTool>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            install_root: install_root.into(),
            binary_names,
            options,
            vcs,
            builder,
            engine,
        }
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Deterministic install directory of `revision`.
    pub fn install_path(&self, revision: &str) -> PathBuf {
        self.install_root.join(path_component(revision))
    }

    fn find_binary(&self, install_path: &Path) -> Option<PathBuf> {
        self.binary_names
            .iter()
            .map(|name| install_path.join(name))
            .find(|candidate| candidate.is_file())
    }

    /// The existing install of `revision`, if any. Never builds.
    pub async fn installed(&self, revision: &str) -> Result<Option<BuildArtifact>> {
        let install_path = self.install_path(revision);
        let Some(binary) = self.find_binary(&install_path) else {
            return Ok(None);
        };
        let artifact = self.probe(revision, install_path, binary).await?;
        METRICS.inc_reuses();
        debug!(revision = %revision, version = %artifact.version, "reusing install");
        Ok(Some(artifact))
    }

    /// Return the install of `revision`, building it first if needed.
    pub async fn ensure_built(&self, revision: &str) -> Result<BuildArtifact> {
        if let Some(artifact) = self.installed(revision).await? {
            return Ok(artifact);
        }

        let install_path = self.install_path(revision);
        match self.build(revision, &install_path).await {
            Ok(artifact) => {
                METRICS.inc_builds();
                info!(
                    revision = %revision,
                    version = %artifact.version,
                    install_path = %artifact.install_path.display(),
                    "build installed"
                );
                Ok(artifact)
            }
            Err(e) => {
                METRICS.inc_build_failures();
                self.discard_partial_install(revision, &install_path).await;
                Err(e)
            }
        }
    }

    async fn build(&self, revision: &str, install_path: &Path) -> Result<BuildArtifact> {
        info!(revision = %revision, "building");
        self.vcs
            .checkout(revision)
            .await
            .map_err(|e| HarnessError::build(revision, e))?;
        self.builder
            .configure(install_path, &self.options)
            .await
            .map_err(|e| HarnessError::build(revision, e))?;
        self.builder
            .compile_and_install(&self.options)
            .await
            .map_err(|e| HarnessError::build(revision, e))?;

        let binary = self
            .find_binary(install_path)
            .ok_or_else(|| HarnessError::Build {
                revision: revision.to_string(),
                stderr: format!(
                    "install finished but none of {:?} exists under {}",
                    self.binary_names,
                    install_path.display()
                ),
            })?;
        self.probe(revision, install_path.to_path_buf(), binary).await
    }

    /// Query the version and link the alias.
    async fn probe(
        &self,
        revision: &str,
        install_path: PathBuf,
        binary: PathBuf,
    ) -> Result<BuildArtifact> {
        let version = self
            .engine
            .version(&binary)
            .await
            .map_err(|e| HarnessError::build(revision, e))?;
        let artifact = BuildArtifact {
            revision: revision.to_string(),
            install_path,
            binary,
            version,
        };
        self.link_alias(&artifact)
            .await
            .map_err(|e| HarnessError::build(revision, ToolError::from(e)))?;
        Ok(artifact)
    }

    async fn link_alias(&self, artifact: &BuildArtifact) -> std::io::Result<()> {
        let alias_dir = self.install_root.join(ALIAS_DIR);
        tokio::fs::create_dir_all(&alias_dir).await?;
        let alias = alias_dir.join(path_component(&artifact.version));
        match tokio::fs::symlink_metadata(&alias).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&alias).await?,
            Ok(_) => tokio::fs::remove_file(&alias).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        // Relative target so the root can be moved as a whole.
        let target = Path::new("..").join(
            artifact
                .install_path
                .file_name()
                .unwrap_or(artifact.install_path.as_os_str()),
        );
        tokio::fs::symlink(&target, &alias).await?;
        debug!(alias = %alias.display(), target = %target.display(), "alias linked");
        Ok(())
    }

    async fn discard_partial_install(&self, revision: &str, install_path: &Path) {
        match tokio::fs::remove_dir_all(install_path).await {
            Ok(()) => debug!(revision = %revision, "removed partial install"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(
                revision = %revision,
                error = %e,
                "could not remove partial install"
            ),
        }
    }

    /// Revisions with an installed binary, sorted by name.
    pub async fn installed_revisions(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.install_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(HarnessError::Config(format!(
                    "cannot list install root {}: {e}",
                    self.install_root.display()
                )))
            }
        };

        let mut revisions = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(HarnessError::Config(format!(
                        "cannot list install root {}: {e}",
                        self.install_root.display()
                    )))
                }
            };
            let name = entry.file_name().to_string_lossy().to_string();
            if name == ALIAS_DIR {
                continue;
            }
            let path = entry.path();
            if path.is_dir() && self.find_binary(&path).is_some() {
                revisions.push(name);
            }
        }
        revisions.sort();
        Ok(revisions)
    }
}
