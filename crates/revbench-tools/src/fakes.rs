//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `FakeRepo`, `FakeBuildTool`, `FakeEngine` and `FakeProfiler`
//! that satisfy the trait contracts without git, a compiler or perf.
//!
//! The fakes agree on one convention: an installed binary is a plain file
//! whose content is the version string, and the revision is the name of the
//! install directory.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;

use crate::build::{BuildOptions, BuildTool};
use crate::engine::Engine;
use crate::error::ToolError;
use crate::git::{CommitInfo, VersionControl};
use crate::perf::{Invocation, Measurement, Profiler};
use crate::Result;

/// Write a fake engine binary reporting `version` under `install_path`.
pub fn install_fake_binary(
    install_path: &Path,
    binary_name: &str,
    version: &str,
) -> std::io::Result<PathBuf> {
    let binary = install_path.join(binary_name);
    if let Some(parent) = binary.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&binary, format!("{version}\n"))?;
    Ok(binary)
}

fn revision_of(install_path: &Path) -> String {
    install_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// FakeRepo
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RepoState {
    head: Option<String>,
    checkouts: Vec<String>,
    cleans: usize,
}

/// In-memory commit history, newest first.
#[derive(Debug, Default)]
pub struct FakeRepo {
    commits: Vec<(String, CommitInfo)>,
    broken: HashSet<String>,
    state: Mutex<RepoState>,
}

impl FakeRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a commit newer than every existing one.
    pub fn with_commit(mut self, revision: &str, subject: &str) -> Self {
        let base = DateTime::parse_from_rfc3339("2015-01-01T00:00:00+00:00").unwrap();
        let date = base + chrono::Duration::hours(self.commits.len() as i64);
        self.commits.insert(
            0,
            (
                revision.to_string(),
                CommitInfo {
                    date,
                    subject: subject.to_string(),
                },
            ),
        );
        self
    }

    /// Make `metadata(revision)` fail.
    pub fn with_broken_metadata(mut self, revision: &str) -> Self {
        self.broken.insert(revision.to_string());
        self
    }

    /// Revisions passed to `checkout`, in call order.
    pub fn checkouts(&self) -> Vec<String> {
        self.state.lock().unwrap().checkouts.clone()
    }

    /// Number of `clean` calls.
    pub fn clean_count(&self) -> usize {
        self.state.lock().unwrap().cleans
    }

    fn find(&self, reference: &str) -> Option<&(String, CommitInfo)> {
        self.commits
            .iter()
            .find(|(rev, _)| rev == reference)
            .or_else(|| self.commits.iter().find(|(rev, _)| rev.starts_with(reference)))
    }
}

#[async_trait]
impl VersionControl for FakeRepo {
    async fn resolve(&self, reference: &str) -> Result<String> {
        if reference == "HEAD" {
            let head = self.state.lock().unwrap().head.clone();
            return head
                .or_else(|| self.commits.first().map(|(rev, _)| rev.clone()))
                .ok_or_else(|| ToolError::UnknownRevision(reference.to_string()));
        }
        self.find(reference)
            .map(|(rev, _)| rev.clone())
            .ok_or_else(|| ToolError::UnknownRevision(reference.to_string()))
    }

    async fn list_history(&self) -> Result<Vec<String>> {
        Ok(self.commits.iter().map(|(rev, _)| rev.clone()).collect())
    }

    async fn metadata(&self, revision: &str) -> Result<CommitInfo> {
        if self.broken.contains(revision) {
            return Err(ToolError::CommandFailed {
                command: format!("git log -1 {revision}"),
                code: 128,
                stderr: "fatal: bad object".to_string(),
            });
        }
        self.commits
            .iter()
            .find(|(rev, _)| rev == revision)
            .map(|(_, info)| info.clone())
            .ok_or_else(|| ToolError::UnknownRevision(revision.to_string()))
    }

    async fn checkout(&self, revision: &str) -> Result<()> {
        if self.find(revision).is_none() {
            return Err(ToolError::UnknownRevision(revision.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.checkouts.push(revision.to_string());
        state.head = Some(revision.to_string());
        Ok(())
    }

    async fn clean(&self) -> Result<()> {
        self.state.lock().unwrap().cleans += 1;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeBuildTool
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct BuildState {
    pending: Option<PathBuf>,
    configured: Vec<PathBuf>,
    installs: usize,
}

/// Build tool that "installs" a version-file binary per install path.
#[derive(Debug)]
pub struct FakeBuildTool {
    binary_name: String,
    failing: HashSet<String>,
    state: Mutex<BuildState>,
}

impl FakeBuildTool {
    pub fn new(binary_name: &str) -> Self {
        Self {
            binary_name: binary_name.to_string(),
            failing: HashSet::new(),
            state: Mutex::new(BuildState::default()),
        }
    }

    /// Make configure fail for `revision`.
    pub fn failing_for(mut self, revision: &str) -> Self {
        self.failing.insert(revision.to_string());
        self
    }

    /// Install prefixes passed to `configure`, in call order.
    pub fn configured(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().configured.clone()
    }

    /// Number of completed `compile_and_install` calls.
    pub fn install_count(&self) -> usize {
        self.state.lock().unwrap().installs
    }
}

#[async_trait]
impl BuildTool for FakeBuildTool {
    async fn configure(&self, install_path: &Path, _options: &BuildOptions) -> Result<()> {
        let revision = revision_of(install_path);
        let mut state = self.state.lock().unwrap();
        state.configured.push(install_path.to_path_buf());
        if self.failing.contains(&revision) {
            state.pending = None;
            return Err(ToolError::CommandFailed {
                command: "./configure".to_string(),
                code: 1,
                stderr: format!("configure: error: cannot build {revision}"),
            });
        }
        state.pending = Some(install_path.to_path_buf());
        Ok(())
    }

    async fn compile_and_install(&self, _options: &BuildOptions) -> Result<()> {
        let install_path = {
            let mut state = self.state.lock().unwrap();
            let path = state.pending.take().ok_or_else(|| ToolError::CommandFailed {
                command: "make".to_string(),
                code: 2,
                stderr: "no configured build".to_string(),
            })?;
            state.installs += 1;
            path
        };
        let version = format!("2.6-{}", revision_of(&install_path));
        install_fake_binary(&install_path, &self.binary_name, &version)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeEngine
// ---------------------------------------------------------------------------

/// Reads the version straight out of a fake binary's content.
#[derive(Debug, Default)]
pub struct FakeEngine;

#[async_trait]
impl Engine for FakeEngine {
    async fn version(&self, binary: &Path) -> Result<String> {
        let content = tokio::fs::read_to_string(binary).await?;
        let version = content.trim();
        if version.is_empty() {
            return Err(ToolError::CommandFailed {
                command: format!("{} --version", binary.display()),
                code: 134,
                stderr: "Aborted".to_string(),
            });
        }
        Ok(version.to_string())
    }
}

// ---------------------------------------------------------------------------
// FakeProfiler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProfilerState {
    invocations: Vec<Invocation>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Profiler returning canned measurements keyed by revision.
///
/// A revision matches when it is one of the components of the invoked
/// program's path.
#[derive(Debug)]
pub struct FakeProfiler {
    default: Measurement,
    results: HashMap<String, Measurement>,
    failing: HashSet<String>,
    delay: Duration,
    state: Mutex<ProfilerState>,
}

impl Default for FakeProfiler {
    fn default() -> Self {
        Self {
            default: Measurement {
                elapsed: Duration::from_secs(10),
                instructions: 1_000_000,
            },
            results: HashMap::new(),
            failing: HashSet::new(),
            delay: Duration::ZERO,
            state: Mutex::new(ProfilerState::default()),
        }
    }
}

impl FakeProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned result for runs of `revision`'s binary.
    pub fn with_result(mut self, revision: &str, elapsed_secs: f64, instructions: u64) -> Self {
        self.results.insert(
            revision.to_string(),
            Measurement {
                elapsed: Duration::from_secs_f64(elapsed_secs),
                instructions,
            },
        );
        self
    }

    /// Make runs of `revision`'s binary crash.
    pub fn failing_for(mut self, revision: &str) -> Self {
        self.failing.insert(revision.to_string());
        self
    }

    /// Hold every measurement open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every invocation seen so far.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// Highest number of measurements that were in progress at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn matches(program: &Path, revision: &str) -> bool {
        program.components().any(|c| c.as_os_str() == revision)
    }
}

#[async_trait]
impl Profiler for FakeProfiler {
    async fn measure(&self, invocation: &Invocation) -> Result<Measurement> {
        {
            let mut state = self.state.lock().unwrap();
            state.invocations.push(invocation.clone());
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.state.lock().unwrap().in_flight -= 1;

        let program = &invocation.program;
        if self.failing.iter().any(|rev| Self::matches(program, rev)) {
            return Err(ToolError::CommandFailed {
                command: program.display().to_string(),
                code: 139,
                stderr: "Segmentation fault".to_string(),
            });
        }
        Ok(self
            .results
            .iter()
            .find(|(rev, _)| Self::matches(program, rev))
            .map(|(_, m)| *m)
            .unwrap_or(self.default))
    }
}
