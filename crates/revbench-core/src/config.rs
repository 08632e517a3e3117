//! Harness configuration.
//!
//! Loaded from an optional JSON file, then overridden field by field by the
//! command line. Every field has a default.

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use revbench_tools::BuildOptions;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::runner::Workload;

pub const DEFAULT_MERGE_PATTERN: &str = "^Merge ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Source checkout that gets built.
    pub source_dir: PathBuf,
    /// Root of the per-revision install directories.
    pub install_root: PathBuf,
    /// Metric log.
    pub data_file: PathBuf,
    /// Candidate engine binaries inside an install, first match wins.
    pub binary_names: Vec<String>,
    pub captures: Vec<PathBuf>,
    pub scripts: Vec<PathBuf>,
    /// Benchmark runs per evaluated revision.
    pub trials: usize,
    /// Revisions never evaluated (full ids or prefixes).
    pub deny_list: Vec<String>,
    /// Only evaluate commits whose subject matches `merge_pattern`.
    pub merges_only: bool,
    pub merge_pattern: String,
    /// Worker count for `parallel`.
    pub cores: usize,
    pub perf_binary: String,
    pub build: BuildOptions,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("."),
            install_root: PathBuf::from("../revbench/installs"),
            data_file: PathBuf::from("../revbench/metrics.csv"),
            binary_names: vec!["bin/zeek".to_string(), "bin/bro".to_string()],
            captures: Vec::new(),
            scripts: Vec::new(),
            trials: 1,
            deny_list: Vec::new(),
            merges_only: false,
            merge_pattern: DEFAULT_MERGE_PATTERN.to_string(),
            cores: 1,
            perf_binary: "perf".to_string(),
            build: BuildOptions::default(),
        }
    }
}

impl HarnessConfig {
    /// Read a JSON configuration file. Missing fields keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| HarnessError::Config(format!("cannot parse {}: {e}", path.display())))
    }

    /// Check invariants and make every path absolute. Installs and the
    /// metric log may sit inside the source checkout but must not contain it.
    pub fn validate(&mut self) -> Result<()> {
        if self.trials == 0 {
            return Err(HarnessError::Config("trials must be at least 1".into()));
        }
        if self.cores == 0 {
            return Err(HarnessError::Config("cores must be at least 1".into()));
        }
        if self.binary_names.is_empty() {
            return Err(HarnessError::Config("binary_names must not be empty".into()));
        }
        if self.build.jobs == 0 {
            return Err(HarnessError::Config("build.jobs must be at least 1".into()));
        }
        self.merge_regex()?;

        self.source_dir = absolute(&self.source_dir)?;
        self.install_root = absolute(&self.install_root)?;
        self.data_file = absolute(&self.data_file)?;
        for path in self.captures.iter_mut().chain(self.scripts.iter_mut()) {
            *path = absolute(path)?;
        }
        let outputs = [("install_root", &self.install_root), ("data_file", &self.data_file)];
        for (name, path) in outputs {
            if self.source_dir.starts_with(path) {
                return Err(HarnessError::Config(format!(
                    "{name} {} must not contain the source checkout {}",
                    path.display(),
                    self.source_dir.display()
                )));
            }
        }
        Ok(())
    }

    pub fn merge_regex(&self) -> Result<Regex> {
        Regex::new(&self.merge_pattern).map_err(|e| {
            HarnessError::Config(format!("bad merge pattern {:?}: {e}", self.merge_pattern))
        })
    }

    /// The benchmark workload. Commands that run the engine need at least
    /// one capture.
    pub fn workload(&self) -> Result<Workload> {
        if self.captures.is_empty() {
            return Err(HarnessError::Config(
                "no capture files configured (use --capture)".into(),
            ));
        }
        Ok(Workload::new(self.captures.clone(), self.scripts.clone()))
    }
}

/// Absolute form of `path` with `.` and `..` folded lexically.
fn absolute(path: &Path) -> Result<PathBuf> {
    let joined = std::path::absolute(path)
        .map_err(|e| HarnessError::Config(format!("cannot resolve {}: {e}", path.display())))?;
    let mut normal = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normal.pop();
            }
            other => normal.push(other),
        }
    }
    Ok(normal)
}
