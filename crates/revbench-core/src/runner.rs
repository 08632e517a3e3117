//! One profiled benchmark invocation of an installed build.

use std::path::PathBuf;
use std::sync::Arc;

use revbench_tools::{Invocation, Measurement, Profiler, ToolError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::BuildArtifact;
use crate::error::{HarnessError, Result};

/// Fixed input replayed by every benchmark run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Packet captures, each read with `-r`.
    pub captures: Vec<PathBuf>,
    /// Scripts loaded after the captures.
    pub scripts: Vec<PathBuf>,
}

impl Workload {
    pub fn new(captures: Vec<PathBuf>, scripts: Vec<PathBuf>) -> Self {
        Self { captures, scripts }
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Engine arguments: `-r <capture>` per capture, then the scripts.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.captures.len() * 2 + self.scripts.len());
        for capture in &self.captures {
            args.push("-r".to_string());
            args.push(capture.display().to_string());
        }
        args.extend(self.scripts.iter().map(|s| s.display().to_string()));
        args
    }
}

/// Raw samples of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkStats {
    pub elapsed_seconds: f64,
    pub instruction_count: u64,
}

impl From<Measurement> for BenchmarkStats {
    fn from(m: Measurement) -> Self {
        Self {
            elapsed_seconds: m.elapsed.as_secs_f64(),
            instruction_count: m.instructions,
        }
    }
}

pub struct Runner {
    profiler: Arc<dyn Profiler>,
}

impl Runner {
    pub fn new(profiler: Arc<dyn Profiler>) -> Self {
        Self { profiler }
    }

    /// Run `artifact` once against `workload`, optionally pinned to a core.
    ///
    /// The engine runs in a fresh scratch directory so its log files never
    /// mix between runs.
    pub async fn execute(
        &self,
        artifact: &BuildArtifact,
        workload: &Workload,
        pinned_core: Option<usize>,
    ) -> Result<BenchmarkStats> {
        let scratch = tempfile::Builder::new()
            .prefix("revbench-run-")
            .tempdir()
            .map_err(|e| HarnessError::run(&artifact.revision, ToolError::from(e)))?;

        let invocation = Invocation {
            program: artifact.binary.clone(),
            args: workload.args(),
            cwd: scratch.path().to_path_buf(),
            pinned_core,
        };
        let measurement = self
            .profiler
            .measure(&invocation)
            .await
            .map_err(|e| HarnessError::run(&artifact.revision, e))?;

        if measurement.instructions == 0 {
            return Err(HarnessError::Run {
                revision: artifact.revision.clone(),
                reason: "profiler counted no instructions".to_string(),
            });
        }

        let stats = BenchmarkStats::from(measurement);
        debug!(
            revision = %artifact.revision,
            core = ?pinned_core,
            elapsed_seconds = stats.elapsed_seconds,
            instruction_count = stats.instruction_count,
            "benchmark finished"
        );
        Ok(stats)
    }
}
