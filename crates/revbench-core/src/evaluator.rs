//! Per-revision pipeline: metadata, build, benchmark, record.
//!
//! ```text
//! Pending ──metadata+build──▶ Built ──run──▶ Measured ──append──▶ Recorded
//!    │                          │
//!    └──────────▶ Failed ◀──────┘
//! ```
//!
//! Failures of one revision come back as [`Evaluation::Failed`]; only fatal
//! errors (see [`HarnessError::is_fatal`]) are returned as `Err`.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use revbench_tools::{CommitInfo, VersionControl};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::cache::{BuildArtifact, BuildCache};
use crate::config::{HarnessConfig, DEFAULT_MERGE_PATTERN};
use crate::error::{HarnessError, Result};
use crate::metrics::METRICS;
use crate::runner::{Runner, Workload};
use crate::store::{MetricRecord, MetricStore};

/// What gets evaluated and how often.
#[derive(Debug, Clone)]
pub struct EvalPolicy {
    pub trials: usize,
    pub deny_list: HashSet<String>,
    pub merges_only: bool,
    pub merge_pattern: Regex,
}

impl Default for EvalPolicy {
    fn default() -> Self {
        Self {
            trials: 1,
            deny_list: HashSet::new(),
            merges_only: false,
            merge_pattern: Regex::new(DEFAULT_MERGE_PATTERN).expect("default pattern is valid"),
        }
    }
}

impl EvalPolicy {
    pub fn from_config(config: &HarnessConfig) -> Result<Self> {
        Ok(Self {
            trials: config.trials,
            deny_list: config.deny_list.iter().cloned().collect(),
            merges_only: config.merges_only,
            merge_pattern: config.merge_regex()?,
        })
    }

    /// Deny-list entries match full ids and id prefixes.
    pub fn is_denied(&self, revision: &str) -> bool {
        self.deny_list
            .iter()
            .any(|entry| !entry.is_empty() && revision.starts_with(entry.as_str()))
    }

    /// Whether a commit with this subject is sampled by `run`.
    pub fn samples(&self, subject: &str) -> bool {
        !self.merges_only || self.merge_pattern.is_match(subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalState {
    Pending,
    Built,
    Measured,
    Recorded,
    Failed,
}

#[derive(Debug)]
pub enum Evaluation {
    /// Already recorded or deny-listed; nothing was done.
    AlreadyHandled,
    /// Every trial was recorded; `record` is the last one.
    Recorded { record: MetricRecord, trials: usize },
    /// The revision failed in `stage`. Trials recorded before the failure
    /// stay in the store.
    Failed { stage: EvalState, error: HarnessError },
}

impl Evaluation {
    pub fn state(&self) -> Option<EvalState> {
        match self {
            Evaluation::AlreadyHandled => None,
            Evaluation::Recorded { .. } => Some(EvalState::Recorded),
            Evaluation::Failed { .. } => Some(EvalState::Failed),
        }
    }
}

/// Counts from one sequential `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub visited: usize,
    pub not_sampled: usize,
    pub already_handled: usize,
    pub recorded: usize,
    pub failed: usize,
}

pub struct Evaluator {
    vcs: Arc<dyn VersionControl>,
    cache: Arc<BuildCache>,
    runner: Runner,
    store: Arc<MetricStore>,
    workload: Workload,
    policy: EvalPolicy,
}

impl Evaluator {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        cache: Arc<BuildCache>,
        runner: Runner,
        store: Arc<MetricStore>,
        workload: Workload,
        policy: EvalPolicy,
    ) -> Self {
        Self {
            vcs,
            cache,
            runner,
            store,
            workload,
            policy,
        }
    }

    pub fn vcs(&self) -> &Arc<dyn VersionControl> {
        &self.vcs
    }

    pub fn cache(&self) -> &Arc<BuildCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn policy(&self) -> &EvalPolicy {
        &self.policy
    }

    pub fn is_denied(&self, revision: &str) -> bool {
        self.policy.is_denied(revision)
    }

    /// Evaluate `revision` unless it is deny-listed or already recorded.
    pub async fn evaluate(&self, revision: &str) -> Result<Evaluation> {
        if self.is_denied(revision) {
            info!(revision = %revision, "deny-listed, skipping");
            return Ok(Evaluation::AlreadyHandled);
        }
        if self.store.has(revision)? {
            info!(revision = %revision, "already recorded, skipping");
            return Ok(Evaluation::AlreadyHandled);
        }
        self.evaluate_fresh(revision).await
    }

    /// Evaluate `revision` even if records for it exist.
    #[instrument(skip_all, fields(revision = %revision))]
    pub async fn evaluate_fresh(&self, revision: &str) -> Result<Evaluation> {
        let info = match self.vcs.metadata(revision).await {
            Ok(info) => info,
            Err(e) => return Ok(failed(EvalState::Pending, HarnessError::metadata(revision, e))),
        };

        let artifact = match self.cache.ensure_built(revision).await {
            Ok(artifact) => artifact,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(failed(EvalState::Pending, e)),
        };

        let mut last = None;
        for trial in 1..=self.policy.trials {
            match self.record_trial(&artifact, &info, None).await {
                Ok(record) => {
                    info!(
                        trial,
                        elapsed_seconds = record.elapsed_seconds,
                        instruction_count = record.instruction_count,
                        "trial recorded"
                    );
                    last = Some(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => return Ok(failed(EvalState::Built, e)),
            }
        }

        let record =
            last.ok_or_else(|| HarnessError::Config("trials must be at least 1".into()))?;
        Ok(Evaluation::Recorded {
            record,
            trials: self.policy.trials,
        })
    }

    /// Benchmark an installed build once and append the record.
    pub async fn record_trial(
        &self,
        artifact: &BuildArtifact,
        info: &CommitInfo,
        pinned_core: Option<usize>,
    ) -> Result<MetricRecord> {
        let stats = match self.runner.execute(artifact, &self.workload, pinned_core).await {
            Ok(stats) => stats,
            Err(e) => {
                METRICS.inc_run_failures();
                return Err(e);
            }
        };

        let record = MetricRecord {
            revision: artifact.revision.clone(),
            date: info.date_string(),
            subject: info.subject.clone(),
            version: artifact.version.clone(),
            elapsed_seconds: stats.elapsed_seconds,
            instruction_count: stats.instruction_count,
        };
        Arc::clone(&self.store)
            .append_blocking(record.clone())
            .await?;
        METRICS.inc_trials_recorded();
        Ok(record)
    }

    /// Walk the history newest first and evaluate each revision, stopping
    /// after `limit` revisions that needed work.
    pub async fn run(&self, limit: Option<usize>) -> Result<RunSummary> {
        let history = self
            .vcs
            .list_history()
            .await
            .map_err(|e| HarnessError::metadata("HEAD", e))?;
        info!(revisions = history.len(), "evaluating history");

        let mut summary = RunSummary::default();
        for revision in &history {
            if limit.is_some_and(|n| summary.recorded + summary.failed >= n) {
                break;
            }
            summary.visited += 1;

            if self.policy.merges_only {
                match self.vcs.metadata(revision).await {
                    Ok(info) if self.policy.samples(&info.subject) => {}
                    Ok(_) => {
                        summary.not_sampled += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!(revision = %revision, error = %e, "metadata unavailable");
                        summary.failed += 1;
                        continue;
                    }
                }
            }

            match self.evaluate(revision).await? {
                Evaluation::AlreadyHandled => summary.already_handled += 1,
                Evaluation::Recorded { .. } => summary.recorded += 1,
                Evaluation::Failed { stage, error } => {
                    warn!(revision = %revision, ?stage, error = %error, "evaluation failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            visited = summary.visited,
            recorded = summary.recorded,
            failed = summary.failed,
            already_handled = summary.already_handled,
            "run finished"
        );
        Ok(summary)
    }
}

fn failed(stage: EvalState, error: HarnessError) -> Evaluation {
    Evaluation::Failed { stage, error }
}
