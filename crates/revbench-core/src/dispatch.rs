//! Multi-core benchmarking of already-installed revisions.
//!
//! The coordinator checks every installed revision, queues the usable ones
//! followed by one `Stop` per worker, then runs `core_count` workers that
//! share the queue. Worker `n` pins its runs to CPU core `n` (core 0 is left
//! to the system).

use std::sync::Arc;

use revbench_tools::CommitInfo;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::cache::BuildArtifact;
use crate::error::{HarnessError, Result};
use crate::evaluator::Evaluator;

#[derive(Debug)]
enum WorkItem {
    Revision {
        artifact: BuildArtifact,
        info: CommitInfo,
    },
    Stop,
}

/// Per-worker outcome counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub core: usize,
    pub recorded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchSummary {
    pub workers: Vec<WorkerReport>,
    /// Installed revisions that failed the pre-check.
    pub skipped: Vec<String>,
}

impl DispatchSummary {
    pub fn recorded(&self) -> usize {
        self.workers.iter().map(|w| w.recorded).sum()
    }

    pub fn failed(&self) -> usize {
        self.workers.iter().map(|w| w.failed).sum()
    }
}

type SharedQueue = Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>;

pub struct Dispatcher {
    evaluator: Arc<Evaluator>,
}

impl Dispatcher {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Benchmark every installed revision once across `core_count` workers.
    pub async fn run_parallel(&self, core_count: usize) -> Result<DispatchSummary> {
        if core_count == 0 {
            return Err(HarnessError::Config("core count must be at least 1".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let mut summary = DispatchSummary::default();
        let mut queued = 0usize;

        for revision in self.evaluator.cache().installed_revisions().await? {
            match self.precheck(&revision).await? {
                Some(item) => {
                    let _ = tx.send(item);
                    queued += 1;
                }
                None => summary.skipped.push(revision),
            }
        }
        for _ in 0..core_count {
            let _ = tx.send(WorkItem::Stop);
        }
        drop(tx);

        info!(
            queued,
            skipped = summary.skipped.len(),
            workers = core_count,
            "dispatching"
        );

        let queue: SharedQueue = Arc::new(Mutex::new(rx));
        let handles: Vec<_> = (1..=core_count)
            .map(|core| tokio::spawn(worker(core, self.evaluator.clone(), queue.clone())))
            .collect();

        for joined in futures::future::join_all(handles).await {
            summary.workers.push(joined??);
        }
        summary.workers.sort_by_key(|w| w.core);

        info!(
            recorded = summary.recorded(),
            failed = summary.failed(),
            skipped = summary.skipped.len(),
            "dispatch finished"
        );
        Ok(summary)
    }

    /// Version query, alias and metadata, in the coordinator. `None` skips.
    async fn precheck(&self, revision: &str) -> Result<Option<WorkItem>> {
        if self.evaluator.is_denied(revision) {
            info!(revision = %revision, "deny-listed, not dispatched");
            return Ok(None);
        }
        let artifact = match self.evaluator.cache().installed(revision).await {
            Ok(Some(artifact)) => artifact,
            Ok(None) => return Ok(None),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(revision = %revision, error = %e, "install unusable");
                return Ok(None);
            }
        };
        match self.evaluator.vcs().metadata(revision).await {
            Ok(info) => Ok(Some(WorkItem::Revision { artifact, info })),
            Err(e) => {
                warn!(revision = %revision, error = %e, "metadata unavailable");
                Ok(None)
            }
        }
    }
}

async fn worker(core: usize, evaluator: Arc<Evaluator>, queue: SharedQueue) -> Result<WorkerReport> {
    let mut report = WorkerReport {
        core,
        ..WorkerReport::default()
    };
    loop {
        let item = queue.lock().await.recv().await;
        let (artifact, info) = match item {
            Some(WorkItem::Revision { artifact, info }) => (artifact, info),
            Some(WorkItem::Stop) | None => break,
        };
        debug!(core, revision = %artifact.revision, "worker picked revision");
        match evaluator.record_trial(&artifact, &info, Some(core)).await {
            Ok(_) => report.recorded += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(core, revision = %artifact.revision, error = %e, "benchmark failed");
                report.failed += 1;
            }
        }
    }
    debug!(core, recorded = report.recorded, failed = report.failed, "worker stopped");
    Ok(report)
}
