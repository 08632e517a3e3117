//! Threshold verdicts for an external `git bisect run` driver.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::evaluator::{Evaluation, Evaluator};
use crate::store::MetricKey;

/// Values below this are treated as broken runs rather than fast ones.
pub const VALIDITY_FLOOR: f64 = 5.0;

/// Exit code that makes `git bisect run` abort the whole bisection.
pub const BISECT_ABORT_EXIT: i32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Good,
    Bad,
    Skip,
}

impl Verdict {
    /// `git bisect run` convention.
    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Good => 0,
            Verdict::Bad => 1,
            Verdict::Skip => 125,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
            Verdict::Skip => "skip",
        })
    }
}

/// Partition a metric value against a threshold.
pub fn classify(value: f64, threshold: f64) -> Verdict {
    if value < VALIDITY_FLOOR {
        Verdict::Skip
    } else if value < threshold {
        Verdict::Good
    } else {
        Verdict::Bad
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BisectCriteria {
    pub threshold: f64,
    pub metric: MetricKey,
    /// Trust a value already in the metric log instead of re-running.
    pub fast: bool,
}

impl BisectCriteria {
    /// Without an explicit key the metric is inferred from the threshold.
    pub fn new(threshold: f64, metric: Option<MetricKey>, fast: bool) -> Self {
        Self {
            threshold,
            metric: metric.unwrap_or_else(|| MetricKey::for_threshold(threshold)),
            fast,
        }
    }
}

pub struct Bisector {
    evaluator: Arc<Evaluator>,
}

impl Bisector {
    pub fn new(evaluator: Arc<Evaluator>) -> Self {
        Self { evaluator }
    }

    /// Decide `revision`. The checkout is cleaned before returning, whatever
    /// the outcome. `Err` means the bisection itself must stop.
    pub async fn decide(&self, revision: &str, criteria: &BisectCriteria) -> Result<Verdict> {
        let outcome = self.judge(revision, criteria).await;
        if let Err(e) = self.evaluator.vcs().clean().await {
            warn!(revision = %revision, error = %e, "workspace clean failed");
        }
        match &outcome {
            Ok(verdict) => info!(
                revision = %revision,
                verdict = %verdict,
                threshold = criteria.threshold,
                metric = %criteria.metric,
                "bisect verdict"
            ),
            Err(e) => warn!(revision = %revision, error = %e, "bisection aborted"),
        }
        outcome
    }

    async fn judge(&self, revision: &str, criteria: &BisectCriteria) -> Result<Verdict> {
        let revision = match self.evaluator.vcs().resolve(revision).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(revision = %revision, error = %e, "cannot resolve revision");
                return Ok(Verdict::Skip);
            }
        };
        if self.evaluator.is_denied(&revision) {
            info!(revision = %revision, "deny-listed");
            return Ok(Verdict::Skip);
        }

        if criteria.fast {
            if let Some(value) = self.evaluator.store().lookup(&revision, criteria.metric)? {
                info!(revision = %revision, value, "using recorded value");
                return Ok(classify(value, criteria.threshold));
            }
        }

        match self.evaluator.evaluate_fresh(&revision).await? {
            Evaluation::Recorded { record, .. } => {
                Ok(classify(criteria.metric.value(&record), criteria.threshold))
            }
            Evaluation::Failed { stage, error } => {
                warn!(revision = %revision, ?stage, error = %error, "evaluation failed");
                Ok(Verdict::Skip)
            }
            Evaluation::AlreadyHandled => Ok(Verdict::Skip),
        }
    }
}
