//! revbench-core: revision evaluation engine
//!
//! Builds revisions of a packet-processing engine at most once, benchmarks
//! them against a fixed workload and keeps an append-only metric log that
//! drives bisection of performance regressions.
//!
//! ## Components
//!
//! - [`MetricStore`]: CSV metric log, idempotence queries
//! - [`BuildCache`]: per-revision installs, by-version aliases
//! - [`Runner`]: one profiled run of an installed binary
//! - [`Evaluator`]: checkout, build, benchmark and record one revision
//! - [`Bisector`]: GOOD/BAD/SKIP verdicts for `git bisect run`
//! - [`Dispatcher`]: installed revisions across pinned worker tasks

pub mod bisect;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod harness;
pub mod metrics;
pub mod runner;
pub mod store;
pub mod telemetry;

pub use bisect::{classify, BisectCriteria, Bisector, Verdict, BISECT_ABORT_EXIT, VALIDITY_FLOOR};
pub use cache::{BuildArtifact, BuildCache, ALIAS_DIR};
pub use config::HarnessConfig;
pub use dispatch::{DispatchSummary, Dispatcher, WorkerReport};
pub use error::{HarnessError, Result};
pub use evaluator::{EvalPolicy, EvalState, Evaluation, Evaluator, RunSummary};
pub use harness::Harness;
pub use metrics::METRICS;
pub use runner::{BenchmarkStats, Runner, Workload};
pub use store::{sort_by_history, write_records, MetricKey, MetricRecord, MetricStore};
pub use telemetry::init_tracing;
