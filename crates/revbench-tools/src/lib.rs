//! revbench-tools: external collaborators of the revbench harness
//!
//! Every tool the harness shells out to sits behind a narrow async trait:
//!
//! - `VersionControl`: history, metadata and checkout (`GitRepo`)
//! - `BuildTool`: configure + compile + install (`AutotoolsBuild`)
//! - `Profiler`: wall-clock and retired instructions (`PerfStat`)
//! - `Engine`: version query of an installed binary (`InstalledEngine`)
//!
//! In-memory implementations for tests live in [`fakes`].

mod command;
mod error;
pub mod build;
pub mod engine;
pub mod fakes;
pub mod git;
pub mod perf;

pub use build::{AutotoolsBuild, BuildOptions, BuildTool};
pub use engine::{parse_version, Engine, InstalledEngine};
pub use error::ToolError;
pub use git::{CommitInfo, GitRepo, VersionControl};
pub use perf::{parse_counter, Invocation, Measurement, PerfStat, Profiler};

/// Result type for collaborator operations
pub type Result<T> = std::result::Result<T, ToolError>;
