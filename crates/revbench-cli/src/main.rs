//! revbench - performance-regression harness CLI
//!
//! ## Commands
//!
//! - `run`: evaluate the history newest first, skipping recorded revisions
//! - `build`: build (or reuse) the installs of revisions
//! - `parallel`: benchmark every installed revision across pinned cores
//! - `bisect`: GOOD/BAD/SKIP exit code for `git bisect run`
//! - `sort`: print the metric log ordered by commit history

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, Level};

use revbench_core::{
    sort_by_history, write_records, BisectCriteria, Harness, HarnessConfig, MetricKey,
    BISECT_ABORT_EXIT, METRICS,
};

#[derive(Parser)]
#[command(name = "revbench")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build, benchmark and bisect engine revisions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON configuration file; flags override its values
    #[arg(long, global = true, env = "REVBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// Source checkout to build
    #[arg(long, global = true, env = "REVBENCH_SOURCE")]
    source: Option<PathBuf>,

    /// Root of the per-revision installs
    #[arg(long, global = true, env = "REVBENCH_INSTALL_ROOT")]
    install_root: Option<PathBuf>,

    /// Metric log (CSV)
    #[arg(long, global = true, env = "REVBENCH_DATA")]
    data: Option<PathBuf>,

    /// Packet capture replayed by every run (repeatable)
    #[arg(long = "capture", global = true)]
    captures: Vec<PathBuf>,

    /// Script loaded after the captures (repeatable)
    #[arg(long = "script", global = true)]
    scripts: Vec<PathBuf>,

    /// Benchmark runs per evaluated revision
    #[arg(long, global = true, env = "REVBENCH_TRIALS")]
    trials: Option<usize>,

    /// Revision (or prefix) never to evaluate (repeatable)
    #[arg(long = "deny", global = true)]
    deny: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate every unrecorded revision, newest first
    Run {
        /// Stop after this many revisions were built or benchmarked
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only evaluate commits whose subject matches the merge pattern
        #[arg(long)]
        merges_only: bool,

        /// Override the merge pattern (regex)
        #[arg(long)]
        merge_pattern: Option<String>,
    },

    /// Build revisions that are not installed yet
    Build {
        /// Revisions or references to build
        #[arg(default_value = "HEAD")]
        revisions: Vec<String>,
    },

    /// Benchmark every installed revision once across pinned workers
    Parallel {
        /// Number of workers; worker n is pinned to core n
        #[arg(short, long, env = "REVBENCH_CORES")]
        cores: Option<usize>,
    },

    /// Judge one revision for `git bisect run`
    Bisect {
        /// Values below this are good
        #[arg(short, long)]
        threshold: f64,

        /// Metric compared against the threshold (`elapsed` or `instructions`);
        /// inferred from the threshold's magnitude when omitted
        #[arg(short, long)]
        metric: Option<MetricKey>,

        /// Use an already recorded value when there is one
        #[arg(long)]
        fast: bool,

        /// Revision to judge
        #[arg(default_value = "HEAD")]
        revision: String,
    },

    /// Print the metric log ordered newest commit first
    Sort {
        /// Order oldest commit first instead
        #[arg(long)]
        oldest_first: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    revbench_core::init_tracing(cli.json, level);

    let config = load_config(&cli)?;

    let result = match cli.command {
        Commands::Run {
            limit,
            merges_only,
            merge_pattern,
        } => cmd_run(config, limit, merges_only, merge_pattern).await,
        Commands::Build { revisions } => cmd_build(config, &revisions).await,
        Commands::Parallel { cores } => cmd_parallel(config, cores).await,
        Commands::Bisect {
            threshold,
            metric,
            fast,
            revision,
        } => {
            let criteria = BisectCriteria::new(threshold, metric, fast);
            let code = cmd_bisect(config, &revision, &criteria).await;
            METRICS.flush();
            std::process::exit(code);
        }
        Commands::Sort { oldest_first } => cmd_sort(config, oldest_first).await,
    };

    METRICS.flush();
    result
}

/// Configuration file (if any) with the global flags applied on top.
fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    if let Some(source) = &cli.source {
        config.source_dir = source.clone();
    }
    if let Some(root) = &cli.install_root {
        config.install_root = root.clone();
    }
    if let Some(data) = &cli.data {
        config.data_file = data.clone();
    }
    if !cli.captures.is_empty() {
        config.captures = cli.captures.clone();
    }
    if !cli.scripts.is_empty() {
        config.scripts = cli.scripts.clone();
    }
    if let Some(trials) = cli.trials {
        config.trials = trials;
    }
    config.deny_list.extend(cli.deny.iter().cloned());
    Ok(config)
}

fn open_harness(mut config: HarnessConfig, needs_workload: bool) -> Result<Harness> {
    config.validate().context("Invalid configuration")?;
    if needs_workload {
        config.workload().context("Invalid configuration")?;
    }
    Harness::from_config(config).context("Failed to set up harness")
}

async fn cmd_run(
    mut config: HarnessConfig,
    limit: Option<usize>,
    merges_only: bool,
    merge_pattern: Option<String>,
) -> Result<()> {
    config.merges_only |= merges_only;
    if let Some(pattern) = merge_pattern {
        config.merge_pattern = pattern;
    }
    let harness = open_harness(config, true)?;

    let summary = harness
        .evaluator()
        .run(limit)
        .await
        .context("Evaluation run aborted")?;

    println!(
        "visited {}  recorded {}  failed {}  already recorded {}  not sampled {}",
        summary.visited,
        summary.recorded,
        summary.failed,
        summary.already_handled,
        summary.not_sampled
    );
    Ok(())
}

async fn cmd_build(config: HarnessConfig, revisions: &[String]) -> Result<()> {
    let harness = open_harness(config, false)?;

    for reference in revisions {
        let revision = harness
            .vcs()
            .resolve(reference)
            .await
            .with_context(|| format!("Cannot resolve {reference}"))?;
        let artifact = harness
            .cache()
            .ensure_built(&revision)
            .await
            .with_context(|| format!("Build of {reference} failed"))?;
        println!(
            "{}  {}  {}",
            artifact.revision,
            artifact.version,
            artifact.install_path.display()
        );
    }
    Ok(())
}

async fn cmd_parallel(mut config: HarnessConfig, cores: Option<usize>) -> Result<()> {
    if let Some(cores) = cores {
        config.cores = cores;
    }
    let cores = config.cores;
    let harness = open_harness(config, true)?;

    let summary = harness
        .dispatcher()
        .run_parallel(cores)
        .await
        .context("Parallel run aborted")?;

    for worker in &summary.workers {
        println!(
            "core {}: recorded {}  failed {}",
            worker.core, worker.recorded, worker.failed
        );
    }
    for revision in &summary.skipped {
        println!("skipped {revision}");
    }
    Ok(())
}

/// Exit code for `git bisect run`. Anything that prevents a verdict
/// aborts the bisection.
async fn cmd_bisect(config: HarnessConfig, revision: &str, criteria: &BisectCriteria) -> i32 {
    let harness = match open_harness(config, true) {
        Ok(harness) => harness,
        Err(e) => {
            error!(error = %format!("{e:#}"), "cannot start bisect step");
            return BISECT_ABORT_EXIT;
        }
    };

    match harness.bisector().decide(revision, criteria).await {
        Ok(verdict) => {
            info!(revision = %revision, verdict = %verdict, "bisect step done");
            println!("{verdict}");
            verdict.exit_code()
        }
        Err(e) => {
            error!(revision = %revision, error = %e, "aborting bisection");
            BISECT_ABORT_EXIT
        }
    }
}

async fn cmd_sort(config: HarnessConfig, oldest_first: bool) -> Result<()> {
    let harness = open_harness(config, false)?;

    let records = harness
        .store()
        .records()
        .context("Failed to read metric log")?;
    let mut history = harness
        .vcs()
        .list_history()
        .await
        .context("Failed to list history")?;
    if oldest_first {
        history.reverse();
    }

    let sorted = sort_by_history(records, &history);
    write_records(&sorted, std::io::stdout().lock()).context("Failed to write records")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_bisect_arguments() {
        let cli = Cli::try_parse_from([
            "revbench",
            "--capture",
            "traces/m57.pcap",
            "bisect",
            "--threshold",
            "5000000",
            "--metric",
            "instructions",
            "--fast",
            "abc123",
        ])
        .unwrap();
        match cli.command {
            Commands::Bisect {
                threshold,
                metric,
                fast,
                revision,
            } => {
                assert_eq!(threshold, 5_000_000.0);
                assert_eq!(metric, Some(MetricKey::Instructions));
                assert!(fast);
                assert_eq!(revision, "abc123");
            }
            _ => panic!("expected bisect"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("revbench.json");
        std::fs::write(
            &path,
            r#"{ "trials": 2, "deny_list": ["bad1"], "captures": ["a.pcap"] }"#,
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "revbench",
            "--config",
            path.to_str().unwrap(),
            "--trials",
            "5",
            "--deny",
            "bad2",
            "--capture",
            "b.pcap",
            "run",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();

        assert_eq!(config.trials, 5);
        assert_eq!(config.deny_list, vec!["bad1", "bad2"]);
        assert_eq!(config.captures, vec![PathBuf::from("b.pcap")]);
    }

    #[test]
    fn test_build_defaults_to_head() {
        let cli = Cli::try_parse_from(["revbench", "build"]).unwrap();
        match cli.command {
            Commands::Build { revisions } => assert_eq!(revisions, vec!["HEAD"]),
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_sort_order_flag() {
        let cli = Cli::try_parse_from(["revbench", "sort"]).unwrap();
        assert!(matches!(cli.command, Commands::Sort { oldest_first: false }));
        let cli = Cli::try_parse_from(["revbench", "sort", "--oldest-first"]).unwrap();
        assert!(matches!(cli.command, Commands::Sort { oldest_first: true }));
    }

    #[test]
    fn test_unknown_metric_is_rejected() {
        assert!(Cli::try_parse_from(["revbench", "bisect", "-t", "15", "-m", "cycles"]).is_err());
    }
}
