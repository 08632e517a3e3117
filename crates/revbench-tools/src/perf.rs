//! Profiling collaborator: wall-clock time plus retired-instruction counts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::command::run_checked;
use crate::error::ToolError;
use crate::Result;

/// One command line to profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Binary to run.
    pub program: PathBuf,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Working directory of the run.
    pub cwd: PathBuf,
    /// Restrict the run to this CPU core.
    pub pinned_core: Option<usize>,
}

/// Raw samples from one profiled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Measurement {
    pub elapsed: Duration,
    pub instructions: u64,
}

/// Runs a command under a hardware-counter profiler.
#[async_trait]
pub trait Profiler: Send + Sync {
    /// Run `invocation` once. Fails if the command exits non-zero or the
    /// report carries no parseable instruction counter.
    async fn measure(&self, invocation: &Invocation) -> Result<Measurement>;
}

/// `perf stat` backed [`Profiler`].
///
/// Each call writes its report into its own temporary file, so concurrent
/// measurements never read one another's counters.
#[derive(Debug, Clone)]
pub struct PerfStat {
    perf_binary: String,
    event: String,
}

impl Default for PerfStat {
    fn default() -> Self {
        Self {
            perf_binary: "perf".to_string(),
            event: "instructions".to_string(),
        }
    }
}

impl PerfStat {
    pub fn new(perf_binary: impl Into<String>) -> Self {
        Self {
            perf_binary: perf_binary.into(),
            ..Self::default()
        }
    }

    fn command(&self, invocation: &Invocation, report: &std::path::Path) -> Command {
        let mut cmd = match invocation.pinned_core {
            Some(core) => {
                let mut c = Command::new("taskset");
                c.arg("-c").arg(core.to_string()).arg(&self.perf_binary);
                c
            }
            None => Command::new(&self.perf_binary),
        };
        cmd.args(["stat", "-x", " ", "-e", &self.event, "-o"])
            .arg(report)
            .arg("--")
            .arg(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd);
        cmd
    }
}

#[async_trait]
impl Profiler for PerfStat {
    async fn measure(&self, invocation: &Invocation) -> Result<Measurement> {
        let report = tempfile::Builder::new()
            .prefix("revbench-perf-")
            .suffix(".txt")
            .tempfile()?;
        let cmd = self.command(invocation, report.path());

        let start = Instant::now();
        run_checked(cmd).await?;
        let elapsed = start.elapsed();

        let text = tokio::fs::read_to_string(report.path()).await?;
        let instructions = parse_counter(&text, &self.event)?;
        debug!(
            program = %invocation.program.display(),
            elapsed_ms = elapsed.as_millis() as u64,
            instructions,
            "measured"
        );
        Ok(Measurement {
            elapsed,
            instructions,
        })
    }
}

/// Extract `event`'s count from a `perf stat -x ' '` report.
///
/// Comment lines (`# started on ...`) and blank lines are skipped. The
/// event may carry a modifier suffix (`instructions:u`).
pub fn parse_counter(report: &str, event: &str) -> Result<u64> {
    let modified = format!("{event}:");
    for line in report.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if !fields
            .iter()
            .any(|f| *f == event || f.starts_with(&modified))
        {
            continue;
        }
        return fields[0].parse::<u64>().map_err(|_| ToolError::Parse {
            source_name: "perf stat".to_string(),
            detail: format!("counter for {event} is not a number: {line:?}"),
        });
    }
    Err(ToolError::Parse {
        source_name: "perf stat".to_string(),
        detail: format!("no {event} counter in report"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_counter_with_header() {
        let report = "# started on Mon Mar  2 10:00:00 2015\n\n8123456789  instructions:u 1000 100.00\n";
        assert_eq!(parse_counter(report, "instructions").unwrap(), 8_123_456_789);
    }

    #[test]
    fn test_parse_counter_bare_event() {
        assert_eq!(parse_counter("42 instructions", "instructions").unwrap(), 42);
    }

    #[test]
    fn test_parse_counter_not_counted() {
        let err = parse_counter("<not counted>  instructions", "instructions").unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }

    #[test]
    fn test_parse_counter_missing_event() {
        let err = parse_counter("# started\n1234 cycles\n", "instructions").unwrap_err();
        assert!(err.to_string().contains("no instructions counter"));
    }

    #[test]
    fn test_pinned_command_wraps_taskset() {
        let perf = PerfStat::default();
        let inv = Invocation {
            program: PathBuf::from("/opt/rb/abc/bin/bro"),
            args: vec!["-r".to_string(), "trace.pcap".to_string()],
            cwd: PathBuf::from("/tmp"),
            pinned_core: Some(3),
        };
        let line = crate::command::describe(&perf.command(&inv, std::path::Path::new("/tmp/r.txt")));
        assert!(line.starts_with("taskset -c 3 perf stat"));
        assert!(line.ends_with("-- /opt/rb/abc/bin/bro -r trace.pcap"));
    }

    #[test]
    fn test_unpinned_command_runs_perf_directly() {
        let perf = PerfStat::default();
        let inv = Invocation {
            program: PathBuf::from("bin/bro"),
            args: vec![],
            cwd: PathBuf::from("/tmp"),
            pinned_core: None,
        };
        let line = crate::command::describe(&perf.command(&inv, std::path::Path::new("/tmp/r.txt")));
        assert!(line.starts_with("perf stat -x"));
    }
}
