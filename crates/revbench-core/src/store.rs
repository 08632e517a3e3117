//! Append-only metric log.
//!
//! One CSV row per benchmark sample, no header:
//! `revision,date,subject,version,elapsed_seconds,instruction_count`.
//! Rows are only ever appended; order is append order, and rows for one
//! revision need not be contiguous.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HarnessError, Result};

/// One benchmark sample of one revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub revision: String,
    pub date: String,
    pub subject: String,
    pub version: String,
    pub elapsed_seconds: f64,
    pub instruction_count: u64,
}

/// Which measurement a threshold applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    /// Wall-clock seconds.
    Elapsed,
    /// Retired instructions.
    Instructions,
}

/// Thresholds below this are read as seconds, the rest as instructions.
pub const INSTRUCTION_KEY_BOUNDARY: f64 = 10_000.0;

impl MetricKey {
    /// Infer the key from the magnitude of a threshold.
    ///
    /// Only for callers that were not given an explicit key.
    pub fn for_threshold(threshold: f64) -> Self {
        if threshold < INSTRUCTION_KEY_BOUNDARY {
            MetricKey::Elapsed
        } else {
            MetricKey::Instructions
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MetricKey::Elapsed => "elapsed",
            MetricKey::Instructions => "instructions",
        }
    }

    /// The keyed field of `record`.
    pub fn value(&self, record: &MetricRecord) -> f64 {
        match self {
            MetricKey::Elapsed => record.elapsed_seconds,
            MetricKey::Instructions => record.instruction_count as f64,
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MetricKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "elapsed" | "elapsed_seconds" | "time" => Ok(MetricKey::Elapsed),
            "instructions" | "instruction_count" => Ok(MetricKey::Instructions),
            other => Err(format!(
                "unknown metric {other:?} (expected `elapsed` or `instructions`)"
            )),
        }
    }
}

/// CSV-backed metric log shared by every evaluator and worker.
#[derive(Debug)]
pub struct MetricStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl MetricStore {
    /// Open the log at `path`. The file itself is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| HarnessError::store(&path, e))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every record, in append order. A missing log is an empty log.
    pub fn records(&self) -> Result<Vec<MetricRecord>> {
        let _guard = self.guard();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HarnessError::store(&self.path, e)),
        };
        csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(file)
            .deserialize()
            .collect::<std::result::Result<Vec<MetricRecord>, csv::Error>>()
            .map_err(|e| HarnessError::store(&self.path, e))
    }

    /// Whether at least one record for `revision` has been appended.
    ///
    /// Scans the whole log; the log stays tiny next to the cost of a build.
    pub fn has(&self, revision: &str) -> Result<bool> {
        Ok(self.records()?.iter().any(|r| r.revision == revision))
    }

    /// `key` of the most recently appended record for `revision`.
    pub fn lookup(&self, revision: &str, key: MetricKey) -> Result<Option<f64>> {
        Ok(self
            .records()?
            .iter()
            .rev()
            .find(|r| r.revision == revision)
            .map(|r| key.value(r)))
    }

    /// Durably append one record.
    pub fn append(&self, record: &MetricRecord) -> Result<()> {
        let _guard = self.guard();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| HarnessError::store(&self.path, e))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|e| HarnessError::store(&self.path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| HarnessError::store(&self.path, e.into_error()))?;
        file.sync_data()
            .map_err(|e| HarnessError::store(&self.path, e))?;

        debug!(
            revision = %record.revision,
            elapsed_seconds = record.elapsed_seconds,
            instruction_count = record.instruction_count,
            "metric recorded"
        );
        Ok(())
    }

    /// [`append`](Self::append) on tokio's blocking pool, for callers on
    /// async worker threads.
    pub async fn append_blocking(self: Arc<Self>, record: MetricRecord) -> Result<()> {
        tokio::task::spawn_blocking(move || self.append(&record)).await?
    }
}

/// Order records newest commit first, by position in `history`
/// (newest-first). Records of revisions missing from `history` go last;
/// ties keep append order.
pub fn sort_by_history(mut records: Vec<MetricRecord>, history: &[String]) -> Vec<MetricRecord> {
    let position: HashMap<&str, usize> = history
        .iter()
        .enumerate()
        .map(|(idx, rev)| (rev.as_str(), idx))
        .collect();
    records.sort_by_key(|r| {
        position
            .get(r.revision.as_str())
            .copied()
            .unwrap_or(usize::MAX)
    });
    records
}

/// Write records in the log's own format.
pub fn write_records<W: Write>(records: &[MetricRecord], out: W) -> csv::Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(revision: &str, elapsed: f64, instructions: u64) -> MetricRecord {
        MetricRecord {
            revision: revision.to_string(),
            date: "2015-03-01 12:00:00 -0800".to_string(),
            subject: format!("subject of {revision}"),
            version: "2.4-100".to_string(),
            elapsed_seconds: elapsed,
            instruction_count: instructions,
        }
    }

    fn make_store() -> (tempfile::TempDir, MetricStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetricStore::open(dir.path().join("data/metrics.csv")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_log_is_empty() {
        let (_dir, store) = make_store();
        assert!(store.records().unwrap().is_empty());
        assert!(!store.has("r1").unwrap());
        assert_eq!(store.lookup("r1", MetricKey::Elapsed).unwrap(), None);
    }

    #[test]
    fn test_has_flips_after_append() {
        let (_dir, store) = make_store();
        assert!(!store.has("r1").unwrap());
        store.append(&record("r1", 10.0, 100)).unwrap();
        assert!(store.has("r1").unwrap());
        assert!(!store.has("r2").unwrap());
    }

    #[test]
    fn test_lookup_returns_latest_record() {
        let (_dir, store) = make_store();
        store.append(&record("r1", 10.0, 100)).unwrap();
        store.append(&record("r2", 20.0, 200)).unwrap();
        store.append(&record("r1", 12.5, 150)).unwrap();

        assert_eq!(store.lookup("r1", MetricKey::Elapsed).unwrap(), Some(12.5));
        assert_eq!(store.lookup("r1", MetricKey::Instructions).unwrap(), Some(150.0));
        assert_eq!(store.lookup("r2", MetricKey::Elapsed).unwrap(), Some(20.0));
    }

    #[test]
    fn test_subject_with_delimiters_survives() {
        let (_dir, store) = make_store();
        let mut tricky = record("r1", 1.25, 7);
        tricky.subject = "Merge branch 'topic', fix \"quoted\", and more".to_string();
        store.append(&tricky).unwrap();

        let back = store.records().unwrap();
        assert_eq!(back, vec![tricky]);
    }

    #[test]
    fn test_append_never_rewrites_prior_rows() {
        let (_dir, store) = make_store();
        store.append(&record("r1", 10.0, 100)).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();
        store.append(&record("r2", 20.0, 200)).unwrap();
        let after = std::fs::read_to_string(store.path()).unwrap();

        assert!(after.starts_with(&before));
        assert_eq!(after.lines().count(), 2);
    }

    #[test]
    fn test_concurrent_appends_stay_well_formed() {
        let (_dir, store) = make_store();
        std::thread::scope(|s| {
            for worker in 0..8 {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        store
                            .append(&record(&format!("w{worker}-{i}"), i as f64, i))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(store.records().unwrap().len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_appends_from_async_tasks() {
        let (_dir, store) = make_store();
        let store = Arc::new(store);
        let appends = (0..16).map(|i| {
            let store = Arc::clone(&store);
            tokio::spawn(store.append_blocking(record(&format!("t{i}"), i as f64, i)))
        });
        for joined in futures::future::join_all(appends).await {
            joined.unwrap().unwrap();
        }
        assert_eq!(store.records().unwrap().len(), 16);
    }

    #[test]
    fn test_corrupt_log_is_a_store_error() {
        let (_dir, store) = make_store();
        std::fs::write(store.path(), "r1,only,three\n").unwrap();
        let err = store.records().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_sort_by_history_newest_first() {
        let history = vec!["c3".to_string(), "b2".to_string(), "a1".to_string()];
        let records = vec![
            record("a1", 1.0, 1),
            record("zz", 9.0, 9),
            record("c3", 3.0, 3),
            record("a1", 1.5, 1),
            record("b2", 2.0, 2),
        ];
        let sorted: Vec<(String, f64)> = sort_by_history(records, &history)
            .into_iter()
            .map(|r| (r.revision, r.elapsed_seconds))
            .collect();
        assert_eq!(
            sorted,
            vec![
                ("c3".to_string(), 3.0),
                ("b2".to_string(), 2.0),
                ("a1".to_string(), 1.0),
                ("a1".to_string(), 1.5),
                ("zz".to_string(), 9.0),
            ]
        );
    }

    #[test]
    fn test_sort_by_reversed_history_oldest_first() {
        let mut history = vec!["c3".to_string(), "b2".to_string(), "a1".to_string()];
        history.reverse();
        let records = vec![record("zz", 9.0, 9), record("c3", 3.0, 3), record("a1", 1.0, 1)];
        let sorted: Vec<String> = sort_by_history(records, &history)
            .into_iter()
            .map(|r| r.revision)
            .collect();
        assert_eq!(sorted, vec!["a1", "c3", "zz"]);
    }

    #[test]
    fn test_metric_key_parsing() {
        assert_eq!("elapsed".parse::<MetricKey>().unwrap(), MetricKey::Elapsed);
        assert_eq!(
            "instruction_count".parse::<MetricKey>().unwrap(),
            MetricKey::Instructions
        );
        assert!("cycles".parse::<MetricKey>().is_err());
    }

    #[test]
    fn test_metric_key_for_threshold() {
        assert_eq!(MetricKey::for_threshold(15.0), MetricKey::Elapsed);
        assert_eq!(MetricKey::for_threshold(9_999.9), MetricKey::Elapsed);
        assert_eq!(MetricKey::for_threshold(10_000.0), MetricKey::Instructions);
        assert_eq!(MetricKey::for_threshold(5_000_000.0), MetricKey::Instructions);
    }
}
