//! Records of finished trainer runs and the on-disk ledger that keeps them.

use super::scores::TrainerScores;
use crate::error::{Result, SweepError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of one trainer invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    /// The trainer exited non-zero or was killed by a signal.
    Failed,
    /// The interpreter could not be started at all.
    SpawnFailed,
    TimedOut,
    /// Killed on Ctrl-C; the sweep stopped here.
    Interrupted,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        *self == Self::Succeeded
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SpawnFailed => "spawn_failed",
            Self::TimedOut => "timed_out",
            Self::Interrupted => "interrupted",
        }
    }
}

/// One finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub sweep_id: String,
    pub sweep_name: String,
    /// 1-based position in the sweep.
    pub index: usize,
    pub description: String,
    pub fingerprint: String,
    pub command: Vec<String>,
    pub status: RunStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(default)]
    pub best_checkpoint: Option<PathBuf>,
    #[serde(default)]
    pub scores: Option<TrainerScores>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Summary of one sweep invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub sweep_id: String,
    pub sweep_name: String,
    pub records: Vec<RunRecord>,
    /// Set when `fail_fast` stopped the sweep early.
    pub stopped_early: bool,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0 && !self.stopped_early
    }
}

/// Append-only JSON history of runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunLedger {
    pub records: Vec<RunRecord>,
}

impl RunLedger {
    /// Load the ledger, or an empty one if the file does not exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| SweepError::Ledger(format!("{} is corrupt: {e}", path.display())))
    }

    /// Write through a `.tmp` sibling and rename, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Load, append one record, save.
    pub fn append(path: &Path, record: RunRecord) -> Result<()> {
        let mut ledger = Self::load(path)?;
        ledger.records.push(record);
        ledger.save(path)
    }

    /// The newest `limit` records, oldest first.
    pub fn recent(&self, limit: usize) -> &[RunRecord] {
        let start = self.records.len().saturating_sub(limit);
        &self.records[start..]
    }

    /// Records of the same configuration, oldest first. A fingerprint prefix
    /// is enough, as with abbreviated git hashes.
    pub fn by_fingerprint<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a RunRecord> {
        self.records
            .iter()
            .filter(move |r| r.fingerprint.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(index: usize, status: RunStatus) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            sweep_id: "s1".to_string(),
            sweep_name: "test".to_string(),
            index,
            description: format!("run {index}"),
            fingerprint: format!("fp{index}"),
            command: vec!["python3".to_string(), "train.py".to_string()],
            status,
            exit_code: Some(if status.is_success() { 0 } else { 1 }),
            started_at: now,
            finished_at: now,
            duration_secs: 0.5,
            best_checkpoint: None,
            scores: None,
            error: None,
        }
    }

    #[test]
    fn test_ledger_append_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".pdbsweep").join("ledger.json");

        RunLedger::append(&path, record(1, RunStatus::Succeeded)).unwrap();
        RunLedger::append(&path, record(2, RunStatus::Failed)).unwrap();

        let ledger = RunLedger::load(&path).unwrap();
        assert_eq!(ledger.records.len(), 2);
        assert_eq!(ledger.records[1].status, RunStatus::Failed);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_missing_ledger_is_empty() {
        let ledger = RunLedger::load(Path::new("/nonexistent/ledger.json")).unwrap();
        assert!(ledger.records.is_empty());
    }

    #[test]
    fn test_corrupt_ledger_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(RunLedger::load(&path), Err(SweepError::Ledger(_))));
    }

    #[test]
    fn test_recent_and_fingerprint_lookup() {
        let ledger = RunLedger {
            records: (1..=5).map(|i| record(i, RunStatus::Succeeded)).collect(),
        };
        let recent: Vec<usize> = ledger.recent(2).iter().map(|r| r.index).collect();
        assert_eq!(recent, vec![4, 5]);
        assert_eq!(ledger.recent(50).len(), 5);
        assert_eq!(ledger.by_fingerprint("fp3").count(), 1);
        assert_eq!(ledger.by_fingerprint("fp").count(), 5);
        assert_eq!(ledger.by_fingerprint("zz").count(), 0);
    }

    #[test]
    fn test_report_counts() {
        let report = SweepReport {
            sweep_id: "s1".to_string(),
            sweep_name: "test".to_string(),
            records: vec![
                record(1, RunStatus::Succeeded),
                record(2, RunStatus::SpawnFailed),
                record(3, RunStatus::TimedOut),
            ],
            stopped_early: false,
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert!(!report.all_succeeded());
    }
}
