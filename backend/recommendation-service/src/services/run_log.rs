//! File-backed batch run log
//!
//! Append-only JSON-lines file, redundant to the durable store so a run's
//! outcome is always observable even when the database is down. Records are
//! read back via deserialization, one per line, newest at the end.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::models::{BatchKind, RunStatus};

/// One line in the run log file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: BatchKind,
    pub status: RunStatus,
    pub processed_users: u64,
    pub total_recommendations: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct FileRunLog {
    path: PathBuf,
}

impl FileRunLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record; creates the file (and parent directory) on first use
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let line = serde_json::to_string(record)
            .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    /// All records in file order (oldest first); malformed lines are skipped
    pub fn read_all(&self) -> Result<Vec<RunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RunRecord>(&line) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(error = %err, "Skipping malformed run log line");
                }
            }
        }
        Ok(records)
    }

    /// Most recent `limit` records, newest first
    pub fn read_recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut records = self.read_all()?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: RunStatus, processed: u64) -> RunRecord {
        RunRecord {
            timestamp: Utc::now(),
            kind: BatchKind::Full,
            status,
            processed_users: processed,
            total_recommendations: processed * 10,
            error: None,
        }
    }

    #[test]
    fn appended_records_read_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRunLog::new(dir.path().join("runs.log"));

        log.append(&record(RunStatus::Completed, 10)).unwrap();
        log.append(&record(RunStatus::Failed, 5)).unwrap();
        log.append(&record(RunStatus::Stopped, 7)).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].status, RunStatus::Completed);
        assert_eq!(all[2].status, RunStatus::Stopped);

        let recent = log.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].status, RunStatus::Stopped);
        assert_eq!(recent[1].status, RunStatus::Failed);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.log");
        let log = FileRunLog::new(&path);

        log.append(&record(RunStatus::Completed, 3)).unwrap();
        std::fs::write(
            &path,
            format!(
                "{}\nnot json at all\n",
                std::fs::read_to_string(&path).unwrap().trim_end()
            ),
        )
        .unwrap();
        log.append(&record(RunStatus::Failed, 1)).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRunLog::new(dir.path().join("absent.log"));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn error_field_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let log = FileRunLog::new(dir.path().join("runs.log"));

        let mut rec = record(RunStatus::Failed, 5);
        rec.error = Some("chunk persistence failed".to_string());
        log.append(&rec).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all[0].error.as_deref(), Some("chunk persistence failed"));
    }
}
