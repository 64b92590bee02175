//! The persisted sync job descriptor.
//!
//! A job file records the two roots, the baseline (`statusLines`) and the
//! operational settings carried between runs. It is read at the start of
//! every run and rewritten after every mutation; the JSON schema round-trips
//! exactly, including the order of `statusLines`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::item::FileStamp;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to read or write job file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed job file: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The persisted unit of work.
///
/// Owns the baseline exclusively: the engine only ever sees snapshots of it,
/// and only the applier mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    /// Root of side A.
    pub path_a: PathBuf,
    /// Root of side B.
    pub path_b: PathBuf,
    /// Baseline: one entry per previously-synchronized key.
    #[serde(default)]
    pub status_lines: Vec<FileStamp>,
    /// Directory the daily audit logs are written to.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// How many daily log files to retain; 0 keeps all of them.
    #[serde(default)]
    pub log_file_limit: usize,
    /// Run this job with debug-level logging.
    #[serde(default)]
    pub debug: bool,
}

impl SyncJob {
    pub fn new(path_a: PathBuf, path_b: PathBuf) -> Self {
        Self {
            path_a,
            path_b,
            status_lines: Vec::new(),
            log_path: None,
            log_file_limit: 0,
            debug: false,
        }
    }

    /// Load a job descriptor from disk.
    pub fn load(path: &Path) -> Result<Self, JobError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save the job descriptor to disk.
    pub fn save(&self, path: &Path) -> Result<(), JobError> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Look up the baseline entry for a key, if any.
    pub fn find_status(&self, key: &str) -> Option<&FileStamp> {
        self.status_lines.iter().find(|line| line.key == key)
    }

    /// Absolute path of `key` under side A.
    pub fn file_a(&self, key: &str) -> PathBuf {
        self.path_a.join(key)
    }

    /// Absolute path of `key` under side B.
    pub fn file_b(&self, key: &str) -> PathBuf {
        self.path_b.join(key)
    }
}
