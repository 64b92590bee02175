//! Observations fed to the reconciliation engine.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A file key plus the modification time it was last seen with.
///
/// The same record backs live observations and persisted baseline entries
/// (`statusLines` in the job file), so the JSON field names follow the
/// on-disk descriptor schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileStamp {
    /// Path relative to a sync root. The cross-side identity of a file.
    pub key: String,
    /// Modification time, milliseconds since the Unix epoch.
    pub last_modified: u64,
}

impl FileStamp {
    pub fn new(key: impl Into<String>, last_modified: u64) -> Self {
        Self {
            key: key.into(),
            last_modified,
        }
    }
}

/// Where an observation came from.
///
/// The source tag doubles as the identity marker: a resolved winner requires
/// a copy only toward the side whose own observation it is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    SideA,
    SideB,
    Baseline,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::SideA => write!(f, "side A"),
            Source::SideB => write!(f, "side B"),
            Source::Baseline => write!(f, "baseline"),
        }
    }
}

// thiserror treats the `source` field of `EngineError::DuplicateKey` as the
// error source, which requires `Source: std::error::Error`. The field is a
// display-only identity tag (per spec), so this impl only exists to satisfy
// that bound; all methods use the defaults.
impl std::error::Error for Source {}

/// A single observation of one key from one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observed {
    pub source: Source,
    pub stamp: FileStamp,
}

impl Observed {
    pub fn new(source: Source, key: impl Into<String>, last_modified: u64) -> Self {
        Self {
            source,
            stamp: FileStamp::new(key, last_modified),
        }
    }

    pub fn key(&self) -> &str {
        &self.stamp.key
    }

    pub fn last_modified(&self) -> u64 {
        self.stamp.last_modified
    }
}

/// Picks whichever observation carries the strictly later modification time.
///
/// Equal timestamps are a tie (`None`): the sides are treated as already in
/// agreement, never as a conflict requiring a copy.
pub fn latest_wins<'a>(x: &'a Observed, y: &'a Observed) -> Option<&'a Observed> {
    match x.last_modified().cmp(&y.last_modified()) {
        Ordering::Greater => Some(x),
        Ordering::Less => Some(y),
        Ordering::Equal => None,
    }
}
