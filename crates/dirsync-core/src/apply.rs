//! Executes sync operations against the filesystem and the baseline.
//!
//! File actions are best-effort: an I/O failure on one key is logged and the
//! remaining operations still run. The operation's baseline action runs even
//! when its file action failed; the resulting drift is re-detected and
//! corrected by the next full batch pass. Integrity errors mean the baseline
//! itself is corrupt and abort the whole batch.

use std::io;
use std::path::Path;

use filetime::FileTime;
use thiserror::Error;
use tokio::fs;
use tracing::{error, info};

use crate::engine::{BaselineAction, FileAction, SyncOperation};
use crate::item::FileStamp;
use crate::job::SyncJob;

/// Baseline corruption detected while applying. Fatal to the whole batch.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("baseline already has an entry for key {0:?}")]
    DuplicateEntry(String),

    #[error("baseline has no entry for key {0:?}")]
    MissingEntry(String),
}

/// Outcome counts for one apply pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Operations whose file action completed (or needed none).
    pub applied: usize,
    /// Operations whose file action failed; their baseline action still ran.
    pub failed: usize,
}

/// Apply `ops` in list order against the job's roots and baseline.
pub async fn apply(job: &mut SyncJob, ops: &[SyncOperation]) -> Result<ApplyReport, IntegrityError> {
    let mut report = ApplyReport::default();

    for op in ops {
        let key = op.key();
        let file_a = job.file_a(key);
        let file_b = job.file_b(key);

        let outcome = match op.file_action {
            FileAction::None => Ok(()),
            FileAction::CopyToA => {
                info!("copy B -> A: {key}");
                copy_file(&file_b, &file_a).await
            }
            FileAction::CopyToB => {
                info!("copy A -> B: {key}");
                copy_file(&file_a, &file_b).await
            }
            FileAction::DeleteFromA => {
                info!("delete from A: {key}");
                fs::remove_file(&file_a).await
            }
            FileAction::DeleteFromB => {
                info!("delete from B: {key}");
                fs::remove_file(&file_b).await
            }
        };

        match outcome {
            Ok(()) => report.applied += 1,
            Err(err) => {
                error!("{} failed for {key}: {err}", op.file_action.label());
                report.failed += 1;
            }
        }

        apply_baseline_action(job, op)?;
    }

    Ok(report)
}

/// Copy preserving the source's modification time, so the synced pair
/// compares equal on the next pass instead of the copy looking like a newer
/// edit of the destination.
async fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    fs::copy(src, dst).await?;

    let meta = fs::metadata(src).await?;
    filetime::set_file_mtime(dst, FileTime::from_last_modification_time(&meta))?;
    Ok(())
}

fn apply_baseline_action(job: &mut SyncJob, op: &SyncOperation) -> Result<(), IntegrityError> {
    let key = op.key();
    let matches = job.status_lines.iter().filter(|line| line.key == key).count();

    match op.baseline_action {
        BaselineAction::None => {}
        BaselineAction::Add => {
            if matches != 0 {
                return Err(IntegrityError::DuplicateEntry(key.to_string()));
            }
            job.status_lines.push(FileStamp::new(key, op.item.last_modified()));
        }
        BaselineAction::Update => {
            if matches > 1 {
                return Err(IntegrityError::DuplicateEntry(key.to_string()));
            }
            let Some(line) = job.status_lines.iter_mut().find(|line| line.key == key) else {
                return Err(IntegrityError::MissingEntry(key.to_string()));
            };
            line.last_modified = op.item.last_modified();
        }
        BaselineAction::Remove => match matches {
            0 => return Err(IntegrityError::MissingEntry(key.to_string())),
            1 => job.status_lines.retain(|line| line.key != key),
            _ => return Err(IntegrityError::DuplicateEntry(key.to_string())),
        },
    }

    Ok(())
}
