//! dirsync-core: three-way reconciliation between two directory trees and a
//! persisted baseline.
//!
//! This crate provides the core functionality for:
//! - Observations of file state and the latest-wins comparator
//! - The reconciliation engine (batch and single-key entry points)
//! - The operation applier with per-operation failure isolation
//! - The persisted job descriptor and its advisory lock
//! - Recursive enumeration of a sync root

pub mod apply;
pub mod engine;
pub mod item;
pub mod job;
pub mod lock;
pub mod walk;

pub use apply::{apply, ApplyReport, IntegrityError};
pub use engine::{
    compute_change_set, decide_for_key, BaselineAction, EngineError, FileAction, SyncOperation,
};
pub use item::{latest_wins, FileStamp, Observed, Source};
pub use job::{JobError, SyncJob};
pub use lock::{JobLock, LockError};
pub use walk::enumerate;
