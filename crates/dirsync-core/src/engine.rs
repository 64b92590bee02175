//! Three-way reconciliation between side A, side B, and the baseline.
//!
//! [`decide_for_key`] is the single authority for what happens to one key:
//! the batch runner and the realtime monitor both route every key through it,
//! so iteration order can never change an outcome. [`compute_change_set`]
//! fans the batch snapshots out over it, producing exactly one operation per
//! key in the union of the three sets.

use std::collections::{HashMap, HashSet};

use thiserror::Error;
use tracing::debug;

use crate::item::{Observed, Source};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("duplicate key {key:?} in {source} snapshot")]
    DuplicateKey { source: Source, key: String },
}

/// File-level half of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    None,
    CopyToA,
    CopyToB,
    DeleteFromA,
    DeleteFromB,
}

impl FileAction {
    pub fn label(self) -> &'static str {
        match self {
            FileAction::None => "no file action",
            FileAction::CopyToA => "copy B -> A",
            FileAction::CopyToB => "copy A -> B",
            FileAction::DeleteFromA => "delete from A",
            FileAction::DeleteFromB => "delete from B",
        }
    }
}

/// Baseline-level half of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineAction {
    None,
    Add,
    Update,
    Remove,
}

impl BaselineAction {
    pub fn label(self) -> &'static str {
        match self {
            BaselineAction::None => "",
            BaselineAction::Add => "add to baseline",
            BaselineAction::Update => "update baseline",
            BaselineAction::Remove => "remove from baseline",
        }
    }
}

/// The engine's verdict for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOperation {
    /// The observation whose content is canonical once this operation ran.
    pub item: Observed,
    /// Human-readable explanation, shown in the confirmation listing.
    pub reason: &'static str,
    pub file_action: FileAction,
    pub baseline_action: BaselineAction,
}

impl SyncOperation {
    pub fn key(&self) -> &str {
        self.item.key()
    }

    pub fn is_noop(&self) -> bool {
        self.file_action == FileAction::None && self.baseline_action == BaselineAction::None
    }
}

/// Decide what to do for one key, given up to one observation from each of
/// the three sources. Pure: no I/O, no mutation, deterministic in its inputs.
///
/// `compare` picks whichever of two observations is fresher, or `None` for a
/// tie. Direction always comes from the winner's source tag; the engine never
/// derives it from which argument the winner happened to be.
pub fn decide_for_key<'a, C>(
    item_a: Option<&'a Observed>,
    item_b: Option<&'a Observed>,
    item_status: Option<&'a Observed>,
    compare: &C,
) -> Option<SyncOperation>
where
    C: Fn(&'a Observed, &'a Observed) -> Option<&'a Observed>,
{
    match (item_a, item_b, item_status) {
        (None, None, None) => None,

        (Some(a), None, None) => Some(operation(
            a,
            "new file on side A",
            FileAction::CopyToB,
            BaselineAction::Add,
        )),
        (None, Some(b), None) => Some(operation(
            b,
            "new file on side B",
            FileAction::CopyToA,
            BaselineAction::Add,
        )),

        (Some(a), None, Some(_)) => Some(operation(
            a,
            "deleted on side B",
            FileAction::DeleteFromA,
            BaselineAction::Remove,
        )),
        (None, Some(b), Some(_)) => Some(operation(
            b,
            "deleted on side A",
            FileAction::DeleteFromB,
            BaselineAction::Remove,
        )),

        (None, None, Some(status)) => Some(operation(
            status,
            "deleted on both sides",
            FileAction::None,
            BaselineAction::Remove,
        )),

        // Independently created on both sides, never synced.
        (Some(a), Some(b), None) => match compare(a, b) {
            None => Some(operation(
                a,
                "identical new files on both sides",
                FileAction::None,
                BaselineAction::Add,
            )),
            Some(winner) => Some(operation(
                winner,
                "conflicting new files, newer side wins",
                copy_toward_loser(winner),
                BaselineAction::Add,
            )),
        },

        // Tracked file present on both sides.
        (Some(a), Some(b), Some(status)) => match compare(a, b) {
            Some(winner) => {
                let reason = match winner.source {
                    Source::SideA => "updated on side A",
                    _ => "updated on side B",
                };
                Some(operation(
                    winner,
                    reason,
                    copy_toward_loser(winner),
                    BaselineAction::Update,
                ))
            }
            // Sides agree with each other; A stands in for the tied pair.
            None => match compare(a, status) {
                Some(_) => Some(operation(
                    a,
                    "identical updates on both sides",
                    FileAction::None,
                    BaselineAction::Update,
                )),
                None => None,
            },
        },
    }
}

/// Compute one operation per key in the union of the three snapshots.
///
/// Keys are consumed from side A first, then side B, then the baseline,
/// skipping any key already resolved. The order is immaterial for outcomes:
/// every key goes through [`decide_for_key`] with the same three lookups.
pub fn compute_change_set<'a, C>(
    set_a: &'a [Observed],
    set_b: &'a [Observed],
    baseline: &'a [Observed],
    compare: &C,
) -> Result<Vec<SyncOperation>, EngineError>
where
    C: Fn(&'a Observed, &'a Observed) -> Option<&'a Observed>,
{
    let by_a = index_by_key(set_a, Source::SideA)?;
    let by_b = index_by_key(set_b, Source::SideB)?;
    let by_status = index_by_key(baseline, Source::Baseline)?;

    let mut resolved: HashSet<&str> = HashSet::new();
    let mut ops = Vec::new();

    for item in set_a.iter().chain(set_b).chain(baseline) {
        let key = item.key();
        if !resolved.insert(key) {
            continue;
        }

        let decision = decide_for_key(
            by_a.get(key).copied(),
            by_b.get(key).copied(),
            by_status.get(key).copied(),
            compare,
        );
        match decision {
            Some(op) => {
                debug!(
                    key,
                    reason = op.reason,
                    file_action = op.file_action.label(),
                    baseline_action = op.baseline_action.label(),
                    "decided"
                );
                ops.push(op);
            }
            None => debug!(key, "no action needed"),
        }
    }

    Ok(ops)
}

fn copy_toward_loser(winner: &Observed) -> FileAction {
    match winner.source {
        Source::SideA => FileAction::CopyToB,
        Source::SideB => FileAction::CopyToA,
        Source::Baseline => FileAction::None,
    }
}

fn operation(
    item: &Observed,
    reason: &'static str,
    file_action: FileAction,
    baseline_action: BaselineAction,
) -> SyncOperation {
    SyncOperation {
        item: item.clone(),
        reason,
        file_action,
        baseline_action,
    }
}

fn index_by_key<'a>(
    set: &'a [Observed],
    source: Source,
) -> Result<HashMap<&'a str, &'a Observed>, EngineError> {
    let mut map = HashMap::with_capacity(set.len());
    for item in set {
        if map.insert(item.key(), item).is_some() {
            return Err(EngineError::DuplicateKey {
                source,
                key: item.key().to_string(),
            });
        }
    }
    Ok(map)
}
