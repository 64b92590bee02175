//! Realtime monitoring of both sync roots.
//!
//! One native watcher per root pushes side-tagged changes into a bounded
//! channel; a single consumer task serializes the full handling of each
//! event (decide, apply, persist), so at most one mutation is ever in flight
//! across both roots. Delivery is best-effort: a dropped or garbled event is
//! recovered by the next full batch run, not by the monitor.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use dirsync_core::lock::lock_path;
use dirsync_core::{apply, decide_for_key, latest_wins, FileStamp, Observed, Source, SyncJob};

/// Which root an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

/// A change derived from one raw notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Created or modified; the key needs re-evaluation.
    Upsert(String),
    /// Removed; the key needs re-evaluation.
    Delete(String),
    /// Moved within the root; handled without the general decision logic.
    Rename { from: String, to: String },
}

/// Side-tagged change, as queued for the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootEvent {
    pub side: Side,
    pub change: Change,
}

/// Queue depth between the watcher callbacks and the single consumer.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Watches both roots of a job and keeps them converging.
pub struct Monitor {
    job: SyncJob,
    job_path: PathBuf,
    rx: mpsc::Receiver<RootEvent>,
    // Watchers stop when dropped; keep them for the monitor's lifetime.
    _watchers: [RecommendedWatcher; 2],
}

impl Monitor {
    /// Start watching both roots of `job`.
    pub fn watch(job: SyncJob, job_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let watcher_a = start_watcher(&job.path_a, Side::A, tx.clone())?;
        let watcher_b = start_watcher(&job.path_b, Side::B, tx)?;
        Ok(Self {
            job,
            job_path,
            rx,
            _watchers: [watcher_a, watcher_b],
        })
    }

    /// Drain events until cancelled.
    ///
    /// Integrity errors stop the monitor (the descriptor is corrupt); I/O
    /// and watcher faults are logged and watching continues.
    pub async fn run(mut self, token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = self.rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event).await?;
                }
            }
        }
        info!("realtime monitoring stopped");
        Ok(())
    }

    async fn handle(&mut self, event: RootEvent) -> Result<()> {
        debug!("event on side {:?}: {:?}", event.side, event.change);
        match event.change {
            Change::Upsert(key) | Change::Delete(key) => {
                reconcile_key(&mut self.job, &self.job_path, &key).await
            }
            Change::Rename { from, to } => {
                apply_rename(&mut self.job, &self.job_path, event.side, &from, &to).await;
                Ok(())
            }
        }
    }
}

fn start_watcher(root: &Path, side: Side, tx: mpsc::Sender<RootEvent>) -> Result<RecommendedWatcher> {
    // FSEvents reports canonical paths; /var vs /private/var on macOS.
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let callback_root = root.clone();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                for change in translate(&event, &callback_root) {
                    // Blocking send applies backpressure from the consumer; a
                    // closed channel means the monitor is shutting down.
                    if tx.blocking_send(RootEvent { side, change }).is_err() {
                        return;
                    }
                }
            }
            Err(err) => error!("watch error on side {:?}: {err}", side),
        }
    })
    .with_context(|| format!("creating watcher for {}", root.display()))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;
    info!("watching {} as side {:?}", root.display(), side);
    Ok(watcher)
}

/// Map one raw notification to zero or more key-level changes.
fn translate(event: &Event, root: &Path) -> Vec<Change> {
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(mode)) => translate_rename(event, root, mode),
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) | EventKind::Modify(_) => {
            keys(event, root).map(Change::Upsert).collect()
        }
        EventKind::Remove(_) => keys(event, root).map(Change::Delete).collect(),
        // Backends without precise kinds (e.g. polling) report Any.
        EventKind::Any => keys(event, root).map(|key| probe(root, key)).collect(),
        _ => Vec::new(),
    }
}

fn translate_rename(event: &Event, root: &Path, mode: &RenameMode) -> Vec<Change> {
    match mode {
        RenameMode::Both => {
            let mut pair = keys(event, root);
            match (pair.next(), pair.next()) {
                (Some(from), Some(to)) => vec![Change::Rename { from, to }],
                // A move across the root boundary leaves only one half.
                (Some(only), None) => vec![probe(root, only)],
                _ => Vec::new(),
            }
        }
        RenameMode::From => keys(event, root).map(Change::Delete).collect(),
        RenameMode::To => keys(event, root).map(Change::Upsert).collect(),
        // The platform gave us no pairing; fall back to existence probing.
        _ => keys(event, root).map(|key| probe(root, key)).collect(),
    }
}

fn probe(root: &Path, key: String) -> Change {
    if root.join(&key).exists() {
        Change::Upsert(key)
    } else {
        Change::Delete(key)
    }
}

fn keys<'a>(event: &'a Event, root: &'a Path) -> impl Iterator<Item = String> + 'a {
    event.paths.iter().filter_map(move |path| {
        path.strip_prefix(root)
            .ok()
            .map(|rel| rel.to_string_lossy().into_owned())
    })
}

/// Re-evaluate a single key with fresh observations from both roots,
/// then apply and persist. The same decision function as batch mode.
pub(crate) async fn reconcile_key(job: &mut SyncJob, job_path: &Path, key: &str) -> Result<()> {
    if is_bookkeeping(job, job_path, key) {
        return Ok(());
    }

    let item_a = observe(&job.path_a, key, Source::SideA).await;
    let item_b = observe(&job.path_b, key, Source::SideB).await;
    let status = job.find_status(key).map(|stamp| Observed {
        source: Source::Baseline,
        stamp: stamp.clone(),
    });

    let Some(op) = decide_for_key(item_a.as_ref(), item_b.as_ref(), status.as_ref(), &latest_wins)
    else {
        debug!("key {key:?}: no action needed");
        return Ok(());
    };
    debug!("key {key:?}: {}", op.reason);

    let ops = [op];
    apply(job, &ops)
        .await
        .context("baseline integrity failure, stopping realtime monitoring")?;
    job.save(job_path)
        .with_context(|| format!("persisting {}", job_path.display()))?;
    Ok(())
}

/// A rename moves the counterpart file to the new key on the other root and
/// re-keys the baseline entry in place. I/O failures are logged; the next
/// batch pass reconverges.
pub(crate) async fn apply_rename(
    job: &mut SyncJob,
    job_path: &Path,
    side: Side,
    from: &str,
    to: &str,
) {
    if is_bookkeeping(job, job_path, from) || is_bookkeeping(job, job_path, to) {
        return;
    }

    let other_root = match side {
        Side::A => job.path_b.clone(),
        Side::B => job.path_a.clone(),
    };
    let old_path = other_root.join(from);
    let new_path = other_root.join(to);

    info!("rename on side {:?}: {from:?} -> {to:?}", side);

    match fs::try_exists(&old_path).await {
        Ok(true) => {
            if let Some(parent) = new_path.parent() {
                if let Err(err) = fs::create_dir_all(parent).await {
                    error!("rename: creating {} failed: {err}", parent.display());
                    return;
                }
            }
            if let Err(err) = fs::rename(&old_path, &new_path).await {
                error!("rename: moving {} failed: {err}", old_path.display());
                return;
            }
        }
        // Already at the new name; this event is the echo of our own move.
        Ok(false) => debug!("rename: counterpart {} already moved", old_path.display()),
        Err(err) => {
            error!("rename: probing {} failed: {err}", old_path.display());
            return;
        }
    }

    let renamed = match side {
        Side::A => job.path_a.join(to),
        Side::B => job.path_b.join(to),
    };
    let last_modified = mtime_millis(&renamed).await.unwrap_or(0);

    job.status_lines.retain(|line| line.key != from);
    if let Some(line) = job.status_lines.iter_mut().find(|line| line.key == to) {
        line.last_modified = last_modified;
    } else {
        job.status_lines.push(FileStamp::new(to, last_modified));
    }

    if let Err(err) = job.save(job_path) {
        error!("rename: persisting {} failed: {err}", job_path.display());
    }
}

/// The job file, its lock, and the log directory may live inside a watched
/// root; events for them must never be synced.
fn is_bookkeeping(job: &SyncJob, job_path: &Path, key: &str) -> bool {
    let lock = lock_path(job_path);
    for root in [&job.path_a, &job.path_b] {
        let abs = root.join(key);
        if abs == *job_path || abs == lock {
            return true;
        }
        if let Some(dir) = job.log_path.as_deref() {
            if abs.starts_with(dir) {
                return true;
            }
        }
    }
    false
}

/// Fresh observation of `key` under `root`; absent if missing or not a file.
async fn observe(root: &Path, key: &str, source: Source) -> Option<Observed> {
    let meta = fs::metadata(root.join(key)).await.ok()?;
    if !meta.is_file() {
        return None;
    }
    let millis = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Some(Observed::new(source, key, millis))
}

async fn mtime_millis(path: &Path) -> Option<u64> {
    let meta = fs::metadata(path).await.ok()?;
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const T1: u64 = 1_700_000_000_000;
    const T2: u64 = 1_700_000_060_000;

    fn write_with_mtime(path: &Path, contents: &str, mtime_ms: u64) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
        let mtime = FileTime::from_unix_time(
            (mtime_ms / 1000) as i64,
            ((mtime_ms % 1000) * 1_000_000) as u32,
        );
        filetime::set_file_mtime(path, mtime).unwrap();
    }

    fn job_in(dir: &TempDir) -> (SyncJob, PathBuf) {
        let path_a = dir.path().join("a");
        let path_b = dir.path().join("b");
        std::fs::create_dir_all(&path_a).unwrap();
        std::fs::create_dir_all(&path_b).unwrap();
        (SyncJob::new(path_a, path_b), dir.path().join("job.json"))
    }

    // ==================== translate tests ====================

    #[test]
    fn create_maps_to_upsert() {
        let root = Path::new("/watched");
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(root.join("sub/new.txt"));

        assert_eq!(
            translate(&event, root),
            vec![Change::Upsert("sub/new.txt".to_string())]
        );
    }

    #[test]
    fn folder_create_is_ignored() {
        let root = Path::new("/watched");
        let event =
            Event::new(EventKind::Create(CreateKind::Folder)).add_path(root.join("sub"));

        assert!(translate(&event, root).is_empty());
    }

    #[test]
    fn remove_maps_to_delete() {
        let root = Path::new("/watched");
        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(root.join("old.txt"));

        assert_eq!(
            translate(&event, root),
            vec![Change::Delete("old.txt".to_string())]
        );
    }

    #[test]
    fn paired_rename_maps_to_rename() {
        let root = Path::new("/watched");
        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(root.join("old.txt"))
            .add_path(root.join("new.txt"));

        assert_eq!(
            translate(&event, root),
            vec![Change::Rename {
                from: "old.txt".to_string(),
                to: "new.txt".to_string(),
            }]
        );
    }

    #[test]
    fn rename_fragments_degrade_to_delete_and_upsert() {
        let root = Path::new("/watched");

        let from = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
            .add_path(root.join("old.txt"));
        assert_eq!(
            translate(&from, root),
            vec![Change::Delete("old.txt".to_string())]
        );

        let to = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::To)))
            .add_path(root.join("new.txt"));
        assert_eq!(
            translate(&to, root),
            vec![Change::Upsert("new.txt".to_string())]
        );
    }

    #[test]
    fn paths_outside_the_root_are_dropped() {
        let root = Path::new("/watched");
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/elsewhere/new.txt"));

        assert!(translate(&event, root).is_empty());
    }

    // ==================== handler tests ====================

    #[tokio::test]
    async fn upsert_copies_new_file_to_the_other_side() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        write_with_mtime(&job.file_a("x.txt"), "hello", T1);

        reconcile_key(&mut job, &job_path, "x.txt").await.unwrap();

        assert_eq!(std::fs::read_to_string(job.file_b("x.txt")).unwrap(), "hello");
        assert_eq!(job.find_status("x.txt").unwrap().last_modified, T1);
        // Every event handling ends with a persist.
        assert!(job_path.exists());
    }

    #[tokio::test]
    async fn delete_propagates_to_the_other_side() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        write_with_mtime(&job.file_b("x.txt"), "hello", T1);
        job.status_lines.push(FileStamp::new("x.txt", T1));

        // The file vanished from A; B still has it and it is tracked.
        reconcile_key(&mut job, &job_path, "x.txt").await.unwrap();

        assert!(!job.file_b("x.txt").exists());
        assert!(job.find_status("x.txt").is_none());
    }

    #[tokio::test]
    async fn echo_of_a_completed_sync_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        write_with_mtime(&job.file_a("x.txt"), "same", T1);
        write_with_mtime(&job.file_b("x.txt"), "same", T1);
        job.status_lines.push(FileStamp::new("x.txt", T1));

        reconcile_key(&mut job, &job_path, "x.txt").await.unwrap();

        assert_eq!(job.status_lines.len(), 1);
        // Nothing was decided, so nothing was persisted.
        assert!(!job_path.exists());
    }

    #[tokio::test]
    async fn newer_event_side_overwrites_counterpart() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        write_with_mtime(&job.file_a("x.txt"), "old", T1);
        write_with_mtime(&job.file_b("x.txt"), "new", T2);
        job.status_lines.push(FileStamp::new("x.txt", T1));

        reconcile_key(&mut job, &job_path, "x.txt").await.unwrap();

        assert_eq!(std::fs::read_to_string(job.file_a("x.txt")).unwrap(), "new");
        assert_eq!(job.find_status("x.txt").unwrap().last_modified, T2);
    }

    #[tokio::test]
    async fn rename_moves_counterpart_and_rekeys_baseline() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        write_with_mtime(&job.file_a("new.txt"), "data", T1);
        write_with_mtime(&job.file_b("old.txt"), "data", T1);
        job.status_lines.push(FileStamp::new("old.txt", T1));

        apply_rename(&mut job, &job_path, Side::A, "old.txt", "new.txt").await;

        assert!(!job.file_b("old.txt").exists());
        assert_eq!(std::fs::read_to_string(job.file_b("new.txt")).unwrap(), "data");
        assert!(job.find_status("old.txt").is_none());
        assert_eq!(job.find_status("new.txt").unwrap().last_modified, T1);
    }

    #[tokio::test]
    async fn rename_echo_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let (mut job, job_path) = job_in(&dir);
        // Both sides already hold the new name.
        write_with_mtime(&job.file_a("new.txt"), "data", T1);
        write_with_mtime(&job.file_b("new.txt"), "data", T1);
        job.status_lines.push(FileStamp::new("new.txt", T1));

        apply_rename(&mut job, &job_path, Side::B, "old.txt", "new.txt").await;

        assert_eq!(job.status_lines.len(), 1);
        assert_eq!(job.find_status("new.txt").unwrap().last_modified, T1);
    }

    #[tokio::test]
    async fn job_file_inside_a_root_is_never_synced() {
        let dir = TempDir::new().unwrap();
        let path_a = dir.path().join("a");
        let path_b = dir.path().join("b");
        std::fs::create_dir_all(&path_a).unwrap();
        std::fs::create_dir_all(&path_b).unwrap();
        let mut job = SyncJob::new(path_a.clone(), path_b);
        let job_path = path_a.join("job.json");
        write_with_mtime(&job_path, "{}", T1);

        reconcile_key(&mut job, &job_path, "job.json").await.unwrap();

        assert!(!job.file_b("job.json").exists());
        assert!(job.status_lines.is_empty());
    }
}
