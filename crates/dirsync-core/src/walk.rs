//! Recursive enumeration of the files under a sync root.

use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use tokio::fs;

use crate::item::{Observed, Source};

/// List every regular file under `root`, keyed by its root-relative path.
///
/// Directories are recursed; symlinks are not followed, so a linked file or
/// tree never appears in the snapshot.
pub async fn enumerate(root: &Path, source: Source) -> io::Result<Vec<Observed>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else if file_type.is_file() {
                let path = entry.path();
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                let meta = entry.metadata().await?;
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                found.push(Observed::new(source, rel.to_string_lossy(), mtime));
            }
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use std::collections::HashMap;
    use tempfile::TempDir;

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

    #[tokio::test]
    async fn finds_nested_files_with_relative_keys() {
        let dir = TempDir::new().unwrap();
        write_with_mtime(&dir.path().join("top.txt"), "1", 1_000);
        write_with_mtime(&dir.path().join("sub/inner.txt"), "2", 2_000);
        write_with_mtime(&dir.path().join("sub/deeper/leaf.txt"), "3", 3_000);

        let items = enumerate(dir.path(), Source::SideA).await.unwrap();

        let by_key: HashMap<&str, u64> = items
            .iter()
            .map(|item| (item.key(), item.last_modified()))
            .collect();
        assert_eq!(by_key.len(), 3);
        assert_eq!(by_key["top.txt"], 1_000);
        assert_eq!(by_key["sub/inner.txt"], 2_000);
        assert_eq!(by_key["sub/deeper/leaf.txt"], 3_000);
        assert!(items.iter().all(|item| item.source == Source::SideA));
    }

    #[tokio::test]
    async fn empty_root_yields_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("only/dirs/here")).unwrap();

        let items = enumerate(dir.path(), Source::SideB).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("nope");

        assert!(enumerate(&gone, Source::SideA).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_not_followed() {
        let dir = TempDir::new().unwrap();
        write_with_mtime(&dir.path().join("real.txt"), "x", 1_000);
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let items = enumerate(dir.path(), Source::SideA).await.unwrap();

        let keys: Vec<&str> = items.iter().map(|item| item.key()).collect();
        assert_eq!(keys, vec!["real.txt"]);
    }
}
