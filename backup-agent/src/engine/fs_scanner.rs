//! Walks a source tree and emits one [`EntryRecord`] per regular file under
//! the job's directory-filter policy, in the canonical bytewise-sorted
//! traversal order that the Stream Comparer depends on.
//!
//! Only one task runs this scan; it recurses through the tree itself rather
//! than spawning a task per directory; back-pressure comes from the bounded
//! output channel.

use crate::engine::record::EntryRecord;
use crate::job::DirFilterPolicy;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Spawns the scan and returns the receiving end of its output channel.
pub fn spawn(
    source_root: PathBuf,
    policy: DirFilterPolicy,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let (tx, rx) = mpsc::channel(channel_capacity);
    tokio::spawn(async move {
        scan_dir(&source_root, &source_root, 0, &policy, &tx, &cancel).await;
    });
    rx
}

/// Checks whether `dir` contains a regular file (not a directory of the same
/// name) matching one of `policy.skip_dir_items` — the "do not back up this
/// subtree" sentinel.
async fn has_skip_sentinel(dir: &Path, policy: &DirFilterPolicy) -> bool {
    for sentinel in &policy.skip_dir_items {
        if let Ok(meta) = tokio::fs::metadata(dir.join(sentinel)).await {
            if meta.is_file() {
                return true;
            }
        }
    }
    false
}

fn should_descend(name: &str, depth: usize, policy: &DirFilterPolicy) -> bool {
    let mut skip = false;

    if depth == 0 {
        if !policy.include_top_dirs.is_empty() {
            skip = !policy.include_top_dirs.contains(name);
        }
        if policy.exclude_top_dirs.contains(name) {
            skip = true;
        }
    }

    if !skip && policy.skip_dirs.contains(name) {
        skip = true;
    }

    !skip
}

fn scan_dir<'a>(
    dir: &'a Path,
    root: &'a Path,
    depth: usize,
    policy: &'a DirFilterPolicy,
    tx: &'a mpsc::Sender<EntryRecord>,
    cancel: &'a CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
    Box::pin(async move {
        if cancel.is_cancelled() {
            return;
        }

        if has_skip_sentinel(dir, policy).await {
            return;
        }

        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(rd) => rd,
            Err(_) => return,
        };

        let mut entries: Vec<(String, tokio::fs::FileType)> = Vec::new();
        loop {
            match read_dir.next_entry().await {
                Ok(Some(entry)) => {
                    let Ok(file_type) = entry.file_type().await else {
                        continue;
                    };
                    let Ok(name) = entry.file_name().into_string() else {
                        continue;
                    };
                    entries.push((name, file_type));
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }

        entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

        for (name, file_type) in entries {
            if cancel.is_cancelled() {
                return;
            }

            let path = dir.join(&name);

            if file_type.is_file() {
                if let Some(record) = build_record(&path, root).await {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        result = tx.send(record) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }
            } else if file_type.is_dir() {
                if should_descend(&name, depth, policy) {
                    scan_dir(&path, root, depth + 1, policy, tx, cancel).await;
                }
            }
            // symlinks and other non-regular types are ignored
        }
    })
}

async fn build_record(path: &Path, root: &Path) -> Option<EntryRecord> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let rel_path = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");

    let mod_time = meta
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;

    #[cfg(unix)]
    let mode = {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o777
    };
    #[cfg(not(unix))]
    let mode = 0o644;

    Some(EntryRecord::from_scan(rel_path, meta.len(), mod_time, mode))
}
