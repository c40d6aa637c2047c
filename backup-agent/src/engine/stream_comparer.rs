//! The ordered merge-diff between the live filesystem stream and the prior
//! manifest stream — the single most load-bearing module in the system
//! (§4.4). Both inputs must already be in the same raw-byte-sorted
//! `rel_path` order; the FS Scanner guarantees this by sorting directory
//! entries explicitly, and the Manifest Scanner is oblivious because it
//! just replays whatever order a prior run wrote.

use crate::engine::record::{EntryRecord, EntryStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn spawn(
    mut in_fs: mpsc::Receiver<EntryRecord>,
    mut in_manifest: mpsc::Receiver<EntryRecord>,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let (tx, out_rx) = mpsc::channel(channel_capacity);

    tokio::spawn(async move {
        let mut head_fs: Option<EntryRecord> = None;
        let mut head_manifest: Option<EntryRecord> = None;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            if head_fs.is_none() {
                match in_fs.recv().await {
                    Some(record) if record.is_failed() => {
                        if tx.send(record).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Some(record) => head_fs = Some(record),
                    None => {}
                }
            }

            if head_manifest.is_none() {
                match in_manifest.recv().await {
                    Some(record) if record.is_failed() => {
                        if tx.send(record).await.is_err() {
                            return;
                        }
                        continue;
                    }
                    Some(record) => head_manifest = Some(record),
                    None => {}
                }
            }

            match (head_fs.take(), head_manifest.take()) {
                (None, None) => return,
                (Some(mut fs), None) => {
                    fs.status = EntryStatus::New;
                    if tx.send(fs).await.is_err() {
                        return;
                    }
                }
                (None, Some(mut manifest)) => {
                    manifest.status = EntryStatus::NotFound;
                    if tx.send(manifest).await.is_err() {
                        return;
                    }
                }
                (Some(mut fs), Some(manifest)) => {
                    use std::cmp::Ordering;
                    match fs.rel_path.as_bytes().cmp(manifest.rel_path.as_bytes()) {
                        Ordering::Less => {
                            fs.status = EntryStatus::New;
                            head_manifest = Some(manifest);
                            if tx.send(fs).await.is_err() {
                                return;
                            }
                        }
                        Ordering::Greater => {
                            let mut manifest = manifest;
                            manifest.status = EntryStatus::NotFound;
                            head_fs = Some(fs);
                            if tx.send(manifest).await.is_err() {
                                return;
                            }
                        }
                        Ordering::Equal => {
                            fs.status = EntryStatus::Ok;
                            fs.hash = manifest.hash.clone();
                            if fs.raw_size != manifest.raw_size || fs.mod_time != manifest.mod_time
                            {
                                fs.status = EntryStatus::Modified;
                            }
                            if tx.send(fs).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    });

    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::EntryRecord;

    fn mani(path: &str, size: u64, mtime: i64, hash: &str) -> EntryRecord {
        let mut r = EntryRecord::from_scan(path.into(), size, mtime, 0o644);
        r.status = EntryStatus::Ok;
        r.hash = hash.into();
        r
    }

    async fn run(fs: Vec<EntryRecord>, manifest: Vec<EntryRecord>) -> Vec<EntryRecord> {
        let (fs_tx, fs_rx) = mpsc::channel(10);
        let (m_tx, m_rx) = mpsc::channel(10);
        for r in fs {
            fs_tx.send(r).await.unwrap();
        }
        drop(fs_tx);
        for r in manifest {
            m_tx.send(r).await.unwrap();
        }
        drop(m_tx);

        let mut out = spawn(fs_rx, m_rx, 10, CancellationToken::new());
        let mut records = Vec::new();
        while let Some(r) = out.recv().await {
            records.push(r);
        }
        records
    }

    #[tokio::test]
    async fn unchanged_file_is_ok() {
        let fs = vec![EntryRecord::from_scan("a.txt".into(), 5, 100, 0o644)];
        let manifest = vec![mani("a.txt", 5, 100, "hash1")];
        let out = run(fs, manifest).await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].status, EntryStatus::Ok);
        assert_eq!(out[0].hash, "hash1");
    }

    #[tokio::test]
    async fn changed_mtime_is_modified() {
        let fs = vec![EntryRecord::from_scan("a.txt".into(), 5, 200, 0o644)];
        let manifest = vec![mani("a.txt", 5, 100, "hash1")];
        let out = run(fs, manifest).await;
        assert_eq!(out[0].status, EntryStatus::Modified);
    }

    #[tokio::test]
    async fn new_file_sorts_before_manifest_entry() {
        let fs = vec![
            EntryRecord::from_scan("a.txt".into(), 1, 1, 0o644),
            EntryRecord::from_scan("b.txt".into(), 1, 1, 0o644),
        ];
        let manifest = vec![mani("b.txt", 1, 1, "h")];
        let out = run(fs, manifest).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rel_path, "a.txt");
        assert_eq!(out[0].status, EntryStatus::New);
        assert_eq!(out[1].rel_path, "b.txt");
        assert_eq!(out[1].status, EntryStatus::Ok);
    }

    #[tokio::test]
    async fn deleted_file_is_not_found() {
        let fs = vec![EntryRecord::from_scan("b.txt".into(), 1, 1, 0o644)];
        let manifest = vec![mani("a.txt", 1, 1, "h"), mani("b.txt", 1, 1, "h2")];
        let out = run(fs, manifest).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].rel_path, "a.txt");
        assert_eq!(out[0].status, EntryStatus::NotFound);
        assert_eq!(out[1].rel_path, "b.txt");
        assert_eq!(out[1].status, EntryStatus::Ok);
    }
}
