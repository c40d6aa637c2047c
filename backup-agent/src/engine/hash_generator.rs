//! Ensures every non-failed, content-identity-needing record carries a
//! SHA-256 of the file's current bytes (§4.5).

use crate::engine::record::{EntryRecord, EntryStatus};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn spawn(
    mut rx: mpsc::Receiver<EntryRecord>,
    source_root: PathBuf,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let (tx, out_rx) = mpsc::channel(channel_capacity);

    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return,
                record = rx.recv() => record,
            };
            let Some(mut record) = record else { return };

            if !record.is_failed()
                && (record.status == EntryStatus::New
                    || record.status == EntryStatus::Modified
                    || record.hash.is_empty())
            {
                let fpath = source_root.join(&record.rel_path);
                match hash_file(&fpath).await {
                    Ok(hash) => record.hash = hash,
                    Err(e) => record.fail(format!("failed to hash {}: {e}", fpath.display())),
                }
            }

            if tx.send(record).await.is_err() {
                return;
            }
        }
    });

    out_rx
}

async fn hash_file(path: &std::path::Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
