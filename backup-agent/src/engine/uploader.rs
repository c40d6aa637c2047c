//! Content-addressed, deduplicated upload with optional compression and
//! encryption (§4.6). The existence probe before upload is the
//! deduplication point: two files sharing a hash upload once.

use crate::engine::record::{EntryAction, EntryRecord, EntryStatus};
use crate::store::{ObjectStore, UploadOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub fn blob_key(hash: &str) -> String {
    format!("data/{}/{}", &hash[..4.min(hash.len())], hash)
}

pub fn spawn(
    mut rx: mpsc::Receiver<EntryRecord>,
    store: Arc<dyn ObjectStore>,
    source_root: PathBuf,
    opts: UploadOptions,
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
                && (record.status == EntryStatus::New || record.status == EntryStatus::Modified)
            {
                process(&mut record, &store, &source_root, opts).await;
            }

            if tx.send(record).await.is_err() {
                return;
            }
        }
    });

    out_rx
}

async fn process(
    record: &mut EntryRecord,
    store: &Arc<dyn ObjectStore>,
    source_root: &std::path::Path,
    opts: UploadOptions,
) {
    let key = blob_key(&record.hash);

    match store.exists(&key).await {
        Ok(true) => {
            record.action = EntryAction::NoAction;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            record.fail(format!("failed to probe {key}: {e}"));
            return;
        }
    }

    let fpath = source_root.join(&record.rel_path);
    let file = match std::fs::File::open(&fpath) {
        Ok(f) => f,
        Err(e) => {
            record.fail(format!("failed to open {}: {e}", fpath.display()));
            return;
        }
    };

    match store.upload(&key, Box::new(file), opts).await {
        Ok(bytes_written) => {
            record.action = EntryAction::Uploaded;
            record.uploaded_size = bytes_written;
        }
        Err(e) => {
            record.fail(format!("failed to upload {}: {e}", record.rel_path));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::EntryRecord;
    use crate::store::tests_support::FakeStore;
    use tempfile::TempDir;

    #[tokio::test]
    async fn uploads_new_record_and_probes_for_dedup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut record = EntryRecord::from_scan("a.txt".into(), 5, 1, 0o644);
        record.hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".into();

        let (tx, rx) = mpsc::channel(10);
        tx.send(record).await.unwrap();
        drop(tx);

        let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::new());
        let mut out_rx = spawn(
            rx,
            store.clone(),
            dir.path().to_path_buf(),
            UploadOptions::default(),
            10,
            CancellationToken::new(),
        );
        let out = out_rx.recv().await.unwrap();
        assert_eq!(out.action, EntryAction::Uploaded);
        assert_eq!(out.uploaded_size, 5);
    }

    #[tokio::test]
    async fn existing_blob_is_deduplicated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello").unwrap();

        let hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::new());

        let mut a = EntryRecord::from_scan("a.txt".into(), 5, 1, 0o644);
        a.hash = hash.into();
        let mut b = EntryRecord::from_scan("b.txt".into(), 5, 1, 0o644);
        b.hash = hash.into();

        let (tx, rx) = mpsc::channel(10);
        tx.send(a).await.unwrap();
        tx.send(b).await.unwrap();
        drop(tx);

        let mut out_rx = spawn(
            rx,
            store,
            dir.path().to_path_buf(),
            UploadOptions::default(),
            10,
            CancellationToken::new(),
        );
        let first = out_rx.recv().await.unwrap();
        let second = out_rx.recv().await.unwrap();
        assert_eq!(first.action, EntryAction::Uploaded);
        assert_eq!(second.action, EntryAction::NoAction);
    }

    #[test]
    fn blob_key_shards_by_hash_prefix() {
        let hash = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
        assert_eq!(
            blob_key(hash),
            "data/2cf2/2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
