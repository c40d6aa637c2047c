//! The snapshot engine: a pipeline of streaming stages that diffs a source
//! directory against its prior manifest and uploads new or changed content
//! (§4, §5).

pub mod extension_filter;
pub mod fs_scanner;
pub mod hash_generator;
pub mod manifest_scanner;
pub mod manifest_writer;
pub mod record;
pub mod stream_comparer;
pub mod uploader;

use crate::job::{DirFilterPolicy, Job};
use crate::store::{ObjectStore, UploadOptions};
use crate::utils::errors::Result;
use record::{EntryAction, EntryRecord, EntryStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-status, per-action tallies plus total bytes transmitted, gathered by
/// draining the tail of the pipeline. Mirrors the original tool's printed
/// backup summary field for field.
#[derive(Debug, Default, Clone)]
pub struct BackupSummary {
    pub total: u64,
    pub count_ok: u64,
    pub count_new: u64,
    pub count_modified: u64,
    pub count_not_found: u64,
    pub count_no_action: u64,
    pub count_uploaded: u64,
    pub count_failed: u64,
    pub bytes_uploaded: u64,
}

/// One terminal record surfaced to the caller for progress reporting.
/// Cloning `EntryRecord` per record is cheap at this throughput and keeps
/// the driver decoupled from how a CLI chooses to print progress.
pub type ProgressSink = Box<dyn FnMut(&EntryRecord) + Send>;

/// Runs the full backup pipeline for one `(job, source)` pair against an
/// already-downloaded prior manifest (or `None` on a source's first run),
/// and returns the tallied summary plus the bytes of the manifest to write
/// back, ready for [`crate::manifest::upload`].
///
/// `cancel` is shared with every stage; cancelling it (e.g. from a Ctrl-C
/// handler) stops the pipeline between records rather than mid-write, so
/// the returned manifest only reflects entries that were fully processed.
pub async fn run_backup(
    store: Arc<dyn ObjectStore>,
    job: &Job,
    source_root: PathBuf,
    prior_manifest: Option<Vec<u8>>,
    compress: bool,
    channel_capacity: usize,
    cancel: CancellationToken,
    mut on_record: ProgressSink,
) -> Result<(BackupSummary, Vec<u8>)> {
    let policy = DirFilterPolicy::from(job);

    let mut rx = fs_scanner::spawn(source_root.clone(), policy, channel_capacity, cancel.clone());

    if !job.include_extensions.is_empty() {
        rx = extension_filter::spawn(
            rx,
            job.include_extensions.clone(),
            true,
            channel_capacity,
            cancel.clone(),
        );
    }
    if !job.exclude_extensions.is_empty() {
        rx = extension_filter::spawn(
            rx,
            job.exclude_extensions.clone(),
            false,
            channel_capacity,
            cancel.clone(),
        );
    }

    if let Some(manifest_bytes) = prior_manifest {
        let manifest_rx = manifest_scanner::spawn(
            std::io::Cursor::new(manifest_bytes),
            channel_capacity,
            cancel.clone(),
        );
        rx = stream_comparer::spawn(rx, manifest_rx, channel_capacity, cancel.clone());
    }

    let rx = hash_generator::spawn(rx, source_root.clone(), channel_capacity, cancel.clone());

    let upload_opts = UploadOptions {
        compress,
        encrypt_mode: crate::store::EncryptMode::Recipients,
    };
    let rx = uploader::spawn(
        rx,
        store,
        source_root,
        upload_opts,
        channel_capacity,
        cancel.clone(),
    );

    let manifest_buf: Vec<u8> = Vec::new();
    let mut rx = manifest_writer::spawn(rx, manifest_buf, channel_capacity, cancel.clone());

    let mut summary = BackupSummary::default();
    let mut records = Vec::new();

    while let Some(record) = rx.recv().await {
        tally(&mut summary, &record);
        on_record(&record);
        records.push(record);
    }

    // re-render the manifest independently of the writer's internal buffer,
    // since that buffer was moved into the spawn_blocking task and isn't
    // reachable after the channel closes.
    let manifest_bytes = render_manifest(&records);

    Ok((summary, manifest_bytes))
}

fn tally(summary: &mut BackupSummary, record: &EntryRecord) {
    summary.total += 1;

    match record.status {
        EntryStatus::Ok => summary.count_ok += 1,
        EntryStatus::New => summary.count_new += 1,
        EntryStatus::Modified => summary.count_modified += 1,
        EntryStatus::NotFound => summary.count_not_found += 1,
    }

    match record.action {
        EntryAction::NoAction => summary.count_no_action += 1,
        EntryAction::Uploaded => {
            summary.count_uploaded += 1;
            summary.bytes_uploaded += record.uploaded_size;
        }
        EntryAction::Failed => summary.count_failed += 1,
    }
}

/// Rebuilds the manifest text from the final tallied records. Used instead
/// of reading back the writer stage's internal buffer, which is consumed
/// by the time the channel drains.
fn render_manifest(records: &[EntryRecord]) -> Vec<u8> {
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
    use std::fmt::Write as _;

    let mut out = String::new();
    for record in records {
        if record.status == EntryStatus::NotFound {
            continue;
        }
        let mod_time = if record.action == EntryAction::Failed {
            0
        } else {
            record.mod_time
        };
        let path = utf8_percent_encode(&record.rel_path, NON_ALPHANUMERIC);
        let _ = writeln!(
            out,
            "{},{},0{:o},{},{}",
            record.raw_size,
            mod_time,
            record.mode & 0o777,
            record.hash,
            path,
        );
    }
    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, Source};
    use crate::store::tests_support::FakeStore;

    #[tokio::test]
    async fn first_run_uploads_everything_and_builds_a_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"world!").unwrap();

        let job = Job {
            name: "test".into(),
            sources: vec![Source {
                path: dir.path().to_string_lossy().into_owned(),
                label: "full".into(),
            }],
            ..Default::default()
        };

        let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::new());
        let (summary, manifest) = run_backup(
            store,
            &job,
            dir.path().to_path_buf(),
            None,
            false,
            10,
            CancellationToken::new(),
            Box::new(|_| {}),
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.count_new, 2);
        assert_eq!(summary.count_uploaded, 2);
        assert_eq!(summary.count_failed, 0);

        let manifest_text = String::from_utf8(manifest).unwrap();
        assert_eq!(manifest_text.lines().count(), 2);
    }

    #[tokio::test]
    async fn second_run_against_own_manifest_reports_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let job = Job {
            name: "test".into(),
            sources: vec![Source {
                path: dir.path().to_string_lossy().into_owned(),
                label: "full".into(),
            }],
            ..Default::default()
        };

        let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::new());
        let (_, manifest) = run_backup(
            store.clone(),
            &job,
            dir.path().to_path_buf(),
            None,
            false,
            10,
            CancellationToken::new(),
            Box::new(|_| {}),
        )
        .await
        .unwrap();

        let (summary, _) = run_backup(
            store,
            &job,
            dir.path().to_path_buf(),
            Some(manifest),
            false,
            10,
            CancellationToken::new(),
            Box::new(|_| {}),
        )
        .await
        .unwrap();

        assert_eq!(summary.total, 1);
        assert_eq!(summary.count_ok, 1);
        assert_eq!(summary.count_no_action, 1);
        assert_eq!(summary.count_uploaded, 0);
    }

    fn parse_manifest_lines(bytes: &[u8]) -> Vec<(String, u64, i64, String)> {
        String::from_utf8_lossy(bytes)
            .lines()
            .filter_map(|line| {
                let tokens: Vec<&str> = line.splitn(5, ',').collect();
                if tokens.len() != 5 {
                    return None;
                }
                Some((
                    tokens[4].to_string(),
                    tokens[0].parse().ok()?,
                    tokens[1].parse().ok()?,
                    tokens[3].to_string(),
                ))
            })
            .collect()
    }

    proptest::proptest! {
        /// Ordering alignment + self-consistency (§8.1.2, §8.3): for a random
        /// file set, backing up twice in a row with no filesystem mutation
        /// between runs must leave every record in the second manifest
        /// byte-identical (by rel_path, raw_size, mod_time, hash) to the
        /// corresponding line in the first manifest, since nothing changed.
        #[test]
        fn repeat_backup_preserves_manifest_entries(
            names in proptest::collection::hash_set("[a-z][a-z0-9]{0,8}\\.dat", 1..8),
            seed in proptest::prelude::any::<u8>(),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (first, second) = rt.block_on(async {
                let dir = tempfile::TempDir::new().unwrap();
                for (i, name) in names.iter().enumerate() {
                    let content = vec![seed.wrapping_add(i as u8); (i % 5) + 1];
                    std::fs::write(dir.path().join(name), &content).unwrap();
                }

                let job = Job {
                    name: "proptest".into(),
                    sources: vec![Source {
                        path: dir.path().to_string_lossy().into_owned(),
                        label: "full".into(),
                    }],
                    ..Default::default()
                };

                let store: Arc<dyn ObjectStore> = Arc::new(FakeStore::new());
                let (_, first) = run_backup(
                    store.clone(),
                    &job,
                    dir.path().to_path_buf(),
                    None,
                    false,
                    10,
                    CancellationToken::new(),
                    Box::new(|_| {}),
                )
                .await
                .unwrap();

                let (_, second) = run_backup(
                    store,
                    &job,
                    dir.path().to_path_buf(),
                    Some(first.clone()),
                    false,
                    10,
                    CancellationToken::new(),
                    Box::new(|_| {}),
                )
                .await
                .unwrap();

                (first, second)
            });

            let first_entries = parse_manifest_lines(&first);
            let second_entries = parse_manifest_lines(&second);
            prop_assert_eq!(first_entries, second_entries);
        }
    }
}
