//! Serializes every non-`NotFound` record to the new manifest file (§3.3,
//! §4.8). `Failed` records get `mod_time` zeroed so the next run's Stream
//! Comparer sees a changed mtime and retries them.

use crate::engine::record::{EntryAction, EntryRecord, EntryStatus};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::io::Write;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) fn format_line(record: &EntryRecord) -> String {
    let mod_time = if record.action == EntryAction::Failed {
        0
    } else {
        record.mod_time
    };
    let path = utf8_percent_encode(&record.rel_path, NON_ALPHANUMERIC).to_string();

    format!(
        "{},{},0{:o},{},{}\n",
        record.raw_size,
        mod_time,
        record.mode & 0o777,
        record.hash,
        path,
    )
}

/// Spawns a blocking writer task over any synchronous `Write`, draining
/// `rx` and forwarding every record (matching Go's pass-through semantics
/// so downstream counting still sees every record, including `NotFound`).
pub fn spawn<W: Write + Send + 'static>(
    mut rx: mpsc::Receiver<EntryRecord>,
    writer: W,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let (tx, out_rx) = mpsc::channel(channel_capacity);

    tokio::task::spawn_blocking(move || {
        let mut writer = writer;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let Some(mut record) = rx.blocking_recv() else { return };

            if record.status != EntryStatus::NotFound {
                let line = format_line(&record);
                if let Err(e) = writer.write_all(line.as_bytes()) {
                    record.fail(format!("failed writing manifest entry: {e}"));
                }
            }

            if tx.blocking_send(record).is_err() {
                return;
            }
        }
    });

    out_rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::record::EntryRecord;

    #[tokio::test]
    async fn writes_non_notfound_records_and_zeroes_failed_modtime() {
        let (tx, rx) = mpsc::channel(10);

        let mut ok = EntryRecord::from_scan("a.txt".into(), 5, 1_700_000_000, 0o644);
        ok.status = EntryStatus::Ok;
        ok.hash = "abc".into();

        let mut failed = EntryRecord::from_scan("b.txt".into(), 3, 1_700_000_001, 0o600);
        failed.fail("upload error");

        let mut gone = EntryRecord::from_scan("c.txt".into(), 0, 0, 0o644);
        gone.status = EntryStatus::NotFound;

        tx.send(ok).await.unwrap();
        tx.send(failed).await.unwrap();
        tx.send(gone).await.unwrap();
        drop(tx);

        let buf: Vec<u8> = Vec::new();
        let mut out_rx = spawn(rx, buf, 10, CancellationToken::new());

        let mut forwarded = Vec::new();
        while let Some(r) = out_rx.recv().await {
            forwarded.push(r);
        }
        assert_eq!(forwarded.len(), 3);
    }

    #[test]
    fn format_line_percent_encodes_commas_and_newlines() {
        let mut record = EntryRecord::from_scan("weird,name\n.txt".into(), 1, 1, 0o644);
        record.hash = "deadbeef".into();
        let line = format_line(&record);
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[4], "weird%2Cname%0A%2Etxt");
    }

    proptest::proptest! {
        /// Manifest round-trip (§8.1.1): any record the writer formats must
        /// come back out of the scanner with the same identity fields,
        /// including paths containing commas, newlines, and non-ASCII bytes.
        #[test]
        fn format_then_parse_round_trips(
            rel_path in "[^\u{0}]{1,40}",
            raw_size in 0u64..=u32::MAX as u64,
            mod_time in 0i64..=4_000_000_000i64,
            mode in 0u32..=0o777,
            hash in "[0-9a-f]{0,64}",
        ) {
            let mut record = EntryRecord::from_scan(rel_path.clone(), raw_size, mod_time, mode);
            record.hash = hash.clone();

            let line = format_line(&record);
            let parsed = crate::engine::manifest_scanner::parse_line(line.trim_end())
                .expect("well-formed line must parse");

            prop_assert_eq!(parsed.rel_path, rel_path);
            prop_assert_eq!(parsed.raw_size, raw_size);
            prop_assert_eq!(parsed.mod_time, mod_time);
            prop_assert_eq!(parsed.mode, mode);
            prop_assert_eq!(parsed.hash, hash);
        }
    }
}
