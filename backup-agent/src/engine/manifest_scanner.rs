//! Reads entry records from a previously-written manifest (§3.3's wire
//! format), in the exact order they appear — which, by the FS Scanner's
//! sorting invariant, is the same canonical order the live filesystem scan
//! produces.

use crate::engine::record::{EntryRecord, EntryStatus};
use percent_encoding::percent_decode_str;
use std::io::{BufRead, BufReader, Read};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) fn parse_line(line: &str) -> Option<EntryRecord> {
    let tokens: Vec<&str> = line.split(',').collect();
    if tokens.len() != 5 {
        return None;
    }

    let raw_size: u64 = tokens[0].parse().ok()?;
    let mod_time: i64 = tokens[1].parse().ok()?;
    let mode = u32::from_str_radix(tokens[2], 8).ok()?;
    let hash = tokens[3].to_string();
    let rel_path = percent_decode_str(tokens[4]).decode_utf8().ok()?.into_owned();

    Some(EntryRecord {
        status: EntryStatus::Ok,
        rel_path,
        hash,
        raw_size,
        uploaded_size: 0,
        mod_time,
        mode,
        action: crate::engine::record::EntryAction::NoAction,
        action_message: String::new(),
    })
}

/// Spawns a blocking reader task over any synchronous `Read` (a temp file,
/// an in-memory buffer) and returns the channel of parsed records.
pub fn spawn<R: Read + Send + 'static>(
    reader: R,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let (tx, rx) = mpsc::channel(channel_capacity);

    tokio::task::spawn_blocking(move || {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next() {
            if cancel.is_cancelled() {
                return;
            }
            let Ok(line) = line else { return };
            if let Some(record) = parse_line(&line) {
                if tx.blocking_send(record).is_err() {
                    return;
                }
            }
            // malformed lines are silently skipped, matching §4.3
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn parses_well_formed_lines() {
        let data = b"5,1700000000,0644,2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824,a.txt\n".to_vec();
        let mut rx = spawn(Cursor::new(data), 10, CancellationToken::new());
        let record = rx.recv().await.unwrap();
        assert_eq!(record.rel_path, "a.txt");
        assert_eq!(record.raw_size, 5);
        assert_eq!(record.mod_time, 1_700_000_000);
        assert_eq!(record.mode, 0o644);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let data = b"not,enough,fields\n5,1,0644,abc,ok.txt\n".to_vec();
        let mut rx = spawn(Cursor::new(data), 10, CancellationToken::new());
        let record = rx.recv().await.unwrap();
        assert_eq!(record.rel_path, "ok.txt");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn decodes_percent_encoded_paths() {
        let data = b"1,1,0644,abc,a%2Cb%0Ac.txt\n".to_vec();
        let mut rx = spawn(Cursor::new(data), 10, CancellationToken::new());
        let record = rx.recv().await.unwrap();
        assert_eq!(record.rel_path, "a,b\nc.txt");
    }
}
