//! Drops records by file-extension policy. Used twice in a pipeline when a
//! job specifies both `include_extensions` and `exclude_extensions`: once
//! with `include = true`, once with `include = false`.

use crate::engine::record::EntryRecord;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn normalize(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .filter(|e| !e.is_empty())
        .map(|e| {
            if e.starts_with('.') {
                e.to_ascii_lowercase()
            } else {
                format!(".{}", e.to_ascii_lowercase())
            }
        })
        .collect()
}

fn matches(rel_path: &str, extensions: &[String]) -> bool {
    let lower = rel_path.to_ascii_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}

/// Spawns a filter stage. `include = true` keeps only matching records;
/// `include = false` drops matching records. Failed records always pass
/// through untouched.
pub fn spawn(
    mut rx: mpsc::Receiver<EntryRecord>,
    extensions: Vec<String>,
    include: bool,
    channel_capacity: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<EntryRecord> {
    let extensions = normalize(&extensions);
    let (tx, out_rx) = mpsc::channel(channel_capacity);

    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                _ = cancel.cancelled() => return,
                record = rx.recv() => record,
            };
            let Some(record) = record else { return };

            if record.is_failed() {
                if tx.send(record).await.is_err() {
                    return;
                }
                continue;
            }

            let ext_match = matches(&record.rel_path, &extensions);
            if ext_match == include {
                if tx.send(record).await.is_err() {
                    return;
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

    async fn run_filter(paths: &[&str], extensions: &[&str], include: bool) -> Vec<String> {
        let (tx, rx) = mpsc::channel(10);
        for p in paths {
            tx.send(EntryRecord::from_scan(p.to_string(), 0, 0, 0o644))
                .await
                .unwrap();
        }
        drop(tx);

        let exts: Vec<String> = extensions.iter().map(|s| s.to_string()).collect();
        let mut out_rx = spawn(rx, exts, include, 10, CancellationToken::new());
        let mut out = Vec::new();
        while let Some(r) = out_rx.recv().await {
            out.push(r.rel_path);
        }
        out
    }

    #[tokio::test]
    async fn include_keeps_only_matches() {
        let kept = run_filter(&["a.jpg", "b.png", "c.txt"], &["jpg", "png"], true).await;
        assert_eq!(kept, vec!["a.jpg", "b.png"]);
    }

    #[tokio::test]
    async fn exclude_drops_matches() {
        let kept = run_filter(&["a.jpg", "b.png", "c.txt"], &["jpg"], false).await;
        assert_eq!(kept, vec!["b.png", "c.txt"]);
    }

    #[tokio::test]
    async fn matching_is_case_insensitive() {
        let kept = run_filter(&["A.JPG"], &["jpg"], true).await;
        assert_eq!(kept, vec!["A.JPG"]);
    }
}
