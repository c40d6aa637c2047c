//! The entry record that flows through every stage of the snapshot engine.

use std::path::PathBuf;

/// Diff classification for a record relative to the prior manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Ok,
    New,
    Modified,
    NotFound,
}

/// Outcome of this run for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    NoAction,
    Uploaded,
    Failed,
}

/// One file's identity, metadata, diff status, and run outcome.
///
/// Records are owned by exactly one stage at a time; a stage that forwards a
/// record gives up any further claim on it. Once `action == Failed`,
/// downstream stages must not overwrite `action` or redo work — they pass
/// the record through unchanged (the Manifest Writer is the one exception,
/// which zeroes `mod_time` on failed records so the next run retries them).
#[derive(Debug, Clone)]
pub struct EntryRecord {
    pub status: EntryStatus,
    /// Path relative to the source root, `/`-separated.
    pub rel_path: String,
    /// Lowercase hex SHA-256, empty until computed or read from a manifest.
    pub hash: String,
    pub raw_size: u64,
    pub uploaded_size: u64,
    pub mod_time: i64,
    /// Low 9 permission bits (`0o777` mask).
    pub mode: u32,
    pub action: EntryAction,
    pub action_message: String,
}

impl EntryRecord {
    /// A record as freshly discovered by the FS Scanner: provisionally `New`
    /// until a Stream Comparer says otherwise.
    pub fn from_scan(rel_path: String, raw_size: u64, mod_time: i64, mode: u32) -> Self {
        Self {
            status: EntryStatus::New,
            rel_path,
            hash: String::new(),
            raw_size,
            uploaded_size: 0,
            mod_time,
            mode,
            action: EntryAction::NoAction,
            action_message: String::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.action == EntryAction::Failed
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.action = EntryAction::Failed;
        self.action_message = message.into();
    }

    pub fn source_path(&self, root: &std::path::Path) -> PathBuf {
        root.join(&self.rel_path)
    }
}
