//! Job definitions: which directories to back up, and under what filter
//! policy. Jobs are loaded from and saved to the object store as
//! scrypt-encrypted, gzip-compressed YAML under `jobs/<job>/<job>-NNN.yml`.

use crate::store::ObjectStore;
use crate::utils::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};

/// One `(path, label)` pair within a job; each source has its own manifest
/// series under `manifests/<job>/<label>/...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub path: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Job {
    pub name: String,
    pub sources: Vec<Source>,

    #[serde(default)]
    pub include_top_dirs: Vec<String>,
    #[serde(default)]
    pub exclude_top_dirs: Vec<String>,
    #[serde(default)]
    pub include_extensions: Vec<String>,
    #[serde(default)]
    pub exclude_extensions: Vec<String>,
    #[serde(default)]
    pub skip_dirs: Vec<String>,
    #[serde(default)]
    pub skip_dir_items: Vec<String>,
}

fn jobs_prefix(job_name: &str) -> String {
    format!("jobs/{job_name}/")
}

/// Parses the numeric suffix out of a `<job>-NNN.yml` key. Returns `None` if
/// the key doesn't match the expected shape.
fn parse_suffix(key: &str, job_name: &str) -> Option<u32> {
    let file_name = key.rsplit('/').next()?;
    let prefix = format!("{job_name}-");
    let rest = file_name.strip_prefix(&prefix)?;
    let digits = rest.strip_suffix(".yml")?;
    digits.parse().ok()
}

/// Downloads the raw bytes of the latest job definition for `job_name`
/// plus the exact key they were read from, without parsing — shared by
/// [`Job::download`] and by callers (the job-download CLI) that want to
/// save the file byte for byte rather than re-serializing a parsed `Job`.
async fn download_raw(store: &dyn ObjectStore, job_name: &str) -> Result<(Vec<u8>, String)> {
    let prefix = jobs_prefix(job_name);
    let (key, _size) = store
        .latest_matching(&prefix)
        .await
        .map_err(|_| AgentError::NoSuchJob(job_name.to_string()))?;

    let mut buf = Vec::new();
    store.download(&key, &mut buf).await?;
    Ok((buf, key))
}

impl Job {
    /// Downloads and parses the latest job definition for `job_name`.
    pub async fn download(store: &dyn ObjectStore, job_name: &str) -> Result<Self> {
        let (buf, _key) = download_raw(store, job_name).await?;
        let mut job: Job = serde_yaml::from_slice(&buf)?;
        job.name = job_name.to_string();
        Ok(job)
    }

    /// Downloads the raw bytes of the latest job definition for `job_name`
    /// plus the exact key they came from, leaving the YAML untouched.
    pub async fn download_with_key(store: &dyn ObjectStore, job_name: &str) -> Result<(Vec<u8>, String)> {
        download_raw(store, job_name).await
    }

    /// Uploads raw job-definition bytes for `job_name`, incrementing the
    /// `-NNN` suffix of the latest existing key. When no prior key exists,
    /// a `-000.yml` key is faked and then always incremented, so the very
    /// first real upload for a job name is `-001.yml`, never `-000.yml`.
    /// Job configs are always scrypt-encrypted and compressed, matching
    /// manifest upload policy. Bytes are uploaded as given, not
    /// re-serialized, so comments and field ordering in the source file
    /// survive.
    pub async fn upload_bytes(store: &dyn ObjectStore, job_name: &str, data: Vec<u8>) -> Result<String> {
        let prefix = jobs_prefix(job_name);
        let next = match store.latest_matching(&prefix).await {
            Ok((key, _)) => parse_suffix(&key, job_name).map(|n| n + 1).unwrap_or(1),
            Err(_) => 1,
        };

        let key = format!("{prefix}{job_name}-{next:03}.yml");
        store
            .upload(
                &key,
                Box::new(std::io::Cursor::new(data)),
                crate::store::UploadOptions {
                    compress: true,
                    encrypt_mode: crate::store::EncryptMode::Scrypt,
                },
            )
            .await?;
        Ok(key)
    }
}

/// The directory-traversal filter policy carried by a [`Job`], split out so
/// the FS Scanner doesn't need the whole job (sources, extensions) just to
/// decide whether to descend into a directory.
#[derive(Debug, Clone, Default)]
pub struct DirFilterPolicy {
    pub include_top_dirs: std::collections::HashSet<String>,
    pub exclude_top_dirs: std::collections::HashSet<String>,
    pub skip_dirs: std::collections::HashSet<String>,
    pub skip_dir_items: std::collections::HashSet<String>,
}

impl From<&Job> for DirFilterPolicy {
    fn from(job: &Job) -> Self {
        Self {
            include_top_dirs: job.include_top_dirs.iter().cloned().collect(),
            exclude_top_dirs: job.exclude_top_dirs.iter().cloned().collect(),
            skip_dirs: job.skip_dirs.iter().cloned().collect(),
            skip_dir_items: job.skip_dir_items.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::FakeStore;

    #[test]
    fn parses_suffix_from_key() {
        assert_eq!(parse_suffix("jobs/photos/photos-007.yml", "photos"), Some(7));
        assert_eq!(parse_suffix("jobs/photos/photos-000.yml", "photos"), Some(0));
        assert_eq!(parse_suffix("jobs/photos/other-007.yml", "photos"), None);
    }

    #[tokio::test]
    async fn first_upload_starts_at_001() {
        let store = FakeStore::new();
        let key = Job::upload_bytes(&store, "photos", b"sources: []".to_vec())
            .await
            .unwrap();
        assert_eq!(key, "jobs/photos/photos-001.yml");

        let key = Job::upload_bytes(&store, "photos", b"sources: []".to_vec())
            .await
            .unwrap();
        assert_eq!(key, "jobs/photos/photos-002.yml");
    }

    #[tokio::test]
    async fn upload_then_download_preserves_raw_bytes() {
        let store = FakeStore::new();
        let raw = b"# a comment serde_yaml would drop\nsources: []\n".to_vec();
        Job::upload_bytes(&store, "photos", raw.clone()).await.unwrap();

        let (bytes, key) = Job::download_with_key(&store, "photos").await.unwrap();
        assert_eq!(bytes, raw);
        assert_eq!(key, "jobs/photos/photos-001.yml");
    }

    #[test]
    fn yaml_round_trip() {
        let job = Job {
            name: "photos".into(),
            sources: vec![Source {
                path: "/data/photos".into(),
                label: "full".into(),
            }],
            include_extensions: vec!["jpg".into(), "png".into()],
            ..Default::default()
        };

        let yaml = serde_yaml::to_string(&job).unwrap();
        let back: Job = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.name, "photos");
        assert_eq!(back.sources.len(), 1);
        assert_eq!(back.include_extensions, vec!["jpg", "png"]);
    }
}
