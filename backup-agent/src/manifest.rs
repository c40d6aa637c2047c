//! Manifest persistence: the CSV listing of every file known from a prior
//! backup of a `(job, label)` source, stored gzip+scrypt-encrypted under
//! `manifests/<job>/<label>/...` (§3.3, §6).

use crate::store::{EncryptMode, ObjectStore, UploadOptions};
use crate::utils::errors::{AgentError, Result};
use chrono::{Local, Timelike};

fn manifests_prefix(job_name: &str, label: &str) -> String {
    format!("manifests/{job_name}/{label}/")
}

/// Looks up and downloads the latest manifest for `(job_name, label)`.
/// Distinguishes "no manifest yet" (first backup of this source), which
/// surfaces as [`AgentError::NoMatch`] from the store's prefix lookup and
/// is folded into `Ok(None)` here, from any other store failure.
pub async fn download(
    store: &dyn ObjectStore,
    job_name: &str,
    label: &str,
) -> Result<Option<(Vec<u8>, String)>> {
    let prefix = manifests_prefix(job_name, label);
    let (key, _size) = match store.latest_matching(&prefix).await {
        Ok(found) => found,
        Err(AgentError::NoMatch(_)) => return Ok(None),
        Err(e) => return Err(e),
    };

    let bytes = download_with_key(store, &key).await?;
    Ok(Some((bytes, key)))
}

/// Downloads a manifest by its exact key, reversing whatever codec chain
/// its upload metadata records.
pub async fn download_with_key(store: &dyn ObjectStore, key: &str) -> Result<Vec<u8>> {
    crate::store::download_to_vec(store, key).await
}

/// Uploads a freshly-written manifest for `(job_name, label)`, naming the
/// key with today's date and the number of seconds since local midnight so
/// that multiple backups on the same day still sort uniquely within the
/// job/label prefix.
pub async fn upload(
    store: &dyn ObjectStore,
    data: Vec<u8>,
    job_name: &str,
    label: &str,
) -> Result<String> {
    let now = Local::now();
    let stamp = now.format("%Y-%m-%d").to_string();
    let seconds = now.num_seconds_from_midnight();

    let key = format!(
        "manifests/{job_name}/{label}/{job_name}-{label}-{stamp}-{seconds:05}.csv.gz"
    );

    store
        .upload(
            &key,
            Box::new(std::io::Cursor::new(data)),
            UploadOptions {
                compress: true,
                encrypt_mode: EncryptMode::Scrypt,
            },
        )
        .await?;

    Ok(key)
}
