//! Loads the age recipients, identities, and scrypt secrets that the object
//! store needs to encrypt uploads and decrypt downloads (§6.2).
//!
//! Recipients come from the bucket itself (`repo/recipients.txt`); identities
//! and secrets come from local files, both of which must not be group- or
//! world-readable.

use crate::store::ObjectStore;
use crate::utils::errors::{AgentError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

/// The credential material an [`crate::store::s3::S3ObjectStore`] needs for
/// every encrypt/decrypt operation. Loaded once at startup.
#[derive(Clone)]
pub struct Credentials {
    pub recipients: Vec<age::x25519::Recipient>,
    pub identities: Vec<age::x25519::Identity>,
    /// `(id, passphrase)` pairs in file order; upload always uses the last
    /// entry, download selects by the `s3bu-scrypt-id` metadata key.
    pub secrets: Vec<(String, String)>,
}

impl Credentials {
    /// No recipients, identities, or secrets — used to bootstrap a store
    /// connection just far enough to fetch `repo/recipients.txt`, before
    /// the real credentials are loaded.
    pub fn empty() -> Self {
        Self {
            recipients: Vec::new(),
            identities: Vec::new(),
            secrets: Vec::new(),
        }
    }

    pub fn passphrase_map(&self) -> HashMap<String, String> {
        self.secrets.iter().cloned().collect()
    }

    /// Loads recipients from the bucket and identities/secrets from local
    /// files. A missing recipients file or secrets file with no entries is
    /// fatal: both are required for any upload path to be usable, matching
    /// the original tool's unconditional startup check.
    pub async fn load(
        store: &dyn ObjectStore,
        identities_path: &Path,
        secrets_path: &Path,
    ) -> Result<Self> {
        let recipients = load_recipients(store).await?;
        let identities = load_identities(identities_path)?;
        let secrets = load_secrets(secrets_path)?;

        Ok(Self {
            recipients,
            identities,
            secrets,
        })
    }
}

async fn load_recipients(store: &dyn ObjectStore) -> Result<Vec<age::x25519::Recipient>> {
    let bytes = match crate::store::download_to_vec(store, "repo/recipients.txt").await {
        Ok(bytes) => bytes,
        Err(AgentError::NoMatch(_)) => return Err(AgentError::NoRecipientsFile),
        Err(e) => return Err(e),
    };

    let text = String::from_utf8(bytes).map_err(|e| AgentError::Other(e.to_string()))?;
    let mut recipients = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let recipient = age::x25519::Recipient::from_str(line)
            .map_err(|e| AgentError::Other(format!("invalid recipient line: {e}")))?;
        recipients.push(recipient);
    }
    Ok(recipients)
}

/// Checks that `path`'s permission bits carry no group or world access
/// (`mode & 0o077 == 0`), the same threshold the original tool enforces.
#[cfg(unix)]
fn check_permissions(path: &Path, meta: &std::fs::Metadata) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = meta.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(AgentError::PermissionsTooOpen {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path, _meta: &std::fs::Metadata) -> Result<()> {
    Ok(())
}

/// A file that simply does not exist yet is not an error for identities: a
/// brand-new setup with no identities file can still upload (recipients
/// only), it just can't decrypt.
fn load_identities(path: &Path) -> Result<Vec<age::x25519::Identity>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AgentError::Io(e)),
    };
    check_permissions(path, &meta)?;

    let text = std::fs::read_to_string(path)?;
    let mut identities = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let identity = age::x25519::Identity::from_str(line)
            .map_err(|e| AgentError::Other(format!("invalid identity line: {e}")))?;
        identities.push(identity);
    }
    Ok(identities)
}

#[derive(Debug, Deserialize)]
struct SecretEntry {
    id: String,
    passphrase: String,
}

/// Unlike identities, a missing secrets file is a hard error: scrypt upload
/// always needs a passphrase, and there's no fallback mode that works
/// without one.
fn load_secrets(path: &Path) -> Result<Vec<(String, String)>> {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AgentError::NoSecretsFile),
        Err(e) => return Err(AgentError::Io(e)),
    };
    check_permissions(path, &meta)?;

    let text = std::fs::read_to_string(path)?;
    let entries: Vec<SecretEntry> = serde_yaml::from_str(&text)?;
    if entries.is_empty() {
        return Err(AgentError::NoSecretsFound);
    }

    Ok(entries.into_iter().map(|e| (e.id, e.passphrase)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::FakeStore;

    #[tokio::test]
    async fn missing_recipients_file_is_fatal() {
        let store = FakeStore::new();
        let dir = tempfile::tempdir().unwrap();
        let result = Credentials::load(
            &store,
            &dir.path().join("identities.txt"),
            &dir.path().join("secrets.yml"),
        )
        .await;
        assert!(matches!(result, Err(AgentError::NoRecipientsFile)));
    }

    #[test]
    fn missing_identities_file_yields_empty_list() {
        let dir = tempfile::tempdir().unwrap();
        let identities = load_identities(&dir.path().join("identities.txt")).unwrap();
        assert!(identities.is_empty());
    }

    #[test]
    fn rejects_identities_file_with_loose_permissions() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("identities.txt");
            std::fs::write(&path, "# AGE-SECRET-KEY-EXAMPLE\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

            let result = load_identities(&path);
            assert!(matches!(result, Err(AgentError::PermissionsTooOpen { .. })));
        }
    }

    #[test]
    fn missing_secrets_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_secrets(&dir.path().join("secrets.yml"));
        assert!(matches!(result, Err(AgentError::NoSecretsFile)));
    }

    #[test]
    fn parses_secrets_yaml_into_ordered_pairs() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("secrets.yml");
            std::fs::write(
                &path,
                "- id: default\n  passphrase: correct horse battery staple\n",
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();

            let secrets = load_secrets(&path).unwrap();
            assert_eq!(secrets.len(), 1);
            assert_eq!(secrets[0].0, "default");
        }
    }
}
