//! The object-store capability the engine depends on, and nothing else.
//!
//! The engine never talks to S3 directly — it only sees this trait, so unit
//! tests can swap in an in-memory fake (see `tests::FakeStore` below and in
//! `engine::tests`).

pub mod codec;
pub mod s3;

use crate::utils::errors::Result;
use async_trait::async_trait;
use std::io::Read;
use tokio::io::AsyncWrite;

/// Which encryption scheme, if any, to apply on upload. Compression and
/// encryption are independent; encryption is at most one of these two
/// modes, never both recipients and scrypt at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptMode {
    None,
    Recipients,
    Scrypt,
}

#[derive(Debug, Clone, Copy)]
pub struct UploadOptions {
    pub compress: bool,
    pub encrypt_mode: EncryptMode,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            compress: false,
            encrypt_mode: EncryptMode::None,
        }
    }
}

/// The capability the snapshot engine and manifest/job persistence layers
/// depend on. Keys are opaque strings; "no such object" is always
/// distinguishable from any other failure via [`crate::utils::errors::AgentError::NoMatch`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Head-check: does `key` exist?
    async fn exists(&self, key: &str) -> Result<bool>;

    /// The lexicographically greatest key under `prefix`, paginating
    /// transparently, or `AgentError::NoMatch` if nothing matches.
    async fn latest_matching(&self, prefix: &str) -> Result<(String, u64)>;

    /// Streams `reader`'s bytes through the configured codec chain and
    /// uploads under `key`. Returns the number of bytes actually
    /// transmitted (post compression/encryption). Does not require the
    /// reader's length in advance.
    async fn upload(
        &self,
        key: &str,
        reader: Box<dyn Read + Send>,
        opts: UploadOptions,
    ) -> Result<u64>;

    /// Downloads `key`, reversing whatever codec chain its metadata
    /// records, and writes the plaintext to `writer`. Returns the number of
    /// plaintext bytes written.
    async fn download(&self, key: &str, writer: &mut (dyn AsyncWrite + Unpin + Send)) -> Result<u64>;

    /// Whether this store's caller possesses age identities (required to
    /// decrypt recipient-encrypted objects).
    fn has_identities(&self) -> bool;
}

/// Convenience used by callers (manifest/job persistence) that just want
/// the bytes in memory rather than streaming to an arbitrary writer.
pub async fn download_to_vec(store: &dyn ObjectStore, key: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    store.download(key, &mut buf).await?;
    Ok(buf)
}
