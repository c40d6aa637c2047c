//! Custom error types for the backup agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no such job: {0}")]
    NoSuchJob(String),

    #[error("no object under prefix {0}")]
    NoMatch(String),

    #[error("{path}: permissions too open, expected mode <= 0700")]
    PermissionsTooOpen { path: PathBuf },

    #[error("no recipients file at repo/recipients.txt")]
    NoRecipientsFile,

    #[error("no secrets file found")]
    NoSecretsFile,

    #[error("secrets file contains no passphrases")]
    NoSecretsFound,

    #[error("no passphrase registered for scrypt id {0}")]
    PassphraseNotFound(String),

    #[error("object is encrypted but no age identities are available")]
    IdentitiesNotFound,

    #[error("object {0} is not in a downloadable storage class")]
    NotDownloadable(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    #[error("decryption failed: {0}")]
    Decrypt(String),

    #[error("compression error: {0}")]
    Compress(String),

    #[error("object store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
