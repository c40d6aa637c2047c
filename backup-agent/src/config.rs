//! Configuration management for the backup agent.
//!
//! Loads configuration from a TOML file, falling back to defaults for any
//! field left unspecified. CLI flags (parsed per-binary in `src/bin/`)
//! override the corresponding field after this file is loaded.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub aws: AwsConfig,
    pub credentials: CredentialsConfig,
    pub log: LogConfig,
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Named AWS profile to resolve credentials and region from.
    #[serde(default)]
    pub profile: Option<String>,

    /// Region override; if absent, resolved from the profile/environment.
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Path to the age identities file (public-key decryption).
    #[serde(default = "default_identities_path")]
    pub identities_file: PathBuf,

    /// Path to the scrypt passphrase secrets file.
    #[serde(default = "default_secrets_path")]
    pub secrets_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Bounded channel capacity between adjacent pipeline stages.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Apply gzip compression to uploaded blobs and manifests.
    #[serde(default = "default_compress")]
    pub compress: bool,
}

fn default_identities_path() -> PathBuf {
    dirs_home().join(".s3bu").join("identities.txt")
}

fn default_secrets_path() -> PathBuf {
    dirs_home().join(".s3bu").join("secrets.yml")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    10
}

fn default_compress() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Create a default configuration.
    pub fn default() -> Self {
        Config {
            aws: AwsConfig {
                profile: None,
                region: None,
            },
            credentials: CredentialsConfig {
                identities_file: default_identities_path(),
                secrets_file: default_secrets_path(),
            },
            log: LogConfig {
                level: default_log_level(),
            },
            engine: EngineConfig {
                channel_capacity: default_channel_capacity(),
                compress: default_compress(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_channel_capacity() {
        let cfg = Config::default();
        assert_eq!(cfg.engine.channel_capacity, 10);
        assert!(cfg.engine.compress);
    }

    #[test]
    fn from_file_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [aws]
            profile = "personal"

            [credentials]
            identities_file = "/tmp/identities.txt"
            secrets_file = "/tmp/secrets.yml"

            [log]
            level = "debug"

            [engine]
            channel_capacity = 4
            compress = false
            "#,
        )?;

        let cfg = Config::from_file(&path)?;
        assert_eq!(cfg.aws.profile.as_deref(), Some("personal"));
        assert_eq!(cfg.log.level, "debug");
        assert_eq!(cfg.engine.channel_capacity, 4);
        assert!(!cfg.engine.compress);
        Ok(())
    }
}
