//! Incremental, content-addressed backup engine.
//!
//! Diffs a source directory against its prior manifest and uploads only
//! new or changed content, addressed by the SHA-256 of its plaintext.

pub mod config;
pub mod credentials;
pub mod daemon;
pub mod engine;
pub mod job;
pub mod manifest;
pub mod store;
pub mod utils;

pub use config::Config;
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
