//! Utility modules for the backup agent.

pub mod errors;
pub mod humanize;
pub mod logger;

pub use errors::{AgentError, Result};
