//! Session configuration from `tether.toml`.
//!
//! Every key is optional:
//!
//! ```toml
//! host = "localhost"
//! port = 8001
//! queue_capacity = 64
//! journal_capacity = 256
//! handshake_timeout_ms = 10000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "tether.toml";

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8001;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    /// Bound on unsolicited pushes waiting for the session loop
    pub queue_capacity: usize,
    /// Session events kept in the journal
    pub journal_capacity: usize,
    /// A peer that has not finished the WebSocket upgrade by then is dropped
    pub handshake_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            queue_capacity: 64,
            journal_capacity: 256,
            handshake_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl SessionConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(content)?;
        Ok(config.clamped())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Address to bind, `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    // tokio's bounded channel panics on a zero capacity
    fn clamped(mut self) -> Self {
        self.queue_capacity = self.queue_capacity.max(1);
        self
    }
}

/// Search upward from `start` for `tether.toml`.
pub fn discover(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}
