//! Configuration
//!
//! Layered configuration: built-in defaults, an optional global file, an
//! optional explicit file, then `MODELSYNC__*` environment variables.

pub mod facade;
pub mod merge;
pub mod sources;

pub use facade::ConfigLoader;

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Autoupdate and action endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_autoupdate_path")]
    pub autoupdate_path: String,

    #[serde(default = "default_action_path")]
    pub action_path: String,

    /// Timeout for one-shot requests; streams are not timed out.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ServerConfig {
    pub fn autoupdate_url(&self) -> String {
        join_url(&self.base_url, &self.autoupdate_path)
    }

    pub fn action_url(&self) -> String {
        join_url(&self.base_url, &self.action_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            autoupdate_path: default_autoupdate_path(),
            action_path: default_action_path(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Debounce window for sorted-list recomputation; 0 recomputes on every commit.
    #[serde(default = "default_sort_debounce_ms")]
    pub sort_debounce_ms: u64,
}

impl RepositoryConfig {
    pub fn sort_debounce(&self) -> Duration {
        Duration::from_millis(self.sort_debounce_ms)
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            sort_debounce_ms: default_sort_debounce_ms(),
        }
    }
}

pub(crate) fn default_base_url() -> String {
    "http://localhost:9012".to_string()
}

pub(crate) fn default_autoupdate_path() -> String {
    "/system/autoupdate".to_string()
}

pub(crate) fn default_action_path() -> String {
    "/system/action/handle_request".to_string()
}

pub(crate) fn default_timeout_secs() -> u64 {
    30
}

pub(crate) fn default_sort_debounce_ms() -> u64 {
    50
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_join_without_double_slash() {
        let server = ServerConfig {
            base_url: "https://example.org/".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.autoupdate_url(), "https://example.org/system/autoupdate");
        assert_eq!(
            server.action_url(),
            "https://example.org/system/action/handle_request"
        );
        assert_eq!(server.timeout(), Duration::from_secs(30));
    }
}
