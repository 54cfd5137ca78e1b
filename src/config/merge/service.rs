//! MergeService: orchestrates sources and deserializes to SyncConfig.

use super::builder_with_defaults;
use crate::config::sources::{environment, global_file};
use crate::config::SyncConfig;
use config::{ConfigError, File};
use std::path::Path;

/// Merge service for config composition.
pub struct MergeService;

impl MergeService {
    /// Precedence: defaults (lowest) -> global file -> explicit file -> environment (highest).
    pub fn load(path: Option<&Path>) -> Result<SyncConfig, ConfigError> {
        let builder = builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder,
        };
        let builder = environment::add_to_builder(builder)?;

        let config = builder.build()?;
        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  base_url: https://sync.example.org\nrepository:\n  sort_debounce_ms: 0\nlogging:\n  level: debug"
        )
        .unwrap();

        let config = MergeService::load(Some(file.path())).unwrap();
        assert_eq!(config.server.base_url, "https://sync.example.org");
        assert_eq!(config.server.autoupdate_path, "/system/autoupdate");
        assert_eq!(config.repository.sort_debounce_ms, 0);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = MergeService::load(Some(Path::new("/nonexistent/modelsync.yaml")));
        assert!(result.is_err());
    }
}
