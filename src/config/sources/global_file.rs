//! Global config file source: `<config dir>/modelsync/config.{yaml,toml,json}`

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File};
use std::path::PathBuf;

/// Platform config directory for modelsync, if one can be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "modelsync", "modelsync")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Add the optional global config file to the builder.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let Some(dir) = config_dir() else {
        return Ok(builder);
    };
    Ok(builder.add_source(File::from(dir.join("config")).required(false)))
}
