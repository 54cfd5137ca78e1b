//! Merge policy: built-in defaults every layered load starts from.

pub mod service;

use crate::config::{
    default_action_path, default_autoupdate_path, default_base_url, default_sort_debounce_ms,
    default_timeout_secs,
};
use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};

/// Builder seeded with the default values of every section.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("server.base_url", default_base_url())?
        .set_default("server.autoupdate_path", default_autoupdate_path())?
        .set_default("server.action_path", default_action_path())?
        .set_default("server.timeout_secs", default_timeout_secs())?
        .set_default("repository.sort_debounce_ms", default_sort_debounce_ms())
}
