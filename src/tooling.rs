//! Tooling
//!
//! Command-line access to the model cache.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
