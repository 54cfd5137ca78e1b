//! CLI Tooling
//!
//! Command-line access to the model cache: print the wire request a
//! simplified request builds to, inspect a delivery file, or fetch and
//! stream from a live autoupdate server.

use crate::config::{ConfigLoader, SyncConfig};
use crate::engine::SyncEngine;
use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::request::SimplifiedModelRequest;
use crate::schema::parse_schema;
use crate::subscription::{
    decode_delivery, ApplyReport, DecodedDelivery, Delivery, HttpTransport, SubscriptionEvent,
};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};

/// Modelsync CLI - normalized model cache for autoupdate servers
#[derive(Parser)]
#[command(name = "modelsync")]
#[command(about = "Build requests, inspect deliveries and sync models from an autoupdate server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (layered over the global config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the wire request built from a simplified request
    Tree {
        /// Schema file (TOML)
        #[arg(long)]
        schema: PathBuf,
        /// Simplified request (JSON)
        #[arg(long)]
        request: PathBuf,
    },
    /// Decode a delivery file into per-collection changes
    Decode {
        /// Delivery (JSON object of fqfield to value)
        #[arg(long)]
        delivery: PathBuf,
    },
    /// Request once and print the stored models
    Fetch {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        request: PathBuf,
    },
    /// Stream deliveries and log every applied one
    Subscribe {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        request: PathBuf,
        /// Stop after this many deliveries (default: until the stream ends)
        #[arg(long)]
        limit: Option<usize>,
    },
}

pub struct CliContext {
    config: SyncConfig,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, SyncError> {
        let config = ConfigLoader::load(config_path.as_deref())?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Logging config with command-line overrides applied.
    pub fn logging_config(&self, cli: &Cli) -> LoggingConfig {
        let mut logging = self.config.logging.clone();
        if let Some(level) = &cli.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &cli.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &cli.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &cli.log_file {
            logging.file = Some(file.clone());
        }
        logging
    }

    pub fn execute(&self, command: &Commands) -> Result<String, SyncError> {
        match command {
            Commands::Tree { schema, request } => self.tree(schema, request),
            Commands::Decode { delivery } => {
                let delivery: Delivery = read_json(delivery)?;
                let decoded = decode_delivery(&delivery)?;
                Ok(format_decoded(&decoded))
            }
            Commands::Fetch { schema, request } => self.fetch(schema, request),
            Commands::Subscribe {
                schema,
                request,
                limit,
            } => self.subscribe(schema, request, *limit),
        }
    }

    fn tree(&self, schema: &Path, request: &Path) -> Result<String, SyncError> {
        let compiled = parse_schema(schema)?.compile()?;
        let request: SimplifiedModelRequest = read_json(request)?;
        let transport = Arc::new(HttpTransport::new(self.config.server.timeout()));
        let engine = SyncEngine::new(compiled, &self.config, transport);
        let built = engine.build_request(&request)?;
        let full_lists: Vec<_> = built
            .full_lists
            .iter()
            .map(|(owner, id_field, foreign)| json!({"owner": owner, "idField": id_field, "collection": foreign}))
            .collect();
        serde_json::to_string_pretty(&json!({
            "request": built.request,
            "fullLists": full_lists,
        }))
        .map_err(|e| SyncError::InvalidInput(e.to_string()))
    }

    fn fetch(&self, schema: &Path, request: &Path) -> Result<String, SyncError> {
        let engine = SyncEngine::from_schema_file(schema, &self.config)?;
        let request: SimplifiedModelRequest = read_json(request)?;
        let runtime = new_runtime()?;
        let report = runtime.block_on(engine.fetch(&request))?;

        let mut table = Table::new();
        table.load_preset(comfy_table::presets::UTF8_FULL);
        table.set_header(vec!["Collection", "Id", "Title"]);
        for repository in engine.repositories() {
            for model in repository.get_all() {
                table.add_row(vec![
                    repository.collection().to_string(),
                    model.id().to_string(),
                    repository.title(&model),
                ]);
            }
        }
        Ok(format!("{}\n{}", format_report(&report), table))
    }

    fn subscribe(&self, schema: &Path, request: &Path, limit: Option<usize>) -> Result<String, SyncError> {
        let engine = SyncEngine::from_schema_file(schema, &self.config)?;
        let request: SimplifiedModelRequest = read_json(request)?;
        let runtime = new_runtime()?;

        runtime.block_on(async {
            let mut handle = engine.subscribe(&request).await?;
            let mut applied = 0usize;
            let mut failed = 0usize;
            while let Some(event) = handle.next_event().await {
                match event {
                    SubscriptionEvent::Applied(report) => {
                        applied += 1;
                        info!(
                            changed = report.changed,
                            deleted = report.deleted,
                            implicit = report.implicitly_deleted.values().map(|ids| ids.len()).sum::<usize>(),
                            "Delivery applied"
                        );
                    }
                    SubscriptionEvent::Error(err) => {
                        failed += 1;
                        error!(error = %err, "Delivery failed");
                    }
                    SubscriptionEvent::Ended => break,
                }
                if limit.is_some_and(|limit| applied + failed >= limit) {
                    break;
                }
            }
            handle.close();
            let stored: usize = engine.repositories().map(|r| r.len()).sum();
            Ok::<_, SyncError>(format!(
                "Subscription finished: applied={}, failed={}, models={}",
                applied, failed, stored
            ))
        })
    }
}

fn new_runtime() -> Result<tokio::runtime::Runtime, SyncError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(SyncError::ConfigError(
            "Cannot start a runtime from within an async runtime context".to_string(),
        ));
    }
    tokio::runtime::Runtime::new()
        .map_err(|e| SyncError::ConfigError(format!("Failed to create runtime: {}", e)))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, SyncError> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| SyncError::InvalidInput(format!("{}: {}", path.display(), e)))
}

fn format_report(report: &ApplyReport) -> String {
    let mut out = format!(
        "Applied at {}: changed={}, deleted={}",
        report.applied_at.to_rfc3339(),
        report.changed,
        report.deleted
    );
    if !report.dropped_collections.is_empty() {
        out.push_str(&format!(
            ", dropped collections: {}",
            report.dropped_collections.join(", ")
        ));
    }
    out
}

pub fn format_decoded(decoded: &DecodedDelivery) -> String {
    if decoded.is_empty() {
        return "Empty delivery".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Collection", "Id", "Change", "Fields"]);
    for (collection, records) in &decoded.changed {
        for (id, record) in records {
            let fields: Vec<&str> = record
                .keys()
                .map(String::as_str)
                .filter(|field| *field != crate::types::ID_FIELD)
                .collect();
            table.add_row(vec![
                collection.clone(),
                id.to_string(),
                "changed".to_string(),
                fields.join(", "),
            ]);
        }
    }
    for (collection, ids) in &decoded.deleted {
        for id in ids {
            table.add_row(vec![
                collection.clone(),
                id.to_string(),
                "deleted".to_string(),
                String::new(),
            ]);
        }
    }
    format!(
        "{}\nchanged={}, deleted={}",
        table,
        decoded.changed_count(),
        decoded.deleted_count()
    )
}
