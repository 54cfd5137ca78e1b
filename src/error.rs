//! Error types for the model cache.

use thiserror::Error;

/// Wire key errors (fqid, fqfield, structured field names)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Malformed key '{key}': expected {expected_parts} '/'-separated parts")]
    MalformedKey { key: String, expected_parts: usize },

    #[error("Malformed key '{key}': id is not a number")]
    InvalidId { key: String },

    #[error("Malformed structured field '{field}': expected exactly one placeholder, found {placeholders}")]
    MalformedStructuredField { field: String, placeholders: usize },
}

/// Errors raised while compiling relation declarations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeclarationError {
    #[error(transparent)]
    Key(#[from] KeyError),

    #[error("{0}")]
    Invalid(String),
}

/// Errors raised while building a wire request from a simplified request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Unknown fieldset '{fieldset}' for collection {collection}")]
    UnknownFieldset { collection: String, fieldset: String },

    #[error("Unknown relation in collection {collection}: {field} (effective field: {effective_field})")]
    UnknownRelation {
        collection: String,
        field: String,
        effective_field: String,
    },

    #[error("Collection {foreign} is already a full list of {existing}, cannot also be a full list of {requested}")]
    ConflictingFullList {
        foreign: String,
        existing: String,
        requested: String,
    },

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Errors raised while resolving a relation against the store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelationError {
    #[error("Structured relation {collection}.{field} read without a parameter")]
    MissingStructuredParameter { collection: String, field: String },

    #[error("No relation {field} on collection {collection}")]
    UnknownRelation { collection: String, field: String },

    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Update slot coordination errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SlotError {
    #[error("Slot {slot} is not the open slot (current: {current:?})")]
    InvalidSlot { slot: u64, current: Option<u64> },

    #[error("Slot coordinator closed while waiting for a slot")]
    Closed,
}

/// Normalized store errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Record for collection {collection} carries no numeric id")]
    MissingId { collection: String },
}

/// Transport errors (HTTP or stream)
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected payload: {0}")]
    UnexpectedPayload(String),

    #[error("Stream closed")]
    StreamClosed,
}

/// Schema file errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Relation declaration error: {0}")]
    Declaration(#[from] DeclarationError),

    #[error("Invalid schema: {0}")]
    Invalid(String),
}

/// Top-level error for engine operations
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Decode error: {0}")]
    Decode(#[from] KeyError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Relation error: {0}")]
    Relation(#[from] RelationError),

    #[error("Slot error: {0}")]
    Slot(#[from] SlotError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Unregistered collection: {0}")]
    UnregisteredCollection(String),

    #[error("Action {action} failed: {message}")]
    Action { action: String, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<config::ConfigError> for SyncError {
    fn from(err: config::ConfigError) -> Self {
        SyncError::ConfigError(err.to_string())
    }
}
