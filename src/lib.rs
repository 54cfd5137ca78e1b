//! Modelsync: Normalized Model Cache
//!
//! A client-side cache of server models kept current by a streaming
//! autoupdate subscription. Records are stored flat and normalized; relations
//! are resolved lazily through a declarative relation table, and
//! per-collection repositories publish view-models atomically once per
//! applied delivery.

pub mod action;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod logging;
pub mod relation;
pub mod repository;
pub mod request;
pub mod schema;
pub mod store;
pub mod subscription;
pub mod tooling;
pub mod types;

pub use action::{ActionGateway, ActionRequest, ActionSender};
pub use config::{ConfigLoader, SyncConfig};
pub use engine::SyncEngine;
pub use error::SyncError;
pub use relation::{RelationDeclaration, RelationEnd, RelationTable};
pub use repository::{CollectionModel, ViewModel, ViewModelRepository};
pub use request::{Follow, SimplifiedModelRequest};
pub use store::{NormalizedStore, SlotCoordinator};
pub use subscription::{ApplyReport, SubscriptionEvent, SubscriptionHandle, Transport};
pub use types::{Id, Record};
