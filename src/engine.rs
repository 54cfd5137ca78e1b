//! Sync Engine
//!
//! Owns one store, slot coordinator and relation table, plus a repository per
//! declared collection, and wires them to the subscription channel and the
//! action gateway.

use crate::action::{ActionGateway, HttpActionSender};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::relation::{RelationResolver, RelationTable, SharedActiveContext};
use crate::repository::ViewModelRepository;
use crate::request::{BuiltRequest, FieldsetRegistry, FullListMap, RequestBuilder, SimplifiedModelRequest};
use crate::schema::{parse_schema, CompiledSchema};
use crate::store::{ChangeSummary, NormalizedStore, SlotCoordinator};
use crate::subscription::{
    ApplyReport, Delivery, DeliveryApplier, HttpTransport, SubscriptionChannel, SubscriptionHandle,
    Transport,
};
use crate::types::Record;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct SyncEngine {
    coordinator: Arc<SlotCoordinator>,
    store: Arc<NormalizedStore>,
    table: Arc<RelationTable>,
    context: Arc<SharedActiveContext>,
    resolver: Arc<RelationResolver>,
    repositories: BTreeMap<String, ViewModelRepository>,
    builder: Arc<RequestBuilder>,
    channel: SubscriptionChannel,
    actions: ActionGateway,
}

impl SyncEngine {
    pub fn new(schema: CompiledSchema, config: &SyncConfig, transport: Arc<dyn Transport>) -> Self {
        let coordinator = Arc::new(SlotCoordinator::new());
        let store = Arc::new(NormalizedStore::new(Arc::clone(&coordinator)));
        let table = Arc::new(schema.table);
        let context = Arc::new(SharedActiveContext::new());
        let resolver = Arc::new(RelationResolver::new(
            Arc::clone(&store),
            Arc::clone(&table),
            context.clone(),
        ));

        let mut fieldsets = FieldsetRegistry::new();
        let mut repositories = BTreeMap::new();
        for model in schema.models {
            let collection = model.collection().to_string();
            fieldsets.register(&collection, model.fieldsets());
            let repository = ViewModelRepository::new(
                model,
                Arc::clone(&resolver),
                config.repository.sort_debounce(),
            );
            coordinator.register_observer(&collection, repository.observer());
            repositories.insert(collection, repository);
        }

        let builder = Arc::new(RequestBuilder::new(Arc::clone(&table), Arc::new(fieldsets)));
        let applier = Arc::new(DeliveryApplier::new(Arc::clone(&store)));
        let channel = SubscriptionChannel::new(
            Arc::clone(&transport),
            Arc::clone(&builder),
            applier,
            &config.server.autoupdate_url(),
        );
        let actions = ActionGateway::new(Arc::new(HttpActionSender::new(
            transport,
            &config.server.action_url(),
        )));

        info!(
            collections = repositories.len(),
            relations = table.len(),
            "Sync engine ready"
        );
        Self {
            coordinator,
            store,
            table,
            context,
            resolver,
            repositories,
            builder,
            channel,
            actions,
        }
    }

    /// Load and compile a schema file, talking HTTP to the configured server.
    pub fn from_schema_file(path: &Path, config: &SyncConfig) -> Result<Self, SyncError> {
        let compiled = parse_schema(path)?.compile()?;
        let transport = Arc::new(HttpTransport::new(config.server.timeout()));
        Ok(Self::new(compiled, config, transport))
    }

    pub fn repository(&self, collection: &str) -> Option<&ViewModelRepository> {
        self.repositories.get(collection)
    }

    pub fn repositories(&self) -> impl Iterator<Item = &ViewModelRepository> {
        self.repositories.values()
    }

    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<SlotCoordinator> {
        &self.coordinator
    }

    pub fn relations(&self) -> &Arc<RelationTable> {
        &self.table
    }

    pub fn resolver(&self) -> &Arc<RelationResolver> {
        &self.resolver
    }

    /// Active context supplying default structured parameters.
    pub fn context(&self) -> &Arc<SharedActiveContext> {
        &self.context
    }

    pub fn actions(&self) -> &ActionGateway {
        &self.actions
    }

    pub fn subscription_channel(&self) -> &SubscriptionChannel {
        &self.channel
    }

    pub fn subscribe_modified(&self) -> broadcast::Receiver<Arc<ChangeSummary>> {
        self.coordinator.subscribe_modified()
    }

    pub fn build_request(&self, request: &SimplifiedModelRequest) -> Result<BuiltRequest, SyncError> {
        Ok(self.builder.build(request)?)
    }

    pub async fn fetch(&self, request: &SimplifiedModelRequest) -> Result<ApplyReport, SyncError> {
        self.channel.fetch(request).await
    }

    pub async fn subscribe(
        &self,
        request: &SimplifiedModelRequest,
    ) -> Result<SubscriptionHandle, SyncError> {
        self.channel.subscribe(request).await
    }

    /// Open a subscription for every collection that can request all of its
    /// models.
    pub async fn subscribe_full_lists(&self) -> Result<Vec<SubscriptionHandle>, SyncError> {
        let mut handles = Vec::new();
        for repository in self.repositories.values() {
            let Some(source) = repository.model().full_list_source() else {
                continue;
            };
            let request = source.full_list_request();
            handles.push(self.channel.subscribe(&request).await?);
        }
        Ok(handles)
    }

    /// Apply a delivery received outside of a subscription. No full-list
    /// relations apply.
    pub async fn apply_delivery(&self, delivery: &Delivery) -> Result<ApplyReport, SyncError> {
        self.channel
            .applier()
            .apply(delivery, &FullListMap::default())
            .await
    }

    /// Replace the store contents inside one update slot.
    pub async fn resync(&self, models: HashMap<String, Vec<Record>>) -> Result<(), SyncError> {
        let slot = self.coordinator.acquire_slot().await?;
        let stored = self.store.set(models);
        self.coordinator.commit(slot)?;
        stored?;
        info!(collections = self.store.collection_names().len(), "Resynchronized store");
        Ok(())
    }

    /// Close every subscription, abandon any open slot and empty the store.
    pub fn reset(&self) {
        self.channel.close_all();
        if self.coordinator.is_slot_open() {
            warn!("Resetting with an open update slot");
        }
        self.coordinator.drop_slot();
        self.store.clear();
        info!("Reset sync engine");
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("collections", &self.repositories.keys().collect::<Vec<_>>())
            .field("relations", &self.table.len())
            .field("subscriptions", &self.channel.active())
            .finish()
    }
}
