//! Subscription Channel
//!
//! Fetches or streams deliveries for built requests and applies them to the
//! normalized store. Applying is serialized by a global mutex and wrapped in
//! an update slot, so a delivery is observed by all repositories at once.

pub mod decode;
pub mod transport;

pub use decode::{decode_delivery, DecodedDelivery, Delivery};
pub use transport::{split_deliveries, DeliveryStream, HttpTransport, Transport};

use crate::error::{SyncError, TransportError};
use crate::key;
use crate::relation::IdField;
use crate::request::{FullListMap, RequestBuilder, SimplifiedModelRequest};
use crate::store::NormalizedStore;
use crate::types::{id_list, record_id, Id, Record};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Outcome of applying one delivery
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub changed: usize,
    pub deleted: usize,
    /// Ids removed because a full-list relation no longer lists them.
    pub implicitly_deleted: BTreeMap<String, BTreeSet<Id>>,
    /// Collections without a registered repository, whose records were dropped.
    pub dropped_collections: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

/// Applies decoded deliveries to the store, one at a time.
pub struct DeliveryApplier {
    store: Arc<NormalizedStore>,
    apply_lock: tokio::sync::Mutex<()>,
}

impl DeliveryApplier {
    pub fn new(store: Arc<NormalizedStore>) -> Self {
        Self {
            store,
            apply_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Decode and apply a flat delivery. A malformed key fails the whole
    /// delivery before anything is applied.
    pub async fn apply(
        &self,
        delivery: &Delivery,
        full_lists: &FullListMap,
    ) -> Result<ApplyReport, SyncError> {
        let decoded = decode_delivery(delivery).map_err(|err| {
            error!(error = %err, fields = delivery.len(), "Failed to decode delivery");
            err
        })?;
        self.apply_decoded(decoded, full_lists).await
    }

    pub async fn apply_decoded(
        &self,
        mut decoded: DecodedDelivery,
        full_lists: &FullListMap,
    ) -> Result<ApplyReport, SyncError> {
        let _guard = self.apply_lock.lock().await;
        let coordinator = Arc::clone(self.store.coordinator());

        let mut dropped = BTreeSet::new();
        decoded.changed.retain(|collection, _| {
            let registered = coordinator.has_observer(collection);
            if !registered {
                dropped.insert(collection.clone());
            }
            registered
        });
        decoded.deleted.retain(|collection, _| {
            let registered = coordinator.has_observer(collection);
            if !registered {
                dropped.insert(collection.clone());
            }
            registered
        });
        for collection in &dropped {
            warn!(
                error = %SyncError::UnregisteredCollection(collection.clone()),
                "Dropping records of unregistered collection"
            );
        }

        let implicit = self.implicit_deletions(&decoded, full_lists);
        for (collection, ids) in &implicit {
            decoded
                .deleted
                .entry(collection.clone())
                .or_default()
                .extend(ids.iter().copied());
        }

        let changed = decoded.changed_count();
        let deleted = decoded.deleted_count();

        let slot = coordinator.acquire_slot().await?;
        for (collection, ids) in &decoded.deleted {
            let ids: Vec<Id> = ids.iter().copied().collect();
            self.store.remove(collection, &ids);
        }
        let mut stored = Ok(());
        for (collection, records) in decoded.changed {
            let records: Vec<Record> = records.into_values().collect();
            if let Err(err) = self.store.add_or_update(&collection, records) {
                stored = Err(err);
                break;
            }
        }
        coordinator.commit(slot)?;
        stored?;

        debug!(changed, deleted, implicit = implicit.len(), "Applied delivery");
        Ok(ApplyReport {
            changed,
            deleted,
            implicitly_deleted: implicit,
            dropped_collections: dropped.into_iter().collect(),
            applied_at: Utc::now(),
        })
    }

    /// Ids of full-list collections missing from every owner's id list once
    /// this delivery is merged over the stored owners. Only runs when the
    /// delivery carries the owning field. Ids changed by the same delivery
    /// are kept.
    fn implicit_deletions(
        &self,
        decoded: &DecodedDelivery,
        full_lists: &FullListMap,
    ) -> BTreeMap<String, BTreeSet<Id>> {
        let mut implicit: BTreeMap<String, BTreeSet<Id>> = BTreeMap::new();
        for (owner, id_field, foreign) in full_lists.iter() {
            let Some(records) = decoded.changed.get(owner) else {
                continue;
            };
            if listed_ids(records.values(), id_field).is_none() {
                continue;
            }
            let owners = self.merged_owners(owner, records, decoded.deleted.get(owner));
            let Some(listed) = listed_ids(owners.values(), id_field) else {
                continue;
            };
            let incoming = decoded.changed.get(foreign);
            let missing: BTreeSet<Id> = self
                .store
                .ids(foreign)
                .into_iter()
                .filter(|id| !listed.contains(id))
                .filter(|id| !incoming.is_some_and(|records| records.contains_key(id)))
                .collect();
            if !missing.is_empty() {
                debug!(
                    owner,
                    id_field,
                    foreign,
                    missing = missing.len(),
                    "Implicit deletions from full-list relation"
                );
                implicit.entry(foreign.to_string()).or_default().extend(missing);
            }
        }
        implicit
    }

    /// Stored owner records with the delivery's partial records merged over
    /// them, minus owners deleted by the same delivery.
    fn merged_owners(
        &self,
        owner: &str,
        incoming: &BTreeMap<Id, Record>,
        deleted: Option<&BTreeSet<Id>>,
    ) -> BTreeMap<Id, Record> {
        let mut owners: BTreeMap<Id, Record> = self
            .store
            .get_all(owner)
            .into_iter()
            .filter_map(|record| record_id(&record).map(|id| (id, Record::clone(&record))))
            .collect();
        for (id, record) in incoming {
            let merged = owners.entry(*id).or_default();
            for (field, value) in record {
                merged.insert(field.clone(), value.clone());
            }
        }
        if let Some(deleted) = deleted {
            owners.retain(|id, _| !deleted.contains(id));
        }
        owners
    }
}

/// Union of the ids listed in `id_field` across the owner records carrying
/// it. A structured template matches every effective field. `None` when no
/// record carries the field.
fn listed_ids<'a>(records: impl Iterator<Item = &'a Record>, id_field: &str) -> Option<BTreeSet<Id>> {
    let template = match IdField::parse(id_field) {
        Ok(IdField::Structured { prefix, suffix, .. }) if key::is_template_field(id_field) => {
            Some((prefix, suffix))
        }
        _ => None,
    };

    let mut listed: Option<BTreeSet<Id>> = None;
    for record in records {
        let values: Vec<&Value> = match &template {
            Some((prefix, suffix)) => record
                .iter()
                .filter(|(field, _)| key::extract_parameter(prefix, suffix, field).is_some())
                .map(|(_, value)| value)
                .collect(),
            None => record.get(id_field).into_iter().collect(),
        };
        for value in values {
            listed.get_or_insert_with(BTreeSet::new).extend(id_list(value));
        }
    }
    listed
}

/// Event reported by a streaming subscription
#[derive(Debug)]
pub enum SubscriptionEvent {
    Applied(ApplyReport),
    Error(SyncError),
    Ended,
}

struct ActiveSubscription {
    collection: String,
    abort: AbortHandle,
}

type Registry = Arc<Mutex<BTreeMap<u64, ActiveSubscription>>>;

/// Handle to a streaming subscription. Closing (or dropping) it stops future
/// deliveries; committed deliveries stay applied.
pub struct SubscriptionHandle {
    id: u64,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    task: JoinHandle<()>,
    registry: Registry,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next applied delivery, error or end-of-stream.
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Stop the subscription; same as dropping the handle.
    pub fn close(self) {}

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(subscription) = self.registry.lock().remove(&self.id) {
            info!(
                subscription = self.id,
                collection = %subscription.collection,
                "Closed subscription"
            );
        }
    }
}

/// One-shot and streaming access to the autoupdate endpoint
pub struct SubscriptionChannel {
    transport: Arc<dyn Transport>,
    builder: Arc<RequestBuilder>,
    applier: Arc<DeliveryApplier>,
    autoupdate_url: String,
    registry: Registry,
    next_id: AtomicU64,
}

impl SubscriptionChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        builder: Arc<RequestBuilder>,
        applier: Arc<DeliveryApplier>,
        autoupdate_url: &str,
    ) -> Self {
        Self {
            transport,
            builder,
            applier,
            autoupdate_url: autoupdate_url.to_string(),
            registry: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn applier(&self) -> &Arc<DeliveryApplier> {
        &self.applier
    }

    /// Build, request once, apply the single response.
    pub async fn fetch(&self, request: &SimplifiedModelRequest) -> Result<ApplyReport, SyncError> {
        let built = self.builder.build(request)?;
        let body = serde_json::to_value(&built.request).map_err(TransportError::from)?;
        let url = format!("{}?single=1", self.autoupdate_url);

        let delivery = match self.transport.post(&url, body).await? {
            Value::Object(delivery) => delivery,
            other => {
                return Err(TransportError::UnexpectedPayload(format!(
                    "expected a JSON object delivery, found {}",
                    other
                ))
                .into())
            }
        };
        self.applier.apply(&delivery, &built.full_lists).await
    }

    /// Build, open a stream and apply every delivery in a background task.
    pub async fn subscribe(
        &self,
        request: &SimplifiedModelRequest,
    ) -> Result<SubscriptionHandle, SyncError> {
        let built = self.builder.build(request)?;
        let body = serde_json::to_value(&built.request).map_err(TransportError::from)?;
        let mut stream = self.transport.open_stream(&self.autoupdate_url, body).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (events_tx, events) = mpsc::unbounded_channel();
        let applier = Arc::clone(&self.applier);
        let registry = Arc::clone(&self.registry);
        let full_lists = built.full_lists;
        let collection = request.collection.clone();

        // Held until the entry is registered so a fast stream end cannot race it.
        let mut subscriptions = self.registry.lock();
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(delivery) => match applier.apply(&delivery, &full_lists).await {
                        Ok(report) => SubscriptionEvent::Applied(report),
                        Err(err) => SubscriptionEvent::Error(err),
                    },
                    Err(err) => {
                        error!(subscription = id, error = %err, "Subscription stream error");
                        SubscriptionEvent::Error(err.into())
                    }
                };
                let _ = events_tx.send(event);
            }
            let _ = events_tx.send(SubscriptionEvent::Ended);
            if registry.lock().remove(&id).is_some() {
                info!(subscription = id, "Subscription stream ended");
            }
        });
        subscriptions.insert(
            id,
            ActiveSubscription {
                collection: collection.clone(),
                abort: task.abort_handle(),
            },
        );
        drop(subscriptions);

        info!(subscription = id, collection = %collection, "Opened subscription");
        Ok(SubscriptionHandle {
            id,
            events,
            task,
            registry: Arc::clone(&self.registry),
        })
    }

    /// Ids of the currently open subscriptions.
    pub fn active(&self) -> Vec<u64> {
        self.registry.lock().keys().copied().collect()
    }

    /// Stop every open subscription.
    pub fn close_all(&self) {
        let closed = std::mem::take(&mut *self.registry.lock());
        for (id, subscription) in closed {
            subscription.abort.abort();
            info!(
                subscription = id,
                collection = %subscription.collection,
                "Closed subscription"
            );
        }
    }
}
