//! View-Model Repository
//!
//! Per-collection cache of view-models, kept current by the update slot
//! coordinator's two-phase commit notification. Exposes three observables:
//! the unsorted raw list, the sorted and access-filtered list (recomputed at
//! most once per debounce window), and lazily created per-id observables.

pub mod model;
pub mod view_model;

pub use model::{compare_by_field, default_title, CollectionModel, FullListSource};
pub use view_model::ViewModel;

use crate::relation::RelationResolver;
use crate::store::SlotObserver;
use crate::types::Id;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Custom sort order installed on a repository
pub type Comparator = Arc<dyn Fn(&ViewModel, &ViewModel) -> Ordering + Send + Sync>;

/// Snapshot published through the list observables
pub type ModelList = Arc<Vec<ViewModel>>;

struct RepositoryState {
    model: Arc<dyn CollectionModel>,
    resolver: Arc<RelationResolver>,
    cache: RwLock<BTreeMap<Id, ViewModel>>,
    raw: watch::Sender<ModelList>,
    sorted: watch::Sender<ModelList>,
    per_id: Mutex<HashMap<Id, watch::Sender<Option<ViewModel>>>>,
    comparator: RwLock<Option<Comparator>>,
    sort_debounce: Duration,
    sort_scheduled: AtomicBool,
    sort_runs: AtomicU64,
}

impl RepositoryState {
    fn collection(&self) -> &str {
        self.model.collection()
    }

    fn snapshot(&self) -> Vec<ViewModel> {
        self.cache.read().values().cloned().collect()
    }

    fn sort_now(&self) {
        let comparator = self.comparator.read().clone();
        let mut models: Vec<ViewModel> = self
            .snapshot()
            .into_iter()
            .filter(|model| self.model.is_accessible(model))
            .collect();
        match comparator {
            Some(compare) => models.sort_by(|a, b| compare(a, b)),
            None => models.sort_by(|a, b| self.model.compare(a, b)),
        }
        let runs = self.sort_runs.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        trace!(
            collection = self.collection(),
            models = models.len(),
            runs,
            "Recomputed sorted list"
        );
        self.sorted.send_replace(Arc::new(models));
    }

    /// Recompute the sorted list now, or once at the end of the debounce
    /// window when one is configured.
    fn schedule_sort(self: &Arc<Self>) {
        if self.sort_debounce.is_zero() {
            self.sort_now();
            return;
        }
        if self.sort_scheduled.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let state = Arc::clone(self);
                handle.spawn(async move {
                    tokio::time::sleep(state.sort_debounce).await;
                    state.sort_scheduled.store(false, AtomicOrdering::SeqCst);
                    state.sort_now();
                });
            }
            Err(_) => {
                self.sort_scheduled.store(false, AtomicOrdering::SeqCst);
                self.sort_now();
            }
        }
    }
}

/// Commit notifications for one repository
struct RepositoryObserver(Arc<RepositoryState>);

impl SlotObserver for RepositoryObserver {
    fn evict(&self, ids: &BTreeSet<Id>) {
        let mut cache = self.0.cache.write();
        for id in ids {
            cache.remove(id);
        }
    }

    fn rebuild(&self, ids: &BTreeSet<Id>) {
        let state = &self.0;
        let store = state.resolver.store();
        let collection = state.collection();
        let mut cache = state.cache.write();
        for id in ids {
            let rebuilt = store
                .get(collection, *id)
                .and_then(|record| state.resolver.view_model(collection, record));
            match rebuilt {
                Some(model) => {
                    cache.insert(*id, model);
                }
                None => {
                    cache.remove(id);
                }
            }
        }
    }

    fn publish(&self, ids: &BTreeSet<Id>) {
        let state = &self.0;
        let (raw, touched): (Vec<ViewModel>, Vec<(Id, Option<ViewModel>)>) = {
            let cache = state.cache.read();
            (
                cache.values().cloned().collect(),
                ids.iter().map(|id| (*id, cache.get(id).cloned())).collect(),
            )
        };
        state.raw.send_replace(Arc::new(raw));

        {
            let mut per_id = state.per_id.lock();
            per_id.retain(|_, sender| sender.receiver_count() > 0);
            for (id, model) in touched {
                if let Some(sender) = per_id.get(&id) {
                    sender.send_replace(model);
                }
            }
        }

        debug!(
            collection = state.collection(),
            touched = ids.len(),
            "Published repository update"
        );
        state.schedule_sort();
    }
}

/// Live view-model cache of one collection
#[derive(Clone)]
pub struct ViewModelRepository {
    inner: Arc<RepositoryState>,
}

impl ViewModelRepository {
    pub fn new(
        model: Arc<dyn CollectionModel>,
        resolver: Arc<RelationResolver>,
        sort_debounce: Duration,
    ) -> Self {
        let (raw, _) = watch::channel(Arc::new(Vec::new()));
        let (sorted, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(RepositoryState {
                model,
                resolver,
                cache: RwLock::new(BTreeMap::new()),
                raw,
                sorted,
                per_id: Mutex::new(HashMap::new()),
                comparator: RwLock::new(None),
                sort_debounce,
                sort_scheduled: AtomicBool::new(false),
                sort_runs: AtomicU64::new(0),
            }),
        }
    }

    /// Observer to register with the slot coordinator for this collection.
    pub fn observer(&self) -> Arc<dyn SlotObserver> {
        Arc::new(RepositoryObserver(Arc::clone(&self.inner)))
    }

    pub fn collection(&self) -> &str {
        self.inner.collection()
    }

    pub fn model(&self) -> &Arc<dyn CollectionModel> {
        &self.inner.model
    }

    pub fn get(&self, id: Id) -> Option<ViewModel> {
        self.inner.cache.read().get(&id).cloned()
    }

    /// All cached view-models, ascending by id.
    pub fn get_all(&self) -> Vec<ViewModel> {
        self.inner.snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn title(&self, model: &ViewModel) -> String {
        self.inner.model.title(model)
    }

    /// Latest sorted and access-filtered list.
    pub fn sorted(&self) -> ModelList {
        self.inner.sorted.borrow().clone()
    }

    /// Unsorted list of every cached view-model, published on each commit.
    pub fn subscribe_raw(&self) -> watch::Receiver<ModelList> {
        self.inner.raw.subscribe()
    }

    pub fn subscribe_sorted(&self) -> watch::Receiver<ModelList> {
        self.inner.sorted.subscribe()
    }

    /// Observable for one id, created on first subscription.
    pub fn subscribe(&self, id: Id) -> watch::Receiver<Option<ViewModel>> {
        let mut per_id = self.inner.per_id.lock();
        per_id
            .entry(id)
            .or_insert_with(|| watch::channel(self.get(id)).0)
            .subscribe()
    }

    /// Install a custom sort order and recompute the sorted list.
    pub fn set_comparator<F>(&self, compare: F)
    where
        F: Fn(&ViewModel, &ViewModel) -> Ordering + Send + Sync + 'static,
    {
        *self.inner.comparator.write() = Some(Arc::new(compare));
        self.inner.sort_now();
    }

    /// Number of sorted-list recomputations so far.
    pub fn sort_runs(&self) -> u64 {
        self.inner.sort_runs.load(AtomicOrdering::SeqCst)
    }
}
