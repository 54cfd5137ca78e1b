//! Update Slot Coordinator
//!
//! Serializes "apply a batch of changes" operations against the normalized
//! store. At most one slot is open at a time; acquirers queue in FIFO order.
//! Store mutations made while a slot is open are recorded into it and
//! published to observers in one two-phase notification on commit.

use crate::error::SlotError;
use crate::types::Id;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

/// Capacity of the store-wide modified signal.
const MODIFIED_CHANNEL_CAPACITY: usize = 256;

/// Changed and deleted ids per collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub changed: BTreeMap<String, BTreeSet<Id>>,
    pub deleted: BTreeMap<String, BTreeSet<Id>>,
}

impl ChangeSummary {
    pub fn record_changed<I: IntoIterator<Item = Id>>(&mut self, collection: &str, ids: I) {
        let ids: BTreeSet<Id> = ids.into_iter().collect();
        if ids.is_empty() {
            return;
        }
        if let Some(deleted) = self.deleted.get_mut(collection) {
            deleted.retain(|id| !ids.contains(id));
            if deleted.is_empty() {
                self.deleted.remove(collection);
            }
        }
        self.changed
            .entry(collection.to_string())
            .or_default()
            .extend(ids);
    }

    pub fn record_deleted<I: IntoIterator<Item = Id>>(&mut self, collection: &str, ids: I) {
        let ids: BTreeSet<Id> = ids.into_iter().collect();
        if ids.is_empty() {
            return;
        }
        if let Some(changed) = self.changed.get_mut(collection) {
            changed.retain(|id| !ids.contains(id));
            if changed.is_empty() {
                self.changed.remove(collection);
            }
        }
        self.deleted
            .entry(collection.to_string())
            .or_default()
            .extend(ids);
    }

    /// Fold a later summary into this one; later entries win.
    pub fn merge(&mut self, other: ChangeSummary) {
        for (collection, ids) in other.deleted {
            self.record_deleted(&collection, ids);
        }
        for (collection, ids) in other.changed {
            self.record_changed(&collection, ids);
        }
    }

    /// Ids of a collection touched in any way.
    pub fn touched(&self, collection: &str) -> BTreeSet<Id> {
        let mut ids = self.changed.get(collection).cloned().unwrap_or_default();
        if let Some(deleted) = self.deleted.get(collection) {
            ids.extend(deleted.iter().copied());
        }
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Receives the two-phase commit notification for one collection.
pub trait SlotObserver: Send + Sync {
    /// Phase 1: drop cached entries for deleted ids.
    fn evict(&self, ids: &BTreeSet<Id>);
    /// Phase 1: rebuild cached entries for changed ids from the store.
    fn rebuild(&self, ids: &BTreeSet<Id>);
    /// Phase 2: publish observables for every id touched by the commit.
    fn publish(&self, ids: &BTreeSet<Id>);
}

/// Token for the open update slot. Only the holder can commit it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "an update slot must be committed or dropped, or later acquirers wait forever"]
pub struct UpdateSlot {
    id: u64,
}

impl UpdateSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug)]
struct OpenSlot {
    id: u64,
    changes: ChangeSummary,
}

#[derive(Debug, Default)]
struct SlotState {
    current: Option<OpenSlot>,
    next_id: u64,
    waiters: VecDeque<oneshot::Sender<UpdateSlot>>,
}

impl SlotState {
    fn open(&mut self) -> UpdateSlot {
        self.next_id += 1;
        self.current = Some(OpenSlot {
            id: self.next_id,
            changes: ChangeSummary::default(),
        });
        UpdateSlot { id: self.next_id }
    }

    fn current_id(&self) -> Option<u64> {
        self.current.as_ref().map(|slot| slot.id)
    }

    /// Hand a fresh slot to the first waiter still listening.
    fn serve_next(&mut self) {
        while let Some(waiter) = self.waiters.pop_front() {
            let slot = self.open();
            match waiter.send(slot) {
                Ok(()) => return,
                Err(abandoned) => {
                    debug!(slot = abandoned.id, "Acquirer went away, skipping");
                    self.current = None;
                }
            }
        }
    }
}

/// Pending queue entry; hands an already delivered slot back on cancellation.
struct QueuedAcquire<'a> {
    coordinator: &'a SlotCoordinator,
    receiver: Option<oneshot::Receiver<UpdateSlot>>,
}

impl Drop for QueuedAcquire<'_> {
    fn drop(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.close();
            if let Ok(slot) = receiver.try_recv() {
                self.coordinator.release_unclaimed(slot);
            }
        }
    }
}

/// Coordinates update slots and fans commits out to registered observers.
pub struct SlotCoordinator {
    state: Mutex<SlotState>,
    observers: RwLock<BTreeMap<String, Arc<dyn SlotObserver>>>,
    modified: broadcast::Sender<Arc<ChangeSummary>>,
}

impl SlotCoordinator {
    pub fn new() -> Self {
        let (modified, _) = broadcast::channel(MODIFIED_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(SlotState::default()),
            observers: RwLock::new(BTreeMap::new()),
            modified,
        }
    }

    /// Register the observer for a collection, replacing any previous one.
    pub fn register_observer(&self, collection: &str, observer: Arc<dyn SlotObserver>) {
        self.observers
            .write()
            .insert(collection.to_string(), observer);
    }

    pub fn has_observer(&self, collection: &str) -> bool {
        self.observers.read().contains_key(collection)
    }

    /// Store-wide modified signal, fired once per commit (or per mutation
    /// when no slot is open).
    pub fn subscribe_modified(&self) -> broadcast::Receiver<Arc<ChangeSummary>> {
        self.modified.subscribe()
    }

    pub fn is_slot_open(&self) -> bool {
        self.state.lock().current.is_some()
    }

    /// Number of acquirers waiting for the open slot.
    pub fn queued(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Acquire the update slot, waiting in FIFO order while another is open.
    /// Cancelling the returned future never leaves a slot open.
    pub async fn acquire_slot(&self) -> Result<UpdateSlot, SlotError> {
        let receiver = {
            let mut state = self.state.lock();
            if state.current.is_none() {
                let slot = state.open();
                debug!(slot = slot.id, "Opened update slot");
                return Ok(slot);
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            debug!(
                current = ?state.current_id(),
                queued = state.waiters.len(),
                "Update slot busy, queued"
            );
            receiver
        };

        let mut queued = QueuedAcquire {
            coordinator: self,
            receiver: Some(receiver),
        };
        let result = match queued.receiver.as_mut() {
            Some(receiver) => receiver.await,
            None => return Err(SlotError::Closed),
        };
        queued.receiver = None;

        let slot = result.map_err(|_| SlotError::Closed)?;
        debug!(slot = slot.id, "Opened queued update slot");
        Ok(slot)
    }

    /// Release a slot that was handed to an acquirer which went away.
    fn release_unclaimed(&self, slot: UpdateSlot) {
        let mut state = self.state.lock();
        if state.current_id() == Some(slot.id) {
            debug!(slot = slot.id, "Acquirer cancelled, passing slot on");
            state.current = None;
            state.serve_next();
        }
    }

    /// Commit the open slot: notify observers in two phases, fire the
    /// modified signal and hand the slot to the next waiter.
    pub fn commit(&self, slot: UpdateSlot) -> Result<(), SlotError> {
        {
            let state = self.state.lock();
            let current = state.current_id();
            if current != Some(slot.id) {
                return Err(SlotError::InvalidSlot {
                    slot: slot.id,
                    current,
                });
            }
        }

        // Observers may cause further mutations; drain until quiet.
        loop {
            let changes = {
                let mut state = self.state.lock();
                match state.current.as_mut() {
                    Some(open) if open.id == slot.id => std::mem::take(&mut open.changes),
                    _ => break,
                }
            };
            if changes.is_empty() {
                break;
            }
            self.dispatch(changes);
        }

        let mut state = self.state.lock();
        if state.current_id() == Some(slot.id) {
            state.current = None;
            debug!(slot = slot.id, "Committed update slot");
            state.serve_next();
        }
        Ok(())
    }

    /// Abandon the open slot without notifying, then serve the next waiter.
    pub fn drop_slot(&self) {
        let mut state = self.state.lock();
        if let Some(open) = state.current.take() {
            warn!(
                slot = open.id,
                dropped_changes = !open.changes.is_empty(),
                "Dropped update slot without commit"
            );
        }
        state.serve_next();
    }

    /// Record a store mutation: into the open slot, or published right away.
    pub(crate) fn record(&self, changes: ChangeSummary) {
        if changes.is_empty() {
            return;
        }
        let immediate = {
            let mut state = self.state.lock();
            match state.current.as_mut() {
                Some(open) => {
                    open.changes.merge(changes);
                    None
                }
                None => Some(changes),
            }
        };
        if let Some(changes) = immediate {
            self.dispatch(changes);
        }
    }

    fn dispatch(&self, changes: ChangeSummary) {
        let observers: Vec<(String, Arc<dyn SlotObserver>)> = self
            .observers
            .read()
            .iter()
            .map(|(collection, observer)| (collection.clone(), Arc::clone(observer)))
            .collect();

        // Phase 1: every eviction and rebuild, across all collections.
        for (collection, observer) in &observers {
            if let Some(ids) = changes.deleted.get(collection) {
                observer.evict(ids);
            }
            if let Some(ids) = changes.changed.get(collection) {
                observer.rebuild(ids);
            }
        }

        // Phase 2: publication, once the whole cache is consistent.
        for (collection, observer) in &observers {
            let touched = changes.touched(collection);
            if !touched.is_empty() {
                observer.publish(&touched);
            }
        }

        let _ = self.modified.send(Arc::new(changes));
    }
}

impl Default for SlotCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
