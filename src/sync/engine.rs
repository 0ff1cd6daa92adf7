//! Mailbox sync engine
//!
//! Owns the pending mutation sets of one account and coordinates user actions
//! with the remote source:
//! - Applies mutations optimistically before the network call
//! - Persists the pending sets after every change (best effort)
//! - Reverts on network failure
//! - Reconciles pending sets against each fresh remote snapshot
//!
//! The store is only ever written here. A refresh feeds new remote items and
//! can shrink the store through the reconciler, never grow it, so a refresh
//! racing a user action cannot bring back a stale overlay.

use chrono::{DateTime, Utc};
use flume::{Receiver, Sender};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::backend::RemoteSource;
use crate::config::{BatchFailurePolicy, MailboxConfig};
use crate::services::view::{self, FolderCounts};
use crate::sync::db::{PersistedMutationLog, PersistenceAdapter};
use crate::sync::merge::merge;
use crate::sync::monitor::RefreshTrigger;
use crate::sync::mutations::{AppliedMutation, MutationFamily, MutationKind, MutationSetStore};
use crate::sync::reconcile::{reconcile, StaleTargets};
use crate::types::error::SyncError;
use crate::types::{MergedView, RemoteItem, ViewFilter};

/// Event emitted by a mailbox
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum MailboxEvent {
    /// Mutations were applied locally and are waiting on the network
    Applied { kind: MutationKind, ids: Vec<String> },
    /// The remote source accepted a mutation call
    Confirmed { kind: MutationKind, id: String },
    /// Optimistic changes were undone after a failed call
    Reverted {
        kind: MutationKind,
        ids: Vec<String>,
        error: SyncError,
    },
    /// A fresh snapshot was merged
    Refreshed {
        items: usize,
        retired: usize,
        stale: Vec<String>,
    },
    RefreshFailed { error: SyncError },
    PersistenceFailed { error: SyncError },
}

/// Result of a batch action
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Ids whose network call succeeded
    pub succeeded: Vec<String>,
    /// Ids whose optimistic change was undone
    pub reverted: Vec<String>,
    /// Ids whose call was never issued because the batch was abandoned
    pub skipped: Vec<String>,
    pub failures: Vec<(String, SyncError)>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of a refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSummary {
    pub items: usize,
    /// Pending entries retired by reconciliation
    pub retired: usize,
    /// Ids whose flag mutations were dropped as stale
    pub stale: Vec<String>,
}

/// One optimistic insertion and the generation that owns its slot
#[derive(Debug, Clone)]
struct PendingApply {
    applied: AppliedMutation,
    generation: u64,
}

/// Unsettled applies on one (family, id) slot
#[derive(Debug, Clone)]
struct SlotClaim {
    /// Generation of the newest apply; only it may roll the slot back
    generation: u64,
    /// Slot membership to restore when the newest apply fails
    baseline: Option<MutationKind>,
    /// Generation of the newest confirmed apply folded into `baseline`
    baseline_generation: u64,
    in_flight: usize,
}

struct MailboxState {
    items: Vec<RemoteItem>,
    store: MutationSetStore,
    /// Claims live from the first apply on a slot until its last call settles
    slots: HashMap<(MutationFamily, String), SlotClaim>,
    next_generation: u64,
    stale: StaleTargets,
    last_refresh: Option<DateTime<Utc>>,
}

impl MailboxState {
    /// Release one call's hold on its slot, returning the claim as it was
    fn release(&mut self, kind: MutationKind, pending: &PendingApply) -> Option<SlotClaim> {
        let slot = (kind.family(), pending.applied.id.clone());
        let claim = self.slots.get_mut(&slot)?;
        claim.in_flight = claim.in_flight.saturating_sub(1);
        let released = claim.clone();
        if released.in_flight == 0 {
            self.slots.remove(&slot);
        }
        Some(released)
    }
}

struct MailboxInner {
    account_id: String,
    config: MailboxConfig,
    remote: Arc<dyn RemoteSource>,
    log: Arc<dyn PersistenceAdapter>,
    state: RwLock<MailboxState>,
    subscribers: Mutex<Vec<Sender<MailboxEvent>>>,
    refresh_trigger: Mutex<Option<Sender<RefreshTrigger>>>,
}

/// Optimistic mailbox for one account. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Mailbox {
    inner: Arc<MailboxInner>,
}

impl Mailbox {
    /// Open a mailbox, restoring pending mutations from the log.
    ///
    /// A missing log starts empty. An unreadable log is logged and also
    /// starts empty; it is overwritten by the next change.
    pub fn open(
        account_id: impl Into<String>,
        remote: Arc<dyn RemoteSource>,
        log: Arc<dyn PersistenceAdapter>,
        config: MailboxConfig,
    ) -> Self {
        let account_id = account_id.into();
        let store = load_store(&account_id, log.as_ref());

        info!(
            "Opened mailbox for account {} with {} pending mutations",
            account_id,
            store.total()
        );

        let state = MailboxState {
            items: Vec::new(),
            store,
            slots: HashMap::new(),
            next_generation: 0,
            stale: StaleTargets::new(config.stale_refresh_limit),
            last_refresh: None,
        };

        Self {
            inner: Arc::new(MailboxInner {
                account_id,
                config,
                remote,
                log,
                state: RwLock::new(state),
                subscribers: Mutex::new(Vec::new()),
                refresh_trigger: Mutex::new(None),
            }),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.inner.config
    }

    /// Receive events for this mailbox
    pub fn subscribe(&self) -> Receiver<MailboxEvent> {
        let (tx, rx) = flume::unbounded();
        match self.inner.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(tx),
            Err(e) => error!("Failed to register mailbox subscriber: {}", e),
        }
        rx
    }

    /// Route forced refresh requests to a monitor
    pub fn attach_refresh_trigger(&self, tx: Sender<RefreshTrigger>) {
        if let Ok(mut trigger) = self.inner.refresh_trigger.lock() {
            *trigger = Some(tx);
        }
    }

    // ========== Views ==========

    /// Latest remote snapshot with pending mutations overlaid
    pub async fn merged(&self) -> Vec<MergedView> {
        let state = self.inner.state.read().await;
        merge(&state.items, &state.store)
    }

    /// Merged view narrowed by user filters
    pub async fn view(&self, filter: &ViewFilter) -> Vec<MergedView> {
        view::compose(self.merged().await, filter)
    }

    pub async fn counts(&self) -> FolderCounts {
        view::folder_counts(&self.merged().await)
    }

    /// Snapshot of the pending sets
    pub async fn pending(&self) -> MutationSetStore {
        self.inner.state.read().await.store.clone()
    }

    pub async fn is_pending(&self, id: &str, kind: MutationKind) -> bool {
        self.inner.state.read().await.store.contains(kind, id)
    }

    /// Latest remote snapshot as fetched
    pub async fn remote_items(&self) -> Vec<RemoteItem> {
        self.inner.state.read().await.items.clone()
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.state.read().await.last_refresh
    }

    // ========== Mutations ==========

    /// Apply a mutation to one item.
    ///
    /// The change is visible in `merged()` and persisted before the network
    /// call is issued. On network failure the change is reverted and the
    /// error returned.
    pub async fn apply(&self, id: &str, kind: MutationKind) -> Result<(), SyncError> {
        let ids = vec![id.to_string()];
        let pending = self.begin(&ids, kind).await;

        match self.inner.remote.confirm(id, kind).await {
            Ok(()) => {
                info!("Confirmed {} for {}", kind, id);
                self.settle(kind, &pending).await;
                self.emit(MailboxEvent::Confirmed {
                    kind,
                    id: id.to_string(),
                });
                self.schedule_confirm_refresh();
                Ok(())
            }
            Err(e) => {
                warn!("{} failed for {}: {}", kind, id, e);
                self.rollback(kind, &pending, &e).await;
                Err(e)
            }
        }
    }

    /// Apply a mutation to several items as one state transition, then
    /// confirm each id in order.
    ///
    /// With `AllOrNothing`, the first failure stops the batch and reverts
    /// every id, including ids whose call already succeeded. With `PerItem`,
    /// every call is issued and only failed ids are reverted.
    pub async fn apply_batch(&self, ids: &[String], kind: MutationKind) -> BatchOutcome {
        let mut seen: HashSet<&String> = HashSet::new();
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect();

        let mut outcome = BatchOutcome::default();
        if ids.is_empty() {
            return outcome;
        }

        let policy = self.inner.config.batch_failure_policy;
        let pending = self.begin(&ids, kind).await;

        for (index, id) in ids.iter().enumerate() {
            match self.inner.remote.confirm(id, kind).await {
                Ok(()) => {
                    debug!("Confirmed {} for {} (batch)", kind, id);
                    outcome.succeeded.push(id.clone());
                    self.emit(MailboxEvent::Confirmed {
                        kind,
                        id: id.clone(),
                    });
                }
                Err(e) => {
                    warn!("{} failed for {} (batch): {}", kind, id, e);
                    outcome.failures.push((id.clone(), e));
                    if policy == BatchFailurePolicy::AllOrNothing {
                        outcome.skipped = ids[index + 1..].to_vec();
                        break;
                    }
                }
            }
        }

        let Some((_, first_error)) = outcome.failures.first().cloned() else {
            self.settle(kind, &pending).await;
            self.schedule_confirm_refresh();
            return outcome;
        };

        let (to_revert, confirmed): (Vec<PendingApply>, Vec<PendingApply>) = match policy {
            BatchFailurePolicy::AllOrNothing => (pending, Vec::new()),
            BatchFailurePolicy::PerItem => {
                let succeeded: HashSet<&str> =
                    outcome.succeeded.iter().map(String::as_str).collect();
                pending
                    .into_iter()
                    .partition(|p| !succeeded.contains(p.applied.id.as_str()))
            }
        };

        info!(
            "Reverting {} of {} ids after batch {} failure",
            to_revert.len(),
            ids.len(),
            kind
        );
        self.settle(kind, &confirmed).await;
        outcome.reverted = self.rollback(kind, &to_revert, &first_error).await;

        if !confirmed.is_empty() {
            self.schedule_confirm_refresh();
        }

        outcome
    }

    /// Insert the mutations and persist, all under one write guard
    async fn begin(&self, ids: &[String], kind: MutationKind) -> Vec<PendingApply> {
        let pending = {
            let mut state = self.inner.state.write().await;

            let pending: Vec<PendingApply> = ids
                .iter()
                .map(|id| {
                    let baseline = state.store.pending_in(kind.family(), id);
                    let applied = state.store.apply(id, kind);
                    state.next_generation += 1;
                    let generation = state.next_generation;

                    // A slot with calls still in flight keeps its oldest baseline
                    let claim = state
                        .slots
                        .entry((kind.family(), id.clone()))
                        .or_insert(SlotClaim {
                            generation,
                            baseline,
                            baseline_generation: 0,
                            in_flight: 0,
                        });
                    claim.generation = generation;
                    claim.in_flight += 1;

                    if !state.items.iter().any(|item| &item.id == id) {
                        debug!("{} applied to {} which is not in the latest snapshot", kind, id);
                    }

                    PendingApply {
                        applied,
                        generation,
                    }
                })
                .collect();

            self.persist(&state.store);
            pending
        };

        debug!("Applied {} optimistically to {} ids", kind, ids.len());
        self.emit(MailboxEvent::Applied {
            kind,
            ids: ids.to_vec(),
        });

        pending
    }

    /// Record successful calls: their kind becomes what a later failure on
    /// the same slot falls back to
    async fn settle(&self, kind: MutationKind, pending: &[PendingApply]) {
        if pending.is_empty() {
            return;
        }

        let mut state = self.inner.state.write().await;
        for p in pending {
            let slot = (kind.family(), p.applied.id.clone());
            if let Some(claim) = state.slots.get_mut(&slot) {
                if p.generation > claim.baseline_generation {
                    claim.baseline = Some(kind);
                    claim.baseline_generation = p.generation;
                }
            }
            state.release(kind, p);
        }
    }

    /// Roll failed calls back to the slot membership from before the first
    /// unsettled apply, unless a newer apply owns the slot.
    /// Returns the ids that were reverted.
    async fn rollback(
        &self,
        kind: MutationKind,
        pending: &[PendingApply],
        cause: &SyncError,
    ) -> Vec<String> {
        let reverted = {
            let mut state = self.inner.state.write().await;
            let mut reverted = Vec::new();

            for p in pending {
                let id = &p.applied.id;
                let Some(claim) = state.release(kind, p) else {
                    continue;
                };

                if claim.generation != p.generation {
                    debug!(
                        "Skipping revert of {} for {}: superseded by a newer action",
                        kind, id
                    );
                    continue;
                }

                if !state.store.contains(kind, id) {
                    debug!("Skipping revert of {} for {}: already retired", kind, id);
                    continue;
                }

                state.store.restore(id, kind.family(), claim.baseline);
                reverted.push(id.clone());
            }

            if !reverted.is_empty() {
                self.persist(&state.store);
            }
            reverted
        };

        if !reverted.is_empty() {
            info!("Reverted {} for {} ids", kind, reverted.len());
            self.emit(MailboxEvent::Reverted {
                kind,
                ids: reverted.clone(),
                error: cause.clone(),
            });
        }

        reverted
    }

    // ========== Refresh ==========

    /// Fetch a fresh snapshot and reconcile pending mutations against it
    pub async fn refresh(&self) -> Result<RefreshSummary, SyncError> {
        let items = match self.inner.remote.fetch_list().await {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    "Refresh failed for account {}: {}",
                    self.inner.account_id, e
                );
                self.emit(MailboxEvent::RefreshFailed { error: e.clone() });
                return Err(e);
            }
        };

        let summary = {
            let mut state = self.inner.state.write().await;

            let reconciled = reconcile(&items, &state.store);
            let (swept, stale) = state.stale.sweep(&items, &reconciled);
            let retired = state.store.total() - reconciled.total();

            if !stale.is_empty() {
                warn!(
                    "Dropping pending flag mutations for {} ids missing from the last {} refreshes",
                    stale.len(),
                    self.inner.config.stale_refresh_limit
                );
            }

            let changed = swept != state.store;
            state.store = swept;
            state.items = items;
            state.last_refresh = Some(Utc::now());

            if changed {
                self.persist(&state.store);
            }

            RefreshSummary {
                items: state.items.len(),
                retired,
                stale,
            }
        };

        info!(
            "Refreshed account {}: {} items, {} mutations confirmed",
            self.inner.account_id, summary.items, summary.retired
        );
        self.emit(MailboxEvent::Refreshed {
            items: summary.items,
            retired: summary.retired,
            stale: summary.stale.clone(),
        });

        Ok(summary)
    }

    // ========== Helpers ==========

    /// Write the store to the log; failures are logged, never returned
    fn persist(&self, store: &MutationSetStore) {
        let result = PersistedMutationLog::from_store(&self.inner.account_id, store)
            .to_json()
            .and_then(|payload| self.inner.log.save(&payload));

        if let Err(e) = result {
            warn!(
                "Failed to persist pending mutations for account {}: {}",
                self.inner.account_id, e
            );
            self.emit(MailboxEvent::PersistenceFailed { error: e });
        }
    }

    fn emit(&self, event: MailboxEvent) {
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn schedule_confirm_refresh(&self) {
        let Some(delay) = self.inner.config.confirm_refresh_delay() else {
            return;
        };
        let tx = match self.inner.refresh_trigger.lock() {
            Ok(trigger) => trigger.clone(),
            Err(_) => None,
        };
        let Some(tx) = tx else {
            return;
        };

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(RefreshTrigger::Forced).is_err() {
                debug!("Refresh monitor gone, dropping forced refresh");
            }
        });
    }
}

fn load_store(account_id: &str, log: &dyn PersistenceAdapter) -> MutationSetStore {
    let payload = match log.load() {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            debug!("No mutation log for account {}, starting empty", account_id);
            return MutationSetStore::new();
        }
        Err(e) => {
            warn!(
                "Failed to load mutation log for account {}: {}",
                account_id, e
            );
            return MutationSetStore::new();
        }
    };

    match PersistedMutationLog::from_json(&payload) {
        Ok(log) => {
            if log.account_id != account_id {
                warn!(
                    "Mutation log was written for account {}, loading it for {}",
                    log.account_id, account_id
                );
            }
            log.into_store()
        }
        Err(e) => {
            warn!(
                "Discarding unreadable mutation log for account {}: {}",
                account_id, e
            );
            MutationSetStore::new()
        }
    }
}
