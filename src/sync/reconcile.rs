//! Reconciler
//!
//! Retires pending mutations the remote source has caught up with. The
//! reconciled store is always a subset of its input, so a refresh can never
//! bring back an overlay the user already moved past.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::sync::mutations::{MutationKind, MutationSetStore};
use crate::types::RemoteItem;

/// Drop every pending entry the fresh snapshot already confirms.
///
/// Flag kinds are confirmed by the remote flag matching the intent.
/// `Delete` and `Archive` are confirmed by the item no longer being listed.
pub fn reconcile(remote_items: &[RemoteItem], sets: &MutationSetStore) -> MutationSetStore {
    let by_id: HashMap<&str, &RemoteItem> = remote_items
        .iter()
        .map(|item| (item.id.as_str(), item))
        .collect();

    let mut reconciled = sets.clone();

    for kind in MutationKind::ALL {
        for id in sets.ids(kind) {
            if is_confirmed(kind, by_id.get(id).copied()) {
                debug!("Server confirmed {} for {}", kind, id);
                reconciled.remove(kind, id);
            }
        }
    }

    reconciled
}

fn is_confirmed(kind: MutationKind, remote: Option<&RemoteItem>) -> bool {
    match (kind, remote) {
        (MutationKind::MarkRead, Some(item)) => !item.unread,
        (MutationKind::Star, Some(item)) => item.starred,
        (MutationKind::Unstar, Some(item)) => !item.starred,
        (MutationKind::Delete | MutationKind::Archive, remote) => remote.is_none(),
        (_, None) => false,
    }
}

/// Tracks flag mutations whose target keeps missing from the snapshot
///
/// Entries for `MarkRead`, `Star` and `Unstar` can only be confirmed by a
/// remote flag, so a target that was purged server-side would stay pending
/// forever. After `limit` consecutive refreshes without the id, its flag
/// entries are dropped. Session-local; counts restart after a reload.
#[derive(Debug, Clone, Default)]
pub struct StaleTargets {
    limit: u32,
    misses: HashMap<String, u32>,
}

impl StaleTargets {
    /// `limit` of 0 disables eviction
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            misses: HashMap::new(),
        }
    }

    /// Count one refresh and return the store with stale flag entries removed
    /// together with the ids that were dropped
    pub fn sweep(
        &mut self,
        remote_items: &[RemoteItem],
        sets: &MutationSetStore,
    ) -> (MutationSetStore, Vec<String>) {
        let listed: HashSet<&str> = remote_items.iter().map(|item| item.id.as_str()).collect();

        let flag_targets: HashSet<&str> = MutationKind::ALL
            .iter()
            .filter(|kind| !kind.hides_item())
            .flat_map(|kind| sets.ids(*kind))
            .collect();

        // Forget ids that are listed again or no longer pending
        self.misses
            .retain(|id, _| flag_targets.contains(id.as_str()) && !listed.contains(id.as_str()));

        let mut swept = sets.clone();
        let mut dropped = Vec::new();

        if self.limit == 0 {
            return (swept, dropped);
        }

        for id in flag_targets {
            if listed.contains(id) {
                continue;
            }

            let misses = self.misses.entry(id.to_string()).or_insert(0);
            *misses += 1;

            if *misses >= self.limit {
                for kind in MutationKind::ALL.iter().filter(|k| !k.hides_item()) {
                    swept.remove(*kind, id);
                }
                self.misses.remove(id);
                dropped.push(id.to_string());
            }
        }

        dropped.sort();
        (swept, dropped)
    }

    /// Consecutive refreshes the id has been missing from
    pub fn misses(&self, id: &str) -> u32 {
        self.misses.get(id).copied().unwrap_or(0)
    }
}
