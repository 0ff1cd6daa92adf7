//! Pending mutation sets
//!
//! Records, per mutation kind, the identifiers the user changed locally that
//! the remote source has not confirmed yet. Pure data, no I/O.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Kinds of user mutations the engine can apply optimistically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    MarkRead,
    Star,
    Unstar,
    Delete,
    Archive,
}

/// Kinds sharing a family compete for the same slot of an identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationFamily {
    Read,
    Star,
    Visibility,
}

impl MutationKind {
    pub const ALL: [MutationKind; 5] = [
        MutationKind::MarkRead,
        MutationKind::Star,
        MutationKind::Unstar,
        MutationKind::Delete,
        MutationKind::Archive,
    ];

    /// Get the kind string used in logs and the persisted log
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkRead => "mark_read",
            Self::Star => "star",
            Self::Unstar => "unstar",
            Self::Delete => "delete",
            Self::Archive => "archive",
        }
    }

    pub fn family(&self) -> MutationFamily {
        match self {
            Self::MarkRead => MutationFamily::Read,
            Self::Star | Self::Unstar => MutationFamily::Star,
            Self::Delete | Self::Archive => MutationFamily::Visibility,
        }
    }

    /// The kind an insertion of `self` evicts for the same identifier
    pub fn counterpart(&self) -> Option<MutationKind> {
        match self {
            Self::MarkRead => None,
            Self::Star => Some(Self::Unstar),
            Self::Unstar => Some(Self::Star),
            Self::Delete => Some(Self::Archive),
            Self::Archive => Some(Self::Delete),
        }
    }

    /// Whether a pending mutation of this kind hides the item from the view
    pub fn hides_item(&self) -> bool {
        matches!(self, Self::Delete | Self::Archive)
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one optimistic insertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMutation {
    pub id: String,
    pub kind: MutationKind,
    /// The id was already pending under `kind` before this apply
    pub was_pending: bool,
    /// The counterpart kind the id was evicted from, if it was there
    pub evicted: Option<MutationKind>,
}

/// Mapping from mutation kind to the set of ids with that change pending
///
/// Invariant: an id never sits in both kinds of a family
/// (Star/Unstar, Delete/Archive).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationSetStore {
    sets: BTreeMap<MutationKind, HashSet<String>>,
}

impl MutationSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: MutationKind, id: &str) -> bool {
        self.sets.get(&kind).is_some_and(|set| set.contains(id))
    }

    /// Pending ids for a kind
    pub fn ids(&self, kind: MutationKind) -> impl Iterator<Item = &str> {
        self.sets
            .get(&kind)
            .into_iter()
            .flat_map(|set| set.iter().map(|s| s.as_str()))
    }

    pub fn len(&self, kind: MutationKind) -> usize {
        self.sets.get(&kind).map_or(0, |set| set.len())
    }

    pub fn total(&self) -> usize {
        self.sets.values().map(|set| set.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Whether the id is pending a view-hiding mutation
    pub fn is_hidden(&self, id: &str) -> bool {
        self.contains(MutationKind::Delete, id) || self.contains(MutationKind::Archive, id)
    }

    /// Record a pending mutation, evicting the id from the counterpart set
    pub fn apply(&mut self, id: &str, kind: MutationKind) -> AppliedMutation {
        let evicted = kind
            .counterpart()
            .filter(|counterpart| self.remove(*counterpart, id));
        let was_pending = !self.insert(kind, id);

        AppliedMutation {
            id: id.to_string(),
            kind,
            was_pending,
            evicted,
        }
    }

    /// The kind of `family` the id is pending under, if any
    pub fn pending_in(&self, family: MutationFamily, id: &str) -> Option<MutationKind> {
        MutationKind::ALL
            .into_iter()
            .find(|kind| kind.family() == family && self.contains(*kind, id))
    }

    /// Reset the id's slot in `family` to exactly `kind`, or to nothing
    pub fn restore(&mut self, id: &str, family: MutationFamily, kind: Option<MutationKind>) {
        for other in MutationKind::ALL {
            if other.family() == family && Some(other) != kind {
                self.remove(other, id);
            }
        }
        if let Some(kind) = kind {
            self.insert(kind, id);
        }
    }

    /// Insert without eviction. Returns false when already present.
    pub(crate) fn insert(&mut self, kind: MutationKind, id: &str) -> bool {
        self.sets.entry(kind).or_default().insert(id.to_string())
    }

    /// Remove an id from one kind. Returns true when it was present.
    pub fn remove(&mut self, kind: MutationKind, id: &str) -> bool {
        let Some(set) = self.sets.get_mut(&kind) else {
            return false;
        };
        let removed = set.remove(id);
        if set.is_empty() {
            self.sets.remove(&kind);
        }
        removed
    }

    /// True when every pending entry here is also pending in `other`
    pub fn is_subset_of(&self, other: &MutationSetStore) -> bool {
        self.sets.iter().all(|(kind, set)| {
            set.iter().all(|id| other.contains(*kind, id))
        })
    }

    /// All pending entries as sorted `(kind, ids)` pairs, empty kinds omitted
    pub fn to_sorted(&self) -> BTreeMap<MutationKind, Vec<String>> {
        self.sets
            .iter()
            .filter(|(_, set)| !set.is_empty())
            .map(|(kind, set)| {
                let mut ids: Vec<String> = set.iter().cloned().collect();
                ids.sort();
                (*kind, ids)
            })
            .collect()
    }

    /// Rebuild a store from `(kind, ids)` pairs, restoring family exclusivity.
    /// When a persisted log holds an id under both kinds of a family, the
    /// kind listed later in `MutationKind::ALL` wins.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (MutationKind, Vec<S>)>,
        S: AsRef<str>,
    {
        let mut grouped: BTreeMap<MutationKind, Vec<S>> = BTreeMap::new();
        for (kind, ids) in entries {
            grouped.entry(kind).or_default().extend(ids);
        }

        let mut store = Self::new();
        for (kind, ids) in grouped {
            for id in ids {
                store.apply(id.as_ref(), kind);
            }
        }
        store
    }
}
