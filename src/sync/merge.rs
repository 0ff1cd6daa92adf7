//! Merge engine
//!
//! Overlays pending mutations onto the latest remote snapshot. Pure and
//! deterministic; safe to run on every render.

use crate::sync::mutations::{MutationKind, MutationSetStore};
use crate::types::{MergedView, RemoteItem};

/// Overlay `sets` onto `remote_items`.
///
/// Items pending `Delete` or `Archive` are dropped. Every other item appears
/// once, in input order, with `unread` forced off by `MarkRead` and
/// `starred` forced by `Star` / `Unstar`. Pending ids with no remote item
/// are ignored here and left in the store.
pub fn merge(remote_items: &[RemoteItem], sets: &MutationSetStore) -> Vec<MergedView> {
    remote_items
        .iter()
        .filter(|item| !sets.is_hidden(&item.id))
        .map(|item| overlay(item, sets))
        .collect()
}

fn overlay(item: &RemoteItem, sets: &MutationSetStore) -> MergedView {
    let mut view = MergedView::from(item);

    if sets.contains(MutationKind::MarkRead, &item.id) {
        view.unread = false;
    }

    if sets.contains(MutationKind::Star, &item.id) {
        view.starred = true;
    } else if sets.contains(MutationKind::Unstar, &item.id) {
        view.starred = false;
    }

    view.pending = view.unread != item.unread || view.starred != item.starred;
    view
}
