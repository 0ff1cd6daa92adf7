//! View composition
//!
//! Applies folder and search filters to the merged view. Knows nothing about
//! pending mutations; it only sees already-merged items.

use serde::{Deserialize, Serialize};

use crate::types::{Folder, MergedView, ViewFilter};

/// Item counts shown next to the well-known folders
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderCounts {
    pub inbox: usize,
    pub unread: usize,
    pub starred: usize,
}

/// Filter merged items, preserving their order
pub fn compose(merged: Vec<MergedView>, filter: &ViewFilter) -> Vec<MergedView> {
    let needle = filter
        .search_text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_lowercase);

    merged
        .into_iter()
        .filter(|item| in_folder(item, &filter.folder))
        .filter(|item| match &needle {
            Some(needle) => matches_search(item, needle),
            None => true,
        })
        .collect()
}

/// Count inbox, unread and starred items
pub fn folder_counts(merged: &[MergedView]) -> FolderCounts {
    merged.iter().fold(FolderCounts::default(), |mut counts, item| {
        if in_folder(item, &Folder::Inbox) {
            counts.inbox += 1;
        }
        if in_folder(item, &Folder::Unread) {
            counts.unread += 1;
        }
        if in_folder(item, &Folder::Starred) {
            counts.starred += 1;
        }
        counts
    })
}

/// Whether an item belongs in a folder. Server-deleted items never do.
pub fn in_folder(item: &MergedView, folder: &Folder) -> bool {
    if item.deleted {
        return false;
    }

    match folder {
        Folder::Inbox => !item.archived,
        Folder::Unread => item.unread && !item.archived,
        Folder::Starred => item.starred,
        Folder::Label(label) => item.has_label(label),
    }
}

/// `needle` must already be lowercased
fn matches_search(item: &MergedView, needle: &str) -> bool {
    [&item.subject, &item.sender, &item.snippet]
        .iter()
        .any(|field| field.to_lowercase().contains(needle))
}
