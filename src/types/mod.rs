pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authoritative snapshot of one mailbox item as listed by the remote source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub subject: String,
    pub sender: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Label / folder membership as reported by the server
    #[serde(default)]
    pub labels: Vec<String>,
    pub unread: bool,
    pub starred: bool,
    /// Server-observed membership, not pending intent
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub deleted: bool,
}

impl RemoteItem {
    /// Minimal item with empty content fields, handy for adapters and tests
    pub fn new(id: impl Into<String>, unread: bool, starred: bool) -> Self {
        Self {
            id: id.into(),
            subject: String::new(),
            sender: String::new(),
            snippet: String::new(),
            body: None,
            timestamp: Utc::now(),
            labels: Vec::new(),
            unread,
            starred,
            archived: false,
            deleted: false,
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Rendering-ready item: a remote item with pending mutations overlaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedView {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub snippet: String,
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub labels: Vec<String>,
    pub unread: bool,
    pub starred: bool,
    pub archived: bool,
    pub deleted: bool,
    /// True when at least one flag differs from the remote snapshot
    /// because of an unconfirmed local mutation
    pub pending: bool,
}

impl From<&RemoteItem> for MergedView {
    fn from(item: &RemoteItem) -> Self {
        Self {
            id: item.id.clone(),
            subject: item.subject.clone(),
            sender: item.sender.clone(),
            snippet: item.snippet.clone(),
            body: item.body.clone(),
            timestamp: item.timestamp,
            labels: item.labels.clone(),
            unread: item.unread,
            starred: item.starred,
            archived: item.archived,
            deleted: item.deleted,
            pending: false,
        }
    }
}

impl MergedView {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }
}

/// Folder selection for the composed view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    #[default]
    Inbox,
    Starred,
    Unread,
    /// Any other label identifier
    Label(String),
}

impl Folder {
    /// Parse the folder names used by the presentation layer.
    /// Anything that is not a well-known folder is a label id.
    pub fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "inbox" => Folder::Inbox,
            "starred" => Folder::Starred,
            "unread" => Folder::Unread,
            _ => Folder::Label(name.to_string()),
        }
    }
}

/// User-facing filters applied on top of the merged view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewFilter {
    /// Case-insensitive match against subject, sender and snippet
    #[serde(default)]
    pub search_text: Option<String>,
    #[serde(default)]
    pub folder: Folder,
}

impl ViewFilter {
    pub fn folder(folder: Folder) -> Self {
        Self {
            search_text: None,
            folder,
        }
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search_text = Some(text.into());
        self
    }
}
