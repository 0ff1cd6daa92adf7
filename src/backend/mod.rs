//! Remote source abstraction
//!
//! The mailbox engine never talks to a server directly. It is handed a
//! `RemoteSource` that lists the current items and confirms one mutation
//! per call. Retry and backoff belong to the implementation behind this trait.

use async_trait::async_trait;

use crate::sync::mutations::MutationKind;
use crate::types::error::SyncError;
use crate::types::RemoteItem;

/// Authoritative backend for one mailbox
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the current item list. Identifiers must be unique.
    async fn fetch_list(&self) -> Result<Vec<RemoteItem>, SyncError>;

    async fn mark_read(&self, id: &str) -> Result<(), SyncError>;

    async fn star(&self, id: &str) -> Result<(), SyncError>;

    async fn unstar(&self, id: &str) -> Result<(), SyncError>;

    async fn delete(&self, id: &str) -> Result<(), SyncError>;

    async fn archive(&self, id: &str) -> Result<(), SyncError>;

    /// Route a mutation to its endpoint
    async fn confirm(&self, id: &str, kind: MutationKind) -> Result<(), SyncError> {
        match kind {
            MutationKind::MarkRead => self.mark_read(id).await,
            MutationKind::Star => self.star(id).await,
            MutationKind::Unstar => self.unstar(id).await,
            MutationKind::Delete => self.delete(id).await,
            MutationKind::Archive => self.archive(id).await,
        }
    }
}
