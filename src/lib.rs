//! Mailbox sync - optimistic mailbox synchronization engine
//!
//! Shows a remote-owned, periodically refreshed item list while applying
//! user actions (read, star, unstar, delete, archive) before the server
//! confirms them. Pending actions survive restarts and concurrent refreshes.
//!
//! ## Module Organization
//!
//! - `types/`: Remote items, merged views, filters and errors
//! - `backend/`: Remote source contract
//! - `sync/`: Mutation sets, merge, reconcile, persistence and the mailbox
//! - `services/`: View composition for the presentation layer
//! - `state/`: Per-account mailbox management
//! - `config/`: Configuration loading

pub mod backend;
pub mod config;
pub mod services;
pub mod state;
pub mod sync;
pub mod types;

use tracing_subscriber::EnvFilter;

pub use backend::RemoteSource;
pub use config::{BatchFailurePolicy, MailboxConfig};
pub use state::MailboxManager;
pub use sync::db::{MemoryMutationLog, PersistenceAdapter, SqliteMutationLog};
pub use sync::engine::{BatchOutcome, Mailbox, MailboxEvent, RefreshSummary};
pub use sync::merge::merge;
pub use sync::monitor::{RefreshMonitor, RefreshTrigger};
pub use sync::mutations::{MutationKind, MutationSetStore};
pub use sync::reconcile::reconcile;
pub use types::error::{Result, SyncError};
pub use types::{Folder, MergedView, RemoteItem, ViewFilter};

/// Install a fmt subscriber for tracing output.
///
/// In debug builds, defaults to debug level for this crate. Can be
/// overridden with the RUST_LOG environment variable. Returns false when a
/// global subscriber was already set.
pub fn init_logging() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailbox_sync=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
