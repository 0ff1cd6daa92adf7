//! Mailbox manager state
//!
//! Manages one mailbox per account. Every account keeps its pending mutations
//! in its own row of a shared SQLite mutation database.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::backend::RemoteSource;
use crate::config::MailboxConfig;
use crate::sync::db::{MutationDatabase, SqliteMutationLog};
use crate::sync::engine::Mailbox;
use crate::types::error::SyncError;

/// Database file name inside the configured directory
pub const MUTATION_DB_FILE: &str = "mutations.db";

/// Mailbox manager state - manages mailboxes for multiple accounts
pub struct MailboxManager {
    mailboxes: RwLock<HashMap<String, Mailbox>>,
    db: Arc<MutationDatabase>,
    config: MailboxConfig,
}

impl MailboxManager {
    /// Create a manager storing mutation logs under the configured directory
    pub fn new(config: MailboxConfig) -> Result<Self, SyncError> {
        let db_dir = config.resolve_db_dir();
        std::fs::create_dir_all(&db_dir).map_err(|e| {
            SyncError::Io(format!("Failed to create mutation database directory: {}", e))
        })?;

        let db_path = db_dir.join(MUTATION_DB_FILE);
        info!("Mutation database path: {:?}", db_path);

        let db = MutationDatabase::new(&db_path)?;
        Ok(Self::with_database(Arc::new(db), config))
    }

    /// Create a manager on an existing database (in-memory for tests)
    pub fn with_database(db: Arc<MutationDatabase>, config: MailboxConfig) -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
            db,
            config,
        }
    }

    pub fn database(&self) -> Arc<MutationDatabase> {
        self.db.clone()
    }

    /// Path of the database file for a directory
    pub fn database_path(dir: &Path) -> PathBuf {
        dir.join(MUTATION_DB_FILE)
    }

    /// Get or open the mailbox for an account
    pub async fn open(&self, account_id: &str, remote: Arc<dyn RemoteSource>) -> Mailbox {
        // Check if mailbox exists
        {
            let mailboxes = self.mailboxes.read().await;
            if let Some(mailbox) = mailboxes.get(account_id) {
                return mailbox.clone();
            }
        }

        let mut mailboxes = self.mailboxes.write().await;
        // Another task may have opened it while we waited for the write lock
        if let Some(mailbox) = mailboxes.get(account_id) {
            return mailbox.clone();
        }

        info!("Opening mailbox for account: {}", account_id);

        let log = Arc::new(SqliteMutationLog::new(self.db.clone(), account_id));
        let mailbox = Mailbox::open(account_id, remote, log, self.config.clone());
        mailboxes.insert(account_id.to_string(), mailbox.clone());

        mailbox
    }

    /// Get mailbox for account (if open)
    pub async fn get(&self, account_id: &str) -> Option<Mailbox> {
        let mailboxes = self.mailboxes.read().await;
        mailboxes.get(account_id).cloned()
    }

    /// Get mailbox for account or fail
    pub async fn require(&self, account_id: &str) -> Result<Mailbox, SyncError> {
        self.get(account_id)
            .await
            .ok_or_else(|| SyncError::AccountNotFound(account_id.to_string()))
    }

    /// Close the mailbox for an account; with `forget`, also drop its
    /// pending mutations from the database
    pub async fn remove(&self, account_id: &str, forget: bool) -> Result<(), SyncError> {
        let removed = self.mailboxes.write().await.remove(account_id);
        if removed.is_some() {
            info!("Closed mailbox for account: {}", account_id);
        }

        if forget {
            self.db.delete_log(account_id)?;
        }
        Ok(())
    }

    /// Get all open account IDs
    pub async fn account_ids(&self) -> Vec<String> {
        let mailboxes = self.mailboxes.read().await;
        let mut ids: Vec<String> = mailboxes.keys().cloned().collect();
        ids.sort();
        ids
    }
}
