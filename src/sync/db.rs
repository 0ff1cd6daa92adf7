//! Durable storage for pending mutations
//!
//! The mutation log is a snapshot of the pending sets, rewritten after every
//! change and read once when a mailbox opens. Adapters store an opaque
//! payload; the JSON layout lives in `PersistedMutationLog`.

use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::sync::mutations::{MutationKind, MutationSetStore};
use crate::types::error::SyncError;

/// Database connection pool type
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Current layout version of the persisted log
pub const LOG_VERSION: u32 = 1;

/// Narrow storage contract for one mailbox's mutation log
pub trait PersistenceAdapter: Send + Sync {
    /// Overwrite the stored payload
    fn save(&self, payload: &str) -> Result<(), SyncError>;

    /// Read the stored payload; `None` on first run
    fn load(&self) -> Result<Option<String>, SyncError>;
}

/// Serialized snapshot of a `MutationSetStore`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedMutationLog {
    pub version: u32,
    pub account_id: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub sets: BTreeMap<MutationKind, Vec<String>>,
}

impl PersistedMutationLog {
    pub fn from_store(account_id: &str, store: &MutationSetStore) -> Self {
        Self {
            version: LOG_VERSION,
            account_id: account_id.to_string(),
            saved_at: Utc::now(),
            sets: store.to_sorted(),
        }
    }

    pub fn into_store(self) -> MutationSetStore {
        MutationSetStore::from_entries(self.sets)
    }

    pub fn to_json(&self) -> Result<String, SyncError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self, SyncError> {
        let log: Self = serde_json::from_str(payload)?;
        if log.version > LOG_VERSION {
            return Err(SyncError::Parse(format!(
                "Unsupported mutation log version {}",
                log.version
            )));
        }
        Ok(log)
    }
}

/// In-process adapter for ephemeral mailboxes and tests
#[derive(Debug, Default)]
pub struct MemoryMutationLog {
    payload: Mutex<Option<String>>,
}

impl MemoryMutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the adapter with a payload, as if written by an earlier session
    pub fn with_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: Mutex::new(Some(payload.into())),
        }
    }
}

impl PersistenceAdapter for MemoryMutationLog {
    fn save(&self, payload: &str) -> Result<(), SyncError> {
        let mut guard = self
            .payload
            .lock()
            .map_err(|e| SyncError::Persistence(format!("Failed to lock mutation log: {}", e)))?;
        *guard = Some(payload.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Option<String>, SyncError> {
        let guard = self
            .payload
            .lock()
            .map_err(|e| SyncError::Persistence(format!("Failed to lock mutation log: {}", e)))?;
        Ok(guard.clone())
    }
}

/// SQLite database holding the mutation logs of every account
pub struct MutationDatabase {
    pool: DbPool,
}

impl MutationDatabase {
    /// Create a new database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, SyncError> {
        let manager = SqliteConnectionManager::file(path);
        let pool = Pool::builder().max_size(4).build(manager).map_err(|e| {
            SyncError::Database(format!("Failed to create database pool: {}", e))
        })?;

        let db = Self { pool };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, SyncError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager).map_err(|e| {
            SyncError::Database(format!("Failed to create database pool: {}", e))
        })?;

        let db = Self { pool };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn connection(&self) -> Result<DbConnection, SyncError> {
        self.pool.get().map_err(|e| {
            SyncError::Database(format!("Failed to get database connection: {}", e))
        })
    }

    fn initialize_schema(&self) -> Result<(), SyncError> {
        let conn = self.connection()?;

        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;

            -- One snapshot of pending mutations per account
            CREATE TABLE IF NOT EXISTS pending_mutations (
                account_id TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
        )
        .map_err(|e| SyncError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Overwrite the mutation log for an account
    pub fn upsert_log(&self, account_id: &str, payload: &str) -> Result<(), SyncError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO pending_mutations (account_id, payload, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(account_id) DO UPDATE SET
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![account_id, payload, Utc::now().to_rfc3339()],
        )?;

        debug!("Saved mutation log for account {}", account_id);
        Ok(())
    }

    pub fn get_log(&self, account_id: &str) -> Result<Option<String>, SyncError> {
        let conn = self.connection()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM pending_mutations WHERE account_id = ?1",
                params![account_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(payload)
    }

    pub fn delete_log(&self, account_id: &str) -> Result<bool, SyncError> {
        let conn = self.connection()?;
        let deleted = conn.execute(
            "DELETE FROM pending_mutations WHERE account_id = ?1",
            params![account_id],
        )?;

        if deleted > 0 {
            info!("Deleted mutation log for account {}", account_id);
        }
        Ok(deleted > 0)
    }

    pub fn account_ids(&self) -> Result<Vec<String>, SyncError> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT account_id FROM pending_mutations ORDER BY account_id")?;

        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(ids)
    }
}

/// Per-account view of a shared `MutationDatabase`
pub struct SqliteMutationLog {
    db: std::sync::Arc<MutationDatabase>,
    account_id: String,
}

impl SqliteMutationLog {
    pub fn new(db: std::sync::Arc<MutationDatabase>, account_id: impl Into<String>) -> Self {
        Self {
            db,
            account_id: account_id.into(),
        }
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }
}

impl PersistenceAdapter for SqliteMutationLog {
    fn save(&self, payload: &str) -> Result<(), SyncError> {
        self.db
            .upsert_log(&self.account_id, payload)
            .map_err(|e| SyncError::Persistence(e.to_string()))
    }

    fn load(&self) -> Result<Option<String>, SyncError> {
        self.db
            .get_log(&self.account_id)
            .map_err(|e| SyncError::Persistence(e.to_string()))
    }
}
