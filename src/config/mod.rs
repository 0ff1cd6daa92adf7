use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::types::error::SyncError;

/// What to do with the rest of a batch when one confirmation fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchFailurePolicy {
    /// Stop at the first failure and revert every id in the batch
    #[default]
    AllOrNothing,
    /// Issue every call and revert only the ids whose call failed
    PerItem,
}

/// Mailbox engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxConfig {
    /// Interval between scheduled refreshes, in seconds
    pub poll_interval_seconds: u64,

    /// Delay before the forced refresh requested after a confirmed mutation.
    /// `None` or 0 disables the forced refresh.
    pub confirm_refresh_delay_ms: Option<u64>,

    /// Consecutive refreshes a flag mutation target may be missing from
    /// before its pending entry is dropped (0 = never)
    pub stale_refresh_limit: u32,

    pub batch_failure_policy: BatchFailurePolicy,

    /// Directory holding the per-account mutation logs
    pub db_dir: Option<PathBuf>,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            confirm_refresh_delay_ms: Some(1500),
            stale_refresh_limit: 3,
            batch_failure_policy: BatchFailurePolicy::default(),
            db_dir: None,
        }
    }
}

impl MailboxConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.max(1))
    }

    pub fn confirm_refresh_delay(&self) -> Option<Duration> {
        self.confirm_refresh_delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Resolve the mutation log directory, falling back to the platform data dir
    pub fn resolve_db_dir(&self) -> PathBuf {
        if let Some(dir) = &self.db_dir {
            return dir.clone();
        }

        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailbox-sync")
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // XDG config path
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailbox-sync").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(
            home_dir
                .join(".config")
                .join("mailbox-sync")
                .join("config.toml"),
        );
    }

    paths
}

/// Load configuration from the first default path that exists
pub fn load_default_config() -> Result<MailboxConfig, SyncError> {
    for path in default_config_paths() {
        if path.exists() {
            info!("Found config at: {:?}", path);
            return load_config(&path);
        }
    }

    info!("No config file found, using defaults");
    Ok(MailboxConfig::default())
}

/// Load configuration from a specific path
pub fn load_config(path: &Path) -> Result<MailboxConfig, SyncError> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

    parse_config(&content)
}

/// Parse configuration from TOML text
pub fn parse_config(content: &str) -> Result<MailboxConfig, SyncError> {
    toml::from_str(content)
        .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, MailboxConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(60));
        assert_eq!(
            config.confirm_refresh_delay(),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.batch_failure_policy, BatchFailurePolicy::AllOrNothing);
    }

    #[test]
    fn test_partial_config() {
        let config = parse_config(
            r#"
            poll_interval_seconds = 15
            stale_refresh_limit = 0
            batch_failure_policy = "per_item"
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval_seconds, 15);
        assert_eq!(config.stale_refresh_limit, 0);
        assert_eq!(config.batch_failure_policy, BatchFailurePolicy::PerItem);
        assert_eq!(config.confirm_refresh_delay_ms, Some(1500));
    }

    #[test]
    fn test_invalid_config_is_config_error() {
        let err = parse_config("poll_interval_seconds = \"soon\"").unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "db_dir = \"/tmp/mailboxes\"").unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.resolve_db_dir(), PathBuf::from("/tmp/mailboxes"));
    }
}
