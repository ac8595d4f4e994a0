//! Configuration for the offline client.

use std::path::PathBuf;
use std::time::Duration;

/// Default API base URL.
pub const DEFAULT_BASE_URL: &str = "http://localhost:1337";

/// Default database name.
pub const DEFAULT_DB_NAME: &str = "restaurant-db";

/// Configuration for an [`OfflineClient`](crate::OfflineClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Database name.
    pub db_name: String,
    /// Database version to open.
    pub db_version: u32,
    /// Per-request network timeout. `None` waits indefinitely.
    pub network_timeout: Option<Duration>,
    /// Journal file for the local store. `None` keeps data in memory only.
    pub journal_path: Option<PathBuf>,
    /// Flush the journal to disk on every commit.
    pub sync_on_commit: bool,
    /// Number of raw GET responses kept by the HTTP fallback cache.
    /// Zero disables it.
    pub response_cache_capacity: u64,
    /// Queue replay behavior.
    pub replay: ReplayConfig,
}

impl ClientConfig {
    /// Creates a configuration for the given API base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            db_name: DEFAULT_DB_NAME.to_string(),
            db_version: 1,
            network_timeout: Some(Duration::from_secs(10)),
            journal_path: None,
            sync_on_commit: true,
            response_cache_capacity: 256,
            replay: ReplayConfig::default(),
        }
    }

    /// Sets the database name.
    pub fn with_db_name(mut self, name: impl Into<String>) -> Self {
        self.db_name = name.into();
        self
    }

    /// Sets the database version.
    pub fn with_db_version(mut self, version: u32) -> Self {
        self.db_version = version;
        self
    }

    /// Sets the per-request network timeout.
    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = Some(timeout);
        self
    }

    /// Disables the network timeout.
    pub fn without_network_timeout(mut self) -> Self {
        self.network_timeout = None;
        self
    }

    /// Persists the local store to a journal file.
    pub fn with_journal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.journal_path = Some(path.into());
        self
    }

    /// Sets whether commits are flushed to disk immediately.
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the fallback response cache capacity.
    pub fn with_response_cache_capacity(mut self, capacity: u64) -> Self {
        self.response_cache_capacity = capacity;
        self
    }

    /// Sets the replay configuration.
    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

/// Configuration for offline queue replay.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Replay automatically when connectivity comes back.
    pub on_reconnect: bool,
    /// Maximum records attempted per pass. `None` drains the whole queue.
    pub max_records: Option<usize>,
}

impl ReplayConfig {
    /// Creates the default replay configuration.
    pub fn new() -> Self {
        Self {
            on_reconnect: true,
            max_records: None,
        }
    }

    /// Sets whether a reconnect triggers a replay.
    pub fn with_on_reconnect(mut self, enabled: bool) -> Self {
        self.on_reconnect = enabled;
        self
    }

    /// Bounds the number of records attempted per pass.
    pub fn with_max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_restaurant_server() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "http://localhost:1337");
        assert_eq!(config.db_name, "restaurant-db");
        assert_eq!(config.db_version, 1);
        assert!(config.journal_path.is_none());
        assert!(config.replay.on_reconnect);
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = ClientConfig::new("http://api.test/");
        assert_eq!(config.base_url, "http://api.test");
    }

    #[test]
    fn builder_methods() {
        let config = ClientConfig::default()
            .with_db_name("test-db")
            .with_db_version(2)
            .without_network_timeout()
            .with_replay(ReplayConfig::new().with_max_records(5).with_on_reconnect(false));
        assert_eq!(config.db_name, "test-db");
        assert_eq!(config.db_version, 2);
        assert!(config.network_timeout.is_none());
        assert_eq!(config.replay.max_records, Some(5));
        assert!(!config.replay.on_reconnect);
    }
}
