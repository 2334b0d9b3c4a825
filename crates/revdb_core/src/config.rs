//! Datastore configuration.

use crate::crypto::EncryptionKey;

/// Configuration for opening datastores.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the datastore directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to sync the revision log after every committed group.
    pub sync_on_commit: bool,

    /// Full scans examining more documents than this log a warning.
    pub scan_warning_threshold: usize,

    /// Maximum number of change entries returned by one `changes_since` call
    /// when the caller passes no limit.
    pub default_changes_limit: usize,

    /// Key sealing the revision log. `None` stores it in the clear.
    pub encryption_key: Option<EncryptionKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_commit: true,
            scan_warning_threshold: 10_000,
            default_changes_limit: 1_000,
            encryption_key: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create missing datastores.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the full-scan warning threshold.
    #[must_use]
    pub const fn scan_warning_threshold(mut self, docs: usize) -> Self {
        self.scan_warning_threshold = docs;
        self
    }

    /// Sets the default page size for change listings.
    #[must_use]
    pub const fn default_changes_limit(mut self, limit: usize) -> Self {
        self.default_changes_limit = limit;
        self
    }

    /// Sets the encryption key.
    #[must_use]
    pub fn encryption_key(mut self, key: Option<EncryptionKey>) -> Self {
        self.encryption_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_commit);
        assert_eq!(config.scan_warning_threshold, 10_000);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn builder() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .scan_warning_threshold(5)
            .default_changes_limit(10)
            .encryption_key(Some(EncryptionKey::from_bytes(&[1u8; 32]).unwrap()));
        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.scan_warning_threshold, 5);
        assert_eq!(config.default_changes_limit, 10);
        assert!(format!("{config:?}").contains("REDACTED"));
    }
}
