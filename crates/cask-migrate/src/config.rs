//! Runner configuration.

use std::time::Duration;

use uuid::Uuid;

use crate::error::{MigrateError, Result};

/// Default history table name.
pub const DEFAULT_HISTORY_TABLE: &str = "cask_migrations";

/// Settings for a [`MigrationRunner`](crate::runner::MigrationRunner).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// History table name; the lock and marker tables derive from it.
    pub history_table: String,
    /// How long to wait for the migration lock.
    pub lock_timeout: Duration,
    /// How often to retry while the lock is held elsewhere.
    pub lock_poll_interval: Duration,
    /// Budget for a single apply or revert, if any.
    pub apply_timeout: Option<Duration>,
    /// Token written into the lock row.
    pub owner: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            history_table: DEFAULT_HISTORY_TABLE.to_string(),
            lock_timeout: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(250),
            apply_timeout: None,
            owner: Uuid::new_v4().to_string(),
        }
    }
}

impl RunnerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the history table name.
    #[must_use]
    pub fn history_table(mut self, table: impl Into<String>) -> Self {
        self.history_table = table.into();
        self
    }

    /// Sets the lock timeout.
    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the lock poll interval.
    #[must_use]
    pub fn lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Sets the per-migration time budget.
    #[must_use]
    pub fn apply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.apply_timeout = timeout;
        self
    }

    /// Sets the lock owner token.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Rejects history table names that would need quoting.
    pub fn validate(&self) -> Result<()> {
        let name = &self.history_table;
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(MigrateError::Validation(format!(
                "History table name '{}' must be a plain identifier",
                name
            )));
        }
        if self.lock_poll_interval.is_zero() {
            return Err(MigrateError::Validation(
                "Lock poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::new();
        assert_eq!(config.history_table, "cask_migrations");
        assert_eq!(config.lock_timeout, Duration::from_secs(30));
        assert!(config.apply_timeout.is_none());
        assert!(Uuid::parse_str(&config.owner).is_ok());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_owner_tokens_differ() {
        assert_ne!(RunnerConfig::new().owner, RunnerConfig::new().owner);
    }

    #[test]
    fn test_history_table_validation() {
        assert!(RunnerConfig::new()
            .history_table("__EFMigrationsHistory")
            .validate()
            .is_ok());
        for bad in ["", "1history", "history; DROP TABLE x", "my table"] {
            assert!(
                RunnerConfig::new().history_table(bad).validate().is_err(),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
