//! Unit-of-work configuration.

use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::store::TransactionOptions;

/// Configuration for a [`DatastoreUnitOfWork`](crate::DatastoreUnitOfWork).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWorkConfig {
    /// Whether transactions may span several entity groups.
    pub cross_group: bool,

    /// Deadline applied to every session, on top of the parent context's.
    pub timeout: Option<Duration>,

    /// Policy of [`DatastoreUnitOfWork::run_in_transaction`](crate::DatastoreUnitOfWork::run_in_transaction).
    pub retry: RetryPolicy,
}

impl Default for UnitOfWorkConfig {
    fn default() -> Self {
        Self {
            cross_group: true,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl UnitOfWorkConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether transactions may span several entity groups.
    #[must_use]
    pub const fn cross_group(mut self, value: bool) -> Self {
        self.cross_group = value;
        self
    }

    /// Sets the per-session timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the caller-driven retry policy.
    #[must_use]
    pub const fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Options passed to the store when a session begins.
    ///
    /// Sessions always run a single attempt.
    pub(crate) fn transaction_options(&self) -> TransactionOptions {
        TransactionOptions {
            cross_group: self.cross_group,
            max_attempts: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = UnitOfWorkConfig::default();
        assert!(config.cross_group);
        assert!(config.timeout.is_none());
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn builder_pattern() {
        let config = UnitOfWorkConfig::new()
            .cross_group(false)
            .timeout(Duration::from_secs(30))
            .retry(RetryPolicy::new(3));

        assert!(!config.cross_group);
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_attempts, 3);

        let options = config.transaction_options();
        assert!(!options.cross_group);
        assert_eq!(options.max_attempts, 1);
    }
}
