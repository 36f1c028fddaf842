//! Retry configuration for the payment envelope.
//!
//! The engine never reads the environment; callers build a [`RetryConfig`]
//! and hand it to the coordinator.

use crate::classify::{NonceConflictMatcher, VocabularyMatcher};
use crate::errors::{Result, X402Error};
use std::sync::Arc;
use std::time::Duration;

/// Default number of retries after the first submission.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default cap for exponential backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Default wait for a conflicting transaction to leave the pending pool.
pub const DEFAULT_NONCE_CONFLICT_DELAY: Duration = Duration::from_millis(30_000);

/// Configuration for payment retries.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries allowed after the first submission
    pub max_retries: u32,

    /// Base delay of the exponential backoff
    pub base_delay: Duration,

    /// Upper bound of the exponential backoff
    pub max_delay: Duration,

    /// Fixed delay after a nonce conflict
    pub nonce_conflict_delay: Duration,

    /// Log every state transition at `info` instead of `debug`
    pub verbose: bool,

    /// Detects nonce conflicts in server error text
    pub nonce_matcher: Arc<dyn NonceConflictMatcher>,
}

impl RetryConfig {
    /// Creates a configuration with the default limits.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use x402_envelope::config::RetryConfig;
    ///
    /// let config = RetryConfig::new()
    ///     .with_max_retries(5)
    ///     .with_base_delay(Duration::from_millis(250))
    ///     .with_verbose(true);
    ///
    /// assert_eq!(config.max_retries, 5);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            nonce_conflict_delay: DEFAULT_NONCE_CONFLICT_DELAY,
            verbose: false,
            nonce_matcher: Arc::new(VocabularyMatcher::default()),
        }
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff base delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the nonce-conflict delay.
    pub fn with_nonce_conflict_delay(mut self, delay: Duration) -> Self {
        self.nonce_conflict_delay = delay;
        self
    }

    /// Enables or disables verbose transition logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Replaces the nonce-conflict matcher.
    pub fn with_nonce_matcher(mut self, matcher: impl NonceConflictMatcher + 'static) -> Self {
        self.nonce_matcher = Arc::new(matcher);
        self
    }

    /// Checks that the delays are coherent.
    pub fn validate(&self) -> Result<()> {
        if self.base_delay > self.max_delay {
            return Err(X402Error::ConfigError(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}
