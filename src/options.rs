//! Pool configuration and defaults.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;

use crate::error::{PoolError, Result};

/// Builds the regex matching a specific named-parameter token, so every
/// occurrence of that token can be rewritten to its positional index.
pub type ReplaceRegexFn = Arc<dyn Fn(&str) -> Regex + Send + Sync>;

/// Maps a matched token (e.g. `@id`) to its key in the values map (`id`).
pub type ParameterNameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Connection pool configuration.
///
/// All durations are wall-clock budgets or intervals; a zero duration
/// disables the behavior where the field documents it.
#[derive(Clone)]
pub struct PoolOptions {
    /// Hard cap on simultaneous physical connections.
    pub pool_size: usize,
    /// How long a released connection may sit idle before removal.
    /// Zero makes release remove the connection immediately.
    pub idle_timeout: Duration,
    /// Maximum time an acquire may wait for a pooled slot.
    pub wait_for_available_connection_timeout: Duration,
    /// Per-attempt connect timeout.
    pub connection_timeout: Duration,
    /// Maximum retry rounds for transient connect errors. Zero disables
    /// code-policy retries entirely.
    pub retry_connection_max_retries: u32,
    /// Backoff between code-policy connect retries.
    pub retry_connection_wait: Duration,
    /// Codes matched against a connect error's code, or as a substring of
    /// its message, to qualify for code-policy retries.
    pub retry_connection_error_codes: Vec<String>,
    /// Keep reconnecting while the server reports it is starting up.
    pub reconnect_on_database_is_starting_error: bool,
    /// Sleep between database-starting reconnect attempts.
    pub wait_for_database_startup: Duration,
    /// Total wall-clock budget for the database-starting loop.
    pub database_startup_timeout: Duration,
    /// Retry a query after a read-only transaction failure.
    pub reconnect_on_read_only_transaction_error: bool,
    /// Sleep between read-only retries.
    pub wait_for_reconnect_read_only_transaction: Duration,
    /// Total wall-clock budget for read-only retries.
    pub read_only_transaction_reconnect_timeout: Duration,
    /// Retry a query after the session becomes unqueryable.
    pub reconnect_on_connection_error: bool,
    /// Sleep between connection-error retries.
    pub wait_for_reconnect_connection: Duration,
    /// Total wall-clock budget for connection-error retries.
    pub connection_reconnect_timeout: Duration,
    /// Discovers named-parameter tokens in query text.
    pub named_parameter_find_regex: Regex,
    /// Builds the per-token replacement regex.
    pub named_parameter_replace_regex: ReplaceRegexFn,
    /// Maps a token to its key in the values map.
    pub named_parameter_name: ParameterNameFn,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_size: 10,
            idle_timeout: Duration::from_millis(10_000),
            wait_for_available_connection_timeout: Duration::from_millis(90_000),
            connection_timeout: Duration::from_millis(30_000),
            retry_connection_max_retries: 5,
            retry_connection_wait: Duration::from_millis(100),
            retry_connection_error_codes: vec![
                "ENOTFOUND".to_string(),
                "EAI_AGAIN".to_string(),
                "ERR_PG_CONNECT_TIMEOUT".to_string(),
                "timeout expired".to_string(),
            ],
            reconnect_on_database_is_starting_error: true,
            wait_for_database_startup: Duration::ZERO,
            database_startup_timeout: Duration::from_millis(90_000),
            reconnect_on_read_only_transaction_error: true,
            wait_for_reconnect_read_only_transaction: Duration::ZERO,
            read_only_transaction_reconnect_timeout: Duration::from_millis(90_000),
            reconnect_on_connection_error: true,
            wait_for_reconnect_connection: Duration::ZERO,
            connection_reconnect_timeout: Duration::from_millis(90_000),
            named_parameter_find_regex: Regex::new(r"@(\w+)\b").expect("valid literal regex"),
            named_parameter_replace_regex: Arc::new(|token: &str| {
                Regex::new(&format!(r"{}\b", regex::escape(token))).expect("escaped token regex")
            }),
            named_parameter_name: Arc::new(|token: &str| {
                token.trim_start_matches('@').to_string()
            }),
        }
    }
}

impl PoolOptions {
    /// Create options with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection cap.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the idle lifetime. Zero disables idling.
    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Set the acquire wait deadline.
    pub fn wait_for_available_connection_timeout(mut self, timeout: Duration) -> Self {
        self.wait_for_available_connection_timeout = timeout;
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the code-policy retry cap.
    pub fn retry_connection_max_retries(mut self, max_retries: u32) -> Self {
        self.retry_connection_max_retries = max_retries;
        self
    }

    /// Set the backoff between code-policy retries.
    pub fn retry_connection_wait(mut self, wait: Duration) -> Self {
        self.retry_connection_wait = wait;
        self
    }

    /// Replace the retryable code set.
    pub fn retry_connection_error_codes(mut self, codes: Vec<String>) -> Self {
        self.retry_connection_error_codes = codes;
        self
    }

    /// Enable or disable the database-starting reconnect loop.
    pub fn reconnect_on_database_is_starting_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_database_is_starting_error = enabled;
        self
    }

    /// Set the sleep between database-starting attempts.
    pub fn wait_for_database_startup(mut self, wait: Duration) -> Self {
        self.wait_for_database_startup = wait;
        self
    }

    /// Set the database-starting loop budget.
    pub fn database_startup_timeout(mut self, timeout: Duration) -> Self {
        self.database_startup_timeout = timeout;
        self
    }

    /// Enable or disable read-only transaction retries.
    pub fn reconnect_on_read_only_transaction_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_read_only_transaction_error = enabled;
        self
    }

    /// Set the sleep between read-only retries.
    pub fn wait_for_reconnect_read_only_transaction(mut self, wait: Duration) -> Self {
        self.wait_for_reconnect_read_only_transaction = wait;
        self
    }

    /// Set the read-only retry budget.
    pub fn read_only_transaction_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.read_only_transaction_reconnect_timeout = timeout;
        self
    }

    /// Enable or disable connection-error retries.
    pub fn reconnect_on_connection_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_connection_error = enabled;
        self
    }

    /// Set the sleep between connection-error retries.
    pub fn wait_for_reconnect_connection(mut self, wait: Duration) -> Self {
        self.wait_for_reconnect_connection = wait;
        self
    }

    /// Set the connection-error retry budget.
    pub fn connection_reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.connection_reconnect_timeout = timeout;
        self
    }

    /// Replace the token-discovery regex.
    pub fn named_parameter_find_regex(mut self, regex: Regex) -> Self {
        self.named_parameter_find_regex = regex;
        self
    }

    /// Validate the configuration, returning an error if unusable.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PoolError::Config(
                "pool_size must be greater than 0".to_string(),
            ));
        }
        if self.connection_timeout.is_zero() {
            return Err(PoolError::Config(
                "connection_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("pool_size", &self.pool_size)
            .field("idle_timeout", &self.idle_timeout)
            .field(
                "wait_for_available_connection_timeout",
                &self.wait_for_available_connection_timeout,
            )
            .field("connection_timeout", &self.connection_timeout)
            .field("retry_connection_max_retries", &self.retry_connection_max_retries)
            .field("retry_connection_wait", &self.retry_connection_wait)
            .field("retry_connection_error_codes", &self.retry_connection_error_codes)
            .field(
                "reconnect_on_database_is_starting_error",
                &self.reconnect_on_database_is_starting_error,
            )
            .field("wait_for_database_startup", &self.wait_for_database_startup)
            .field("database_startup_timeout", &self.database_startup_timeout)
            .field(
                "reconnect_on_read_only_transaction_error",
                &self.reconnect_on_read_only_transaction_error,
            )
            .field("reconnect_on_connection_error", &self.reconnect_on_connection_error)
            .field("named_parameter_find_regex", &self.named_parameter_find_regex)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.pool_size, 10);
        assert_eq!(options.idle_timeout, Duration::from_millis(10_000));
        assert_eq!(
            options.wait_for_available_connection_timeout,
            Duration::from_millis(90_000)
        );
        assert_eq!(options.retry_connection_max_retries, 5);
        assert!(options.reconnect_on_database_is_starting_error);
        assert!(options.reconnect_on_read_only_transaction_error);
        assert!(options.reconnect_on_connection_error);
        assert!(options
            .retry_connection_error_codes
            .iter()
            .any(|c| c == "timeout expired"));
    }

    #[test]
    fn test_builder() {
        let options = PoolOptions::new()
            .pool_size(2)
            .idle_timeout(Duration::ZERO)
            .connection_timeout(Duration::from_millis(50))
            .retry_connection_max_retries(0);

        assert_eq!(options.pool_size, 2);
        assert!(options.idle_timeout.is_zero());
        assert_eq!(options.connection_timeout, Duration::from_millis(50));
        assert_eq!(options.retry_connection_max_retries, 0);
    }

    #[test]
    fn test_validate_rejects_zero_pool_size() {
        let options = PoolOptions::new().pool_size(0);
        assert!(options.validate().is_err());
        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_default_name_fn_strips_at_sign() {
        let options = PoolOptions::default();
        assert_eq!((options.named_parameter_name)("@id"), "id");
    }
}
