//! Error types for the connection pool.
//!
//! Every pool-originated failure carries a stable `code` string so callers
//! can branch on failures without parsing messages.

use thiserror::Error;

use crate::driver::DriverError;

/// Errors surfaced by pool operations.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been shut down via [`end`](crate::Pool::end).
    #[error("Connection pool is ending")]
    PoolEnded,

    /// No connection became available within the configured wait timeout.
    #[error("Timed out while waiting for an available connection")]
    WaitTimeout,

    /// A single connect attempt exceeded the configured connection timeout.
    #[error("Timed out while connecting to the database")]
    ConnectTimeout,

    /// A named-parameter map was supplied but the query contains no tokens.
    #[error("Query does not contain any named parameters")]
    NoNamedParameters,

    /// The query references parameters absent from the supplied map.
    #[error("Missing query parameter(s): {0}")]
    MissingParameters(String),

    /// Invalid pool configuration.
    #[error("Invalid pool configuration: {0}")]
    Config(String),

    /// An error reported by the underlying driver session.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl PoolError {
    /// Stable machine-readable code for this error, if it has one.
    ///
    /// Driver errors pass through whatever code the server or client
    /// attached to them.
    pub fn code(&self) -> Option<&str> {
        match self {
            PoolError::PoolEnded => Some("ERR_PG_CONNECT_POOL_ENDED"),
            PoolError::WaitTimeout => Some("ERR_PG_CONNECT_POOL_CONNECTION_TIMEOUT"),
            PoolError::ConnectTimeout => Some("ERR_PG_CONNECT_TIMEOUT"),
            PoolError::NoNamedParameters => Some("ERR_PG_QUERY_NO_NAMED_PARAMETERS"),
            PoolError::MissingParameters(_) => Some("ERR_PG_QUERY_MISSING_QUERY_PARAMETER"),
            PoolError::Config(_) => None,
            PoolError::Driver(e) => e.code(),
        }
    }
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        assert_eq!(PoolError::PoolEnded.code(), Some("ERR_PG_CONNECT_POOL_ENDED"));
        assert_eq!(
            PoolError::WaitTimeout.code(),
            Some("ERR_PG_CONNECT_POOL_CONNECTION_TIMEOUT")
        );
        assert_eq!(PoolError::ConnectTimeout.code(), Some("ERR_PG_CONNECT_TIMEOUT"));
        assert_eq!(
            PoolError::NoNamedParameters.code(),
            Some("ERR_PG_QUERY_NO_NAMED_PARAMETERS")
        );
        assert_eq!(
            PoolError::MissingParameters("id".to_string()).code(),
            Some("ERR_PG_QUERY_MISSING_QUERY_PARAMETER")
        );
    }

    #[test]
    fn test_missing_parameters_message() {
        let err = PoolError::MissingParameters("id, name".to_string());
        assert_eq!(err.to_string(), "Missing query parameter(s): id, name");
    }

    #[test]
    fn test_driver_error_code_passes_through() {
        let err = PoolError::Driver(DriverError::with_code("ENOTFOUND", "dns lookup failed"));
        assert_eq!(err.code(), Some("ENOTFOUND"));
    }
}
