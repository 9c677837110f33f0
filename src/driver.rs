//! The driver seam: the minimal session surface the pool manages.
//!
//! The pool does not speak the PostgreSQL wire protocol itself. It drives
//! any single-session client implementing [`Driver`], produced on demand by
//! a [`DriverFactory`]. Parameter binding at the `$N` level, TLS, and
//! session settings such as `statement_timeout` all belong to the driver
//! and its factory.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// Driver Error
// ============================================================================

/// An error reported by a driver session.
///
/// Carries the client or server error code (e.g. `ENOTFOUND`) when one is
/// available, plus the human-readable message. The pool's retry policies
/// match on both.
#[derive(Debug, Clone)]
pub struct DriverError {
    code: Option<String>,
    message: String,
}

impl DriverError {
    /// Create an error from a message alone.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// Create an error carrying a machine-readable code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// The machine-readable code, if the driver attached one.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// The human-readable message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} ({})", self.message, code),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for DriverError {}

// ============================================================================
// Error Sink
// ============================================================================

type ErrorHandler = dyn Fn(DriverError) + Send + Sync;

/// Handle a driver uses to surface asynchronous session errors.
///
/// The pool installs one sink per connection before `connect()`. A driver
/// should call [`report`](ErrorSink::report) whenever the session fails
/// outside of an in-flight call (e.g. the server closed the socket while
/// the connection sat idle). Once the pool removes the connection the sink
/// is muted and later reports are swallowed.
#[derive(Clone)]
pub struct ErrorSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    muted: AtomicBool,
    handler: Box<ErrorHandler>,
}

impl ErrorSink {
    pub(crate) fn new(handler: impl Fn(DriverError) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                muted: AtomicBool::new(false),
                handler: Box::new(handler),
            }),
        }
    }

    /// Report an asynchronous session error to the pool.
    pub fn report(&self, err: DriverError) {
        if !self.inner.muted.load(Ordering::Acquire) {
            (self.inner.handler)(err);
        }
    }

    /// Stop forwarding reports. Used when the connection leaves the pool.
    pub(crate) fn mute(&self) {
        self.inner.muted.store(true, Ordering::Release);
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorSink")
            .field("muted", &self.inner.muted.load(Ordering::Acquire))
            .finish()
    }
}

// ============================================================================
// Driver Traits
// ============================================================================

/// A single database session, exclusively owned by the pool.
///
/// Implementations must tolerate `end()` being called more than once and
/// after a failed `connect()`.
#[async_trait]
pub trait Driver: Send + 'static {
    /// Positional parameter value accepted by `query`.
    type Value: Clone + Send + Sync + 'static;
    /// Result of a successful query.
    type Output: Send + 'static;

    /// Establish the session. Called exactly once before any query.
    async fn connect(&mut self) -> DriverResult<()>;

    /// Execute a query with positional (`$N`) parameters.
    async fn query(&mut self, text: &str, params: &[Self::Value]) -> DriverResult<Self::Output>;

    /// Shut the session down gracefully. Must be idempotent.
    async fn end(&mut self) -> DriverResult<()>;

    /// Forcibly tear down the underlying transport, if exposed.
    ///
    /// Called before `end()` when a connect attempt fails, so a half-open
    /// socket cannot leak. The default does nothing.
    fn destroy(&mut self) {}

    /// Install the pool's sink for asynchronous session errors.
    ///
    /// Drivers without a background error source may ignore this.
    fn set_error_sink(&mut self, _sink: ErrorSink) {}
}

/// Produces unconnected driver sessions for the pool.
pub trait DriverFactory: Send + Sync + 'static {
    /// The session type this factory creates.
    type Driver: Driver;

    /// Instantiate a new, not-yet-connected session.
    fn create(&self) -> Self::Driver;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_sink_forwards_until_muted() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_c = Arc::clone(&seen);
        let sink = ErrorSink::new(move |_| {
            seen_c.fetch_add(1, Ordering::SeqCst);
        });

        sink.report(DriverError::new("boom"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sink.mute();
        sink.report(DriverError::new("ignored"));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_display_includes_code() {
        let err = DriverError::with_code("EAI_AGAIN", "temporary failure");
        assert_eq!(err.to_string(), "temporary failure (EAI_AGAIN)");

        let err = DriverError::new("plain message");
        assert_eq!(err.to_string(), "plain message");
    }
}
