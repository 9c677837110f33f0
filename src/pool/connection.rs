//! A driver session wrapped with pool-managed identity and lifecycle.

use std::fmt;
use std::sync::Arc;

use crate::driver::{Driver, DriverFactory, DriverResult, ErrorSink};

use super::pool::PoolShared;

/// Stable identity of a pooled connection, unique for the pool's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub(crate) u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of ownership moved between the pool's sets: the driver session
/// plus its identity and error sink.
pub(crate) struct PoolDriver<D: Driver> {
    pub(crate) id: ConnectionId,
    pub(crate) driver: D,
    pub(crate) sink: ErrorSink,
}

/// A connection checked out from the pool.
///
/// Dropping the wrapper releases the connection: it is handed to the
/// oldest waiter, parked in the idle set, or removed, per pool state.
/// Use [`discard`](PooledConnection::discard) to release with removal.
/// Both explicit forms consume `self`, so a connection cannot be released
/// twice.
pub struct PooledConnection<F: DriverFactory> {
    bundle: Option<PoolDriver<F::Driver>>,
    pool: Arc<PoolShared<F>>,
}

impl<F: DriverFactory> PooledConnection<F> {
    pub(crate) fn new(bundle: PoolDriver<F::Driver>, pool: Arc<PoolShared<F>>) -> Self {
        Self {
            bundle: Some(bundle),
            pool,
        }
    }

    /// This connection's pool-assigned identity.
    pub fn id(&self) -> ConnectionId {
        self.bundle.as_ref().expect("connection released").id
    }

    /// Execute a query on the underlying session.
    pub async fn query(
        &mut self,
        text: &str,
        params: &[<F::Driver as Driver>::Value],
    ) -> DriverResult<<F::Driver as Driver>::Output> {
        self.bundle
            .as_mut()
            .expect("connection released")
            .driver
            .query(text, params)
            .await
    }

    /// Return the connection to the pool.
    ///
    /// Equivalent to dropping the wrapper; provided for call sites where
    /// the release should be explicit.
    pub fn release(mut self) {
        if let Some(bundle) = self.bundle.take() {
            PoolShared::route_release(&self.pool, bundle, false);
        }
    }

    /// Return the connection to the pool marked for removal.
    pub fn discard(mut self) {
        if let Some(bundle) = self.bundle.take() {
            PoolShared::route_release(&self.pool, bundle, true);
        }
    }

    /// Take the bundle back out, defusing the drop-time release.
    pub(crate) fn into_bundle(mut self) -> PoolDriver<F::Driver> {
        self.bundle.take().expect("connection released")
    }
}

impl<F: DriverFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(bundle) = self.bundle.take() {
            PoolShared::route_release(&self.pool, bundle, false);
        }
    }
}

impl<F: DriverFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.bundle.as_ref().map(|b| b.id))
            .finish()
    }
}
