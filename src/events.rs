//! Typed lifecycle events for pool observability.
//!
//! Every event fires at a well-defined point in the acquire/release and
//! retry protocols. Consumers subscribe through
//! [`Pool::subscribe`](crate::Pool::subscribe); emission is fire-and-forget
//! over `tokio::sync::broadcast`.

use std::time::Instant;

use tokio::sync::broadcast;

use crate::driver::DriverError;
use crate::pool::ConnectionId;

/// Events emitted during pool lifecycle operations.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An acquire found the pool full and joined the waiter queue.
    ConnectionRequestQueued,
    /// A queued acquire received a connection by handoff.
    ConnectionRequestDequeued,
    /// A new physical connection was established.
    ///
    /// Fires exactly once per successful connect, before the connection
    /// becomes available to any caller.
    ConnectionAddedToPool {
        connection_id: ConnectionId,
        /// How many code-policy retries this attempt took.
        retry_attempt: u32,
        /// When the overall connect began, from a monotonic clock.
        start_time: Instant,
    },
    /// A connection left the pool for good.
    ConnectionRemovedFromPool { connection_id: ConnectionId },
    /// A released connection entered the idle set.
    ConnectionIdle { connection_id: ConnectionId },
    /// A connection was taken out of the idle set for removal.
    ConnectionRemovedFromIdlePool { connection_id: ConnectionId },
    /// An idle connection was reused by an acquire.
    IdleConnectionActivated { connection_id: ConnectionId },
    /// A query failed because the server is in a read-only transaction.
    QueryDeniedForReadOnlyTransaction,
    /// A query failed because the session is no longer queryable.
    QueryDeniedForConnectionError,
    /// A connect attempt found the database still starting up.
    WaitingForDatabaseToStart,
    /// A connect attempt failed with a retryable error code.
    RetryConnectionOnError,
    /// A driver session reported an error.
    Error {
        error: DriverError,
        connection_id: Option<ConnectionId>,
    },
}

/// Broadcast-based bus for [`PoolEvent`]s.
///
/// Emission never blocks: with no subscribers, or with a full channel,
/// events are dropped rather than applying backpressure to the pool.
pub(crate) struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    pub(crate) fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub(crate) fn emit(&self, event: PoolEvent) {
        // An error here only means there are no active receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
