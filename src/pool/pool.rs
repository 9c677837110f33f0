//! The pool itself: acquire/release protocol and both retry loops.
//!
//! Locking model: one `parking_lot::Mutex` over the state sets. The lock
//! is never held across driver I/O, retry sleeps, or subscriber callbacks.
//! Handing a released connection to a waiter stays under the lock (the
//! send is a non-blocking oneshot), so no other acquirer can steal the
//! connection between release and handoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use regex::Regex;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::driver::{Driver, DriverError, DriverFactory, ErrorSink};
use crate::error::{PoolError, Result};
use crate::events::{EventBus, PoolEvent};
use crate::named_params::{self, Params};
use crate::options::PoolOptions;

use super::connection::{ConnectionId, PoolDriver, PooledConnection};
use super::inner::{IdleEntry, PoolState, Waiter};

type Value<F> = <<F as DriverFactory>::Driver as Driver>::Value;
type Output<F> = <<F as DriverFactory>::Driver as Driver>::Output;

// ============================================================================
// Pool
// ============================================================================

/// A connection pool multiplexing logical requests onto a bounded set of
/// physical database sessions.
///
/// Cloning is cheap; all clones share one pool.
pub struct Pool<F: DriverFactory> {
    shared: Arc<PoolShared<F>>,
}

impl<F: DriverFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub(crate) struct PoolShared<F: DriverFactory> {
    options: PoolOptions,
    factory: F,
    events: EventBus,
    state: Mutex<PoolState<F>>,
    next_connection_id: AtomicU64,
    next_waiter_id: AtomicU64,
}

/// What an acquire decided to do, computed under the lock and executed
/// outside it.
enum AcquirePlan<F: DriverFactory> {
    Reuse(PoolDriver<F::Driver>),
    Connect(ConnectionId),
    Wait(u64, oneshot::Receiver<PooledConnection<F>>),
}

impl<F: DriverFactory> Pool<F> {
    /// Create a pool over the given driver factory.
    pub fn new(options: PoolOptions, factory: F) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                options,
                factory,
                events: EventBus::default(),
                state: Mutex::new(PoolState::new()),
                next_connection_id: AtomicU64::new(1),
                next_waiter_id: AtomicU64::new(1),
            }),
        })
    }

    /// The effective configuration.
    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Subscribe to lifecycle events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.shared.events.subscribe()
    }

    /// Number of acquires currently queued for a connection.
    pub fn waiting_count(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Number of connections counted against `pool_size` (connecting,
    /// in-use, and idle).
    pub fn total_count(&self) -> usize {
        self.shared.state.lock().total.len()
    }

    /// Acquire an exclusively-owned connection.
    ///
    /// Reuses the most recently idled connection when one exists, opens a
    /// new one while under the `pool_size` cap, and otherwise queues
    /// behind earlier acquires until a release hands a connection over or
    /// the wait deadline passes.
    pub async fn acquire(&self) -> Result<PooledConnection<F>> {
        let plan = {
            let mut state = self.shared.state.lock();
            if state.ending {
                return Err(PoolError::PoolEnded);
            }
            if let Some(entry) = state.idle.pop_front() {
                AcquirePlan::Reuse(entry.into_bundle())
            } else if state.total.len() < self.shared.options.pool_size {
                let id = ConnectionId(
                    self.shared.next_connection_id.fetch_add(1, Ordering::Relaxed),
                );
                state.total.insert(id);
                AcquirePlan::Connect(id)
            } else {
                let waiter_id = self.shared.next_waiter_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                state.waiting.push_back(Waiter { id: waiter_id, tx });
                AcquirePlan::Wait(waiter_id, rx)
            }
        };

        match plan {
            AcquirePlan::Reuse(bundle) => {
                self.shared.events.emit(PoolEvent::IdleConnectionActivated {
                    connection_id: bundle.id,
                });
                Ok(PooledConnection::new(bundle, Arc::clone(&self.shared)))
            }
            AcquirePlan::Connect(id) => {
                match PoolShared::connect_with_retry(&self.shared, id).await {
                    Ok(bundle) => Ok(PooledConnection::new(bundle, Arc::clone(&self.shared))),
                    Err(err) => {
                        self.shared.state.lock().total.remove(&id);
                        Err(err)
                    }
                }
            }
            AcquirePlan::Wait(waiter_id, rx) => {
                self.shared.events.emit(PoolEvent::ConnectionRequestQueued);
                let deadline = self.shared.options.wait_for_available_connection_timeout;
                match tokio::time::timeout(deadline, rx).await {
                    Ok(Ok(conn)) => {
                        self.shared.events.emit(PoolEvent::ConnectionRequestDequeued);
                        Ok(conn)
                    }
                    // The sender side only disappears if the pool shut
                    // down underneath the waiter.
                    Ok(Err(_)) => Err(PoolError::PoolEnded),
                    Err(_) => {
                        self.shared.state.lock().remove_waiter(waiter_id);
                        Err(PoolError::WaitTimeout)
                    }
                }
            }
        }
    }

    /// Execute a query, retrying read-only and stale-connection failures
    /// under the configured policies.
    ///
    /// Named parameters are rewritten to positional form before any
    /// connection is acquired.
    pub async fn query(&self, text: &str, params: Params<Value<F>>) -> Result<Output<F>> {
        let (text, positional) = named_params::prepare(&self.shared.options, text, params)?;
        let options = &self.shared.options;
        let mut start: Option<Instant> = None;

        loop {
            let mut conn = self.acquire().await?;
            let err = match conn.query(&text, &positional).await {
                Ok(output) => {
                    conn.release();
                    return Ok(output);
                }
                Err(err) => err,
            };

            let Some(retry) = classify_query_error(options, &err) else {
                conn.release();
                return Err(PoolError::Driver(err));
            };

            debug!(connection_id = %conn.id(), error = %err, "query denied, retrying on a fresh connection");
            conn.discard();
            match retry {
                QueryRetry::ReadOnly => self
                    .shared
                    .events
                    .emit(PoolEvent::QueryDeniedForReadOnlyTransaction),
                QueryRetry::ConnectionError => self
                    .shared
                    .events
                    .emit(PoolEvent::QueryDeniedForConnectionError),
            }

            // Idle sessions may still point at the old primary; force the
            // next acquires onto fresh sockets.
            PoolShared::drain_idle(&self.shared).await;

            let since = *start.get_or_insert_with(Instant::now);
            let (wait, budget) = match retry {
                QueryRetry::ReadOnly => (
                    options.wait_for_reconnect_read_only_transaction,
                    options.read_only_transaction_reconnect_timeout,
                ),
                QueryRetry::ConnectionError => (
                    options.wait_for_reconnect_connection,
                    options.connection_reconnect_timeout,
                ),
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            if since.elapsed() > budget {
                return Err(PoolError::Driver(err));
            }
        }
    }

    /// Shut the pool down.
    ///
    /// Latches the ending state, then drains every idle connection.
    /// Connections currently in use finish their work and are removed on
    /// release. Subsequent acquires fail with
    /// [`PoolError::PoolEnded`]; queued waiters run out their deadlines.
    pub async fn end(&self) {
        self.shared.state.lock().ending = true;
        PoolShared::drain_idle(&self.shared).await;
    }
}

// ============================================================================
// Shared internals
// ============================================================================

impl<F: DriverFactory> PoolShared<F> {
    /// Establish a physical connection for `id`, applying the two connect
    /// retry policies.
    ///
    /// The code policy is count-limited and checked first; the
    /// database-starting policy is wall-clock-limited and resets the
    /// attempt counter, so a slow startup never exhausts the code budget.
    async fn connect_with_retry(
        shared: &Arc<Self>,
        id: ConnectionId,
    ) -> Result<PoolDriver<F::Driver>> {
        let options = &shared.options;
        let start_time = Instant::now();
        let mut retry_attempt: u32 = 0;
        let mut db_starting_since: Option<Instant> = None;

        loop {
            let mut driver = shared.factory.create();
            let sink = Self::error_sink_for(shared, id);
            driver.set_error_sink(sink.clone());

            let err = match tokio::time::timeout(options.connection_timeout, driver.connect())
                .await
            {
                Ok(Ok(())) => {
                    shared.events.emit(PoolEvent::ConnectionAddedToPool {
                        connection_id: id,
                        retry_attempt,
                        start_time,
                    });
                    debug!(connection_id = %id, retry_attempt, "connection added to pool");
                    return Ok(PoolDriver { id, driver, sink });
                }
                Ok(Err(err)) => PoolError::Driver(err),
                Err(_) => PoolError::ConnectTimeout,
            };

            // The failed attempt may have left a half-open transport.
            driver.destroy();
            if let Err(end_err) = driver.end().await {
                debug!(connection_id = %id, error = %end_err, "ending failed connect attempt");
            }

            if options.retry_connection_max_retries > 0
                && retry_attempt < options.retry_connection_max_retries
                && matches_retry_codes(options, &err)
            {
                warn!(connection_id = %id, retry_attempt, error = %err, "retrying connect");
                shared.events.emit(PoolEvent::RetryConnectionOnError);
                tokio::time::sleep(options.retry_connection_wait).await;
                retry_attempt += 1;
                continue;
            }

            if options.reconnect_on_database_is_starting_error && is_database_starting(&err) {
                shared.events.emit(PoolEvent::WaitingForDatabaseToStart);
                debug!(connection_id = %id, "database is starting up, waiting");
                let since = *db_starting_since.get_or_insert_with(Instant::now);
                tokio::time::sleep(options.wait_for_database_startup).await;
                if since.elapsed() <= options.database_startup_timeout {
                    retry_attempt = 0;
                    continue;
                }
            }

            return Err(err);
        }
    }

    /// Route a released connection: remove it, hand it to the oldest
    /// waiter, or park it idle.
    pub(super) fn route_release(shared: &Arc<Self>, bundle: PoolDriver<F::Driver>, remove: bool) {
        let mut bundle = bundle;
        let mut state = shared.state.lock();

        // An error report may have evicted the connection while a caller
        // still held it; its id is then gone from the accounting set.
        let evicted = !state.total.contains(&bundle.id);
        if state.ending || remove || evicted {
            drop(state);
            Self::remove_connection(shared, bundle);
            return;
        }

        // Oldest waiter still listening wins; the idle set is bypassed.
        while let Some(waiter) = state.waiting.pop_front() {
            let conn = PooledConnection::new(bundle, Arc::clone(shared));
            match waiter.tx.send(conn) {
                Ok(()) => return,
                Err(conn) => bundle = conn.into_bundle(),
            }
        }

        if !shared.options.idle_timeout.is_zero() {
            let id = bundle.id;
            let timer = Self::spawn_idle_timer(shared, id);
            state.idle.push_front(IdleEntry { bundle, timer });
            drop(state);
            shared.events.emit(PoolEvent::ConnectionIdle { connection_id: id });
        } else {
            drop(state);
            Self::remove_connection(shared, bundle);
        }
    }

    /// Start the expiry timer for an idle connection.
    ///
    /// The timer holds only a weak reference, so pending timers never keep
    /// a dropped pool alive. Returns `None` when called outside a tokio
    /// runtime, in which case the entry simply never expires on its own.
    fn spawn_idle_timer(shared: &Arc<Self>, id: ConnectionId) -> Option<JoinHandle<()>> {
        let weak = Arc::downgrade(shared);
        let idle_timeout = shared.options.idle_timeout;
        let handle = Handle::try_current().ok()?;
        Some(handle.spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(shared) = weak.upgrade() {
                Self::expire_idle(&shared, id).await;
            }
        }))
    }

    /// Idle-timer expiry: remove the connection if it is still idle.
    async fn expire_idle(shared: &Arc<Self>, id: ConnectionId) {
        let entry = {
            let mut state = shared.state.lock();
            let entry = state.take_idle_by_id(id);
            if entry.is_some() {
                state.total.remove(&id);
            }
            entry
        };
        let Some(mut entry) = entry else { return };
        debug!(connection_id = %id, "idle connection expired");
        // This task IS the timer; detach the handle instead of aborting,
        // or the teardown below would cancel itself.
        entry.timer.take();
        shared
            .events
            .emit(PoolEvent::ConnectionRemovedFromIdlePool { connection_id: id });
        Self::finish_remove(shared, entry.bundle).await;
    }

    /// Remove every currently-idle connection, oldest first.
    ///
    /// Entries leave the idle set and the accounting set under the lock,
    /// so no concurrent acquire can observe a connection that is already
    /// scheduled for removal; the driver teardowns run sequentially.
    pub(super) async fn drain_idle(shared: &Arc<Self>) {
        loop {
            let entry = {
                let mut state = shared.state.lock();
                match state.idle.pop_back() {
                    Some(entry) => {
                        state.total.remove(&entry.bundle.id);
                        Some(entry)
                    }
                    None => None,
                }
            };
            let Some(entry) = entry else { break };
            shared.events.emit(PoolEvent::ConnectionRemovedFromIdlePool {
                connection_id: entry.bundle.id,
            });
            Self::finish_remove(shared, entry.into_bundle()).await;
        }
    }

    /// Synchronous removal entry point for release paths: fix the
    /// accounting immediately, tear the driver down on a task.
    fn remove_connection(shared: &Arc<Self>, bundle: PoolDriver<F::Driver>) {
        shared.state.lock().total.remove(&bundle.id);
        if let Ok(handle) = Handle::try_current() {
            let shared = Arc::clone(shared);
            handle.spawn(async move {
                Self::finish_remove(&shared, bundle).await;
            });
        }
        // Without a runtime the driver is dropped, closing its transport.
    }

    /// The tail of every removal: mute the sink, end the driver, emit.
    async fn finish_remove(shared: &Arc<Self>, mut bundle: PoolDriver<F::Driver>) {
        bundle.sink.mute();
        match bundle.driver.end().await {
            Ok(()) => {}
            Err(err) if is_socket_already_ended(&err) => {}
            Err(err) => {
                warn!(connection_id = %bundle.id, error = %err, "error ending connection");
                shared.events.emit(PoolEvent::Error {
                    error: err,
                    connection_id: Some(bundle.id),
                });
            }
        }
        debug!(connection_id = %bundle.id, "connection removed from pool");
        shared.events.emit(PoolEvent::ConnectionRemovedFromPool {
            connection_id: bundle.id,
        });
    }

    /// Build the per-connection sink routing driver errors back here.
    fn error_sink_for(shared: &Arc<Self>, id: ConnectionId) -> ErrorSink {
        let weak = Arc::downgrade(shared);
        ErrorSink::new(move |err| {
            if let Some(shared) = weak.upgrade() {
                Self::on_driver_error(&shared, id, err);
            }
        })
    }

    /// A driver session reported an asynchronous error: evict it.
    ///
    /// If it sat idle, it is torn down right away. If a caller holds it,
    /// only the accounting changes now; the release path finishes the
    /// removal. Double reports cannot double-decrement; the sets are
    /// id-keyed.
    fn on_driver_error(shared: &Arc<Self>, id: ConnectionId, err: DriverError) {
        warn!(connection_id = %id, error = %err, "connection reported an error");
        let entry = {
            let mut state = shared.state.lock();
            state.total.remove(&id);
            state.take_idle_by_id(id)
        };
        if let Some(entry) = entry {
            shared
                .events
                .emit(PoolEvent::ConnectionRemovedFromIdlePool { connection_id: id });
            let bundle = entry.into_bundle();
            if let Ok(handle) = Handle::try_current() {
                let shared = Arc::clone(shared);
                handle.spawn(async move {
                    Self::finish_remove(&shared, bundle).await;
                });
            }
        }
        shared.events.emit(PoolEvent::Error {
            error: err,
            connection_id: Some(id),
        });
    }
}

// ============================================================================
// Error classification
// ============================================================================

/// Which query retry policy a failure falls under.
#[derive(Clone, Copy)]
enum QueryRetry {
    ReadOnly,
    ConnectionError,
}

fn classify_query_error(options: &PoolOptions, err: &DriverError) -> Option<QueryRetry> {
    static READ_ONLY: OnceLock<Regex> = OnceLock::new();
    let read_only = READ_ONLY.get_or_init(|| {
        Regex::new(r"(?i)cannot execute [\s\w]+ in a read-only transaction")
            .expect("valid literal regex")
    });

    if options.reconnect_on_read_only_transaction_error && read_only.is_match(err.message()) {
        return Some(QueryRetry::ReadOnly);
    }
    if options.reconnect_on_connection_error
        && err
            .message()
            .to_lowercase()
            .contains("connection error and is not queryable")
    {
        return Some(QueryRetry::ConnectionError);
    }
    None
}

/// Code policy: the error's code is in the configured set, or its message
/// contains one of the set's entries.
fn matches_retry_codes(options: &PoolOptions, err: &PoolError) -> bool {
    let code = err.code();
    let message = err.to_string();
    options
        .retry_connection_error_codes
        .iter()
        .any(|candidate| code == Some(candidate.as_str()) || message.contains(candidate.as_str()))
}

fn is_database_starting(err: &PoolError) -> bool {
    err.to_string()
        .to_lowercase()
        .contains("the database system is starting up")
}

/// Normal termination noise from ending an already-dead session.
fn is_socket_already_ended(err: &DriverError) -> bool {
    err.message()
        .contains("socket has been ended by the other party")
}
