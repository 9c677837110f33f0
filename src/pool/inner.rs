//! Pool state sets, protected by a single mutex in the owning pool.
//!
//! Invariants maintained by the protocol code in `pool.rs`:
//! - `total` holds every id counted against `pool_size` (connecting,
//!   in-use, and idle); `total.len() <= pool_size` between operations.
//! - A connection is in at most one of idle / held-by-caller /
//!   being-connected / being-removed.
//! - `idle` is ordered newest-first: release pushes the front, acquire
//!   pops the front, eviction takes the back. Every entry starts a fresh
//!   timer of identical duration at insertion, so insertion order and
//!   expiry order coincide.

use std::collections::{HashSet, VecDeque};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::driver::{Driver, DriverFactory};

use super::connection::{ConnectionId, PoolDriver, PooledConnection};

/// A queued acquire request awaiting handoff.
///
/// Resolved exactly once: either a releaser sends a connection through
/// `tx`, or the acquire's deadline fires and removes the waiter by id.
pub(super) struct Waiter<F: DriverFactory> {
    pub(super) id: u64,
    pub(super) tx: oneshot::Sender<PooledConnection<F>>,
}

/// An idle connection plus its expiry timer.
pub(super) struct IdleEntry<D: Driver> {
    pub(super) bundle: PoolDriver<D>,
    pub(super) timer: Option<JoinHandle<()>>,
}

impl<D: Driver> IdleEntry<D> {
    /// Cancel the timer and take the connection back out.
    pub(super) fn into_bundle(mut self) -> PoolDriver<D> {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.bundle
    }
}

pub(super) struct PoolState<F: DriverFactory> {
    pub(super) total: HashSet<ConnectionId>,
    pub(super) idle: VecDeque<IdleEntry<F::Driver>>,
    pub(super) waiting: VecDeque<Waiter<F>>,
    pub(super) ending: bool,
}

impl<F: DriverFactory> PoolState<F> {
    pub(super) fn new() -> Self {
        Self {
            total: HashSet::new(),
            idle: VecDeque::new(),
            waiting: VecDeque::new(),
            ending: false,
        }
    }

    /// Splice an idle entry out by id, wherever it sits.
    pub(super) fn take_idle_by_id(&mut self, id: ConnectionId) -> Option<IdleEntry<F::Driver>> {
        let position = self.idle.iter().position(|entry| entry.bundle.id == id)?;
        self.idle.remove(position)
    }

    /// Remove a waiter by id, not by position; a concurrent dequeue must
    /// never drop the wrong waiter.
    pub(super) fn remove_waiter(&mut self, waiter_id: u64) -> bool {
        match self.waiting.iter().position(|waiter| waiter.id == waiter_id) {
            Some(position) => {
                self.waiting.remove(position);
                true
            }
            None => false,
        }
    }
}
