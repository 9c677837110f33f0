//! Failover-aware connection pooling for PostgreSQL wire-protocol clients.
//!
//! Multiplexes many logical query requests onto a bounded set of physical
//! database sessions:
//! - Fair FIFO queueing: a released connection is handed directly to the
//!   oldest waiter, never stolen by a newer acquire.
//! - Idle reaping with per-connection timers and bounded connect and wait
//!   timeouts.
//! - Cluster-failover-aware retries: transient connect errors, "database
//!   system is starting up", read-only transactions after a failover, and
//!   dropped connections.
//! - `@name` named-parameter rewriting into the positional `$N` form
//!   drivers expect.
//!
//! Architecture:
//! - `options`: validated pool configuration
//! - `driver`: the session traits the pool manages
//! - `events`: typed lifecycle event stream
//! - `pool`: state machine, acquire/release protocol, retry loops
//! - `named_params`: `@name` → `$N` rewriting

mod driver;
mod error;
mod events;
mod named_params;
mod options;
mod pool;

pub use driver::{Driver, DriverError, DriverFactory, DriverResult, ErrorSink};
pub use error::{PoolError, Result};
pub use events::PoolEvent;
pub use named_params::Params;
pub use options::{ParameterNameFn, PoolOptions, ReplaceRegexFn};
pub use pool::{ConnectionId, Pool, PooledConnection};
