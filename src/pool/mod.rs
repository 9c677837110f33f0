//! Pool state machine and failure-handling policies.
//!
//! Architecture:
//! - `inner`: the mutex-protected state sets (total / idle / waiting)
//! - `connection`: the checked-out connection wrapper and identity
//! - `pool`: acquire/release protocol, connect-with-retry, query-with-retry

mod connection;
mod inner;
#[allow(clippy::module_inception)]
mod pool;


pub use connection::{ConnectionId, PooledConnection};
pub use pool::Pool;
