//! Tiered key/value cache.
//!
//! A Redis tier backed by a bounded connection pool is preferred; a
//! local-file tier takes over, per call, whenever Redis is unreachable.
//! Operations hand back a [`Deferred`] result, and batches of commands run as
//! pipelines or transactions over a single leased connection.
//!
//! On top of the cache sit a fixed-window [`RateLimiter`] and the
//! [`Maintenance`] actions driven by the `cachet` CLI.

pub mod cache;
pub mod clock;
pub mod codec;
pub mod command;
pub mod config;
pub mod deferred;
pub mod error;
pub mod file;
pub mod key;
pub mod maintenance;
pub mod metrics;
pub mod observability;
pub mod pool;
pub mod rate_limit;
pub mod remote;
pub mod store;
pub mod tier;

pub use cache::{Cache, CacheBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{Batch, BatchMode, Command, CommandDescriptor, Reply};
pub use config::CacheSettings;
pub use deferred::{Deferred, Settler};
pub use error::{CacheError, CacheResult, ErrorCategory};
pub use file::FileStore;
pub use key::Keyspace;
pub use maintenance::{Action, ActionOutcome, Directives, Maintenance, MaintenanceReport};
pub use pool::{ConnectionPool, Lease, PoolConfig, PoolStatus};
pub use rate_limit::{RateLimitDecision, RateLimitPolicy, RateLimiter};
pub use remote::{RedisPool, RemoteStore};
pub use store::{CacheStore, TimeToLive};
pub use tier::Tier;
