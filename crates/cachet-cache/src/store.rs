//! The byte-level operation set every tier implements.
//!
//! Stores receive raw keys and apply their own [`Keyspace`] prefix. Payloads
//! are already encoded; typed access lives in [`Cache`](crate::Cache).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::command::{Batch, Command, Reply};
use crate::error::CacheResult;
use crate::key::Keyspace;
use crate::tier::Tier;

/// Remaining lifetime of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeToLive {
    /// Expires after the given duration.
    Expires(Duration),
    /// Present with no expiry.
    Persistent,
    /// No such entry.
    Missing,
}

impl TimeToLive {
    pub fn remaining(&self) -> Option<Duration> {
        match self {
            TimeToLive::Expires(d) => Some(*d),
            _ => None,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, TimeToLive::Missing)
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync + fmt::Debug {
    fn tier(&self) -> Tier;

    fn keyspace(&self) -> &Keyspace;

    /// Whether the tier can serve requests right now.
    async fn is_available(&self) -> bool;

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Store only if the key is absent (or expired). Returns whether it stored.
    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Returns `true` iff an entry was removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// One result per input key, in input order.
    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>>;

    /// All-or-nothing batched write; `true` only if every write succeeded.
    async fn set_many(
        &self,
        items: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool>;

    /// Number of the given keys currently present.
    async fn exists(&self, keys: &[String]) -> CacheResult<u64>;

    async fn ttl(&self, key: &str) -> CacheResult<TimeToLive>;

    /// Atomically add `delta` to an integer counter, creating it (without
    /// expiry) when absent. Returns the new value.
    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Set (`Some`) or remove (`None`) the expiry of an existing entry.
    /// Returns `true` iff the expiry changed.
    async fn expire(&self, key: &str, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Run a pipeline or transaction, returning replies in command order.
    async fn execute(&self, batch: &Batch) -> CacheResult<Vec<Reply>>;

    /// Remove every entry in this tier's keyspace. Returns how many.
    async fn clear(&self) -> CacheResult<u64>;

    /// Remove entries whose TTL has elapsed. Returns how many.
    async fn sweep(&self) -> CacheResult<u64>;
}

/// Run one command through the store's regular operations.
pub(crate) async fn apply<S: CacheStore + ?Sized>(store: &S, command: &Command) -> CacheResult<Reply> {
    Ok(match command {
        Command::Get { key } => Reply::Value(store.get(key).await?),
        Command::Set { key, value, ttl } => Reply::Bool(store.set(key, value.clone(), *ttl).await?),
        Command::Add { key, value, ttl } => Reply::Bool(store.add(key, value.clone(), *ttl).await?),
        Command::Delete { key } => Reply::Bool(store.delete(key).await?),
        Command::Exists { keys } => Reply::Integer(store.exists(keys).await? as i64),
        Command::Ttl { key } => Reply::Ttl(store.ttl(key).await?),
        Command::Increment { key, delta } => Reply::Integer(store.increment(key, *delta).await?),
        Command::Expire { key, ttl } => Reply::Bool(store.expire(key, *ttl).await?),
    })
}

/// TTL in whole milliseconds, or `None` for "no expiry".
pub(crate) fn ttl_millis(ttl: Option<Duration>) -> Option<u64> {
    match ttl {
        Some(d) if !d.is_zero() => Some(u64::try_from(d.as_millis()).unwrap_or(u64::MAX).max(1)),
        _ => None,
    }
}
