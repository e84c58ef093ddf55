//! Remote (Redis) tier.
//!
//! Every call leases one pooled connection for its whole duration, including
//! batched calls: a pipeline of ten commands uses one lease and one round
//! trip. The lease is released when it goes out of scope, on success and on
//! error alike. Transport failures (connection refused/dropped, timeouts) are
//! reported as [`CacheError::ConnectionUnavailable`] so the caller may fall
//! back to another tier; the broken connection is discarded rather than
//! returned to the pool.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Manager;
use redis::{FromRedisValue, RedisError, Value};

use crate::command::{Batch, BatchMode, Command, Reply};
use crate::config::RemoteTierConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::Keyspace;
use crate::pool::{ConnectionPool, Lease, PoolConfig};
use crate::store::{CacheStore, TimeToLive, ttl_millis};
use crate::tier::Tier;

pub type RedisPool = ConnectionPool<Manager>;

const SCAN_BATCH: usize = 500;

#[derive(Debug, Clone)]
pub struct RemoteStore {
    pool: RedisPool,
    keyspace: Keyspace,
}

impl RemoteStore {
    /// Build the store without touching the network; an unreachable server
    /// only surfaces on first use.
    pub fn connect(config: &RemoteTierConfig, keyspace: Keyspace) -> CacheResult<Self> {
        let manager = Manager::new(config.url())
            .map_err(|e| CacheError::config(format!("invalid remote tier address: {e}")))?;
        let pool = ConnectionPool::new(
            Tier::Remote,
            manager,
            PoolConfig {
                max_size: config.pool_size,
                timeout: config.timeout(),
            },
        )?;
        tracing::debug!(host = %config.host, port = config.port, pool_size = config.pool_size, "remote tier configured");
        Ok(Self::with_pool(pool, keyspace))
    }

    pub fn with_pool(pool: RedisPool, keyspace: Keyspace) -> Self {
        Self { pool, keyspace }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    async fn query<T: FromRedisValue>(
        &self,
        operation: &'static str,
        cmd: &redis::Cmd,
    ) -> CacheResult<T> {
        let mut lease = self.pool.lease().await?;
        let result: Result<T, RedisError> = cmd.query_async(&mut *lease).await;
        result.map_err(|e| release_failed(lease, operation, &e))
    }

    async fn query_pipeline(
        &self,
        operation: &'static str,
        pipe: &redis::Pipeline,
    ) -> CacheResult<Vec<Value>> {
        let mut lease = self.pool.lease().await?;
        let result: Result<Vec<Value>, RedisError> = pipe.query_async(&mut *lease).await;
        result.map_err(|e| release_failed(lease, operation, &e))
    }
}

/// Map `e`, discarding the connection when the transport failed.
fn release_failed<M: deadpool::managed::Manager>(
    lease: Lease<M>,
    operation: &'static str,
    e: &RedisError,
) -> CacheError {
    let error = map_redis_error(operation, e);
    if error.is_unavailable() {
        lease.discard();
    }
    error
}

fn map_redis_error(operation: &'static str, e: &RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        tracing::warn!(operation, error = %e, "Redis connection error");
        CacheError::unavailable(Tier::Remote, e.to_string())
    } else {
        tracing::warn!(operation, error = %e, "Redis command error");
        CacheError::backend(Tier::Remote, operation, e.to_string())
    }
}

fn set_cmd(key: &str, value: &[u8], ttl: Option<Duration>, only_if_absent: bool) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(key).arg(value);
    if let Some(ms) = ttl_millis(ttl) {
        cmd.arg("PX").arg(ms);
    }
    if only_if_absent {
        cmd.arg("NX");
    }
    cmd
}

fn expire_cmd(key: &str, ttl: Option<Duration>) -> redis::Cmd {
    match ttl_millis(ttl) {
        Some(ms) => {
            let mut cmd = redis::cmd("PEXPIRE");
            cmd.arg(key).arg(ms);
            cmd
        }
        None => {
            let mut cmd = redis::cmd("PERSIST");
            cmd.arg(key);
            cmd
        }
    }
}

fn pttl_to_ttl(ms: i64) -> TimeToLive {
    match ms {
        -2 => TimeToLive::Missing,
        n if n < 0 => TimeToLive::Persistent,
        n => TimeToLive::Expires(Duration::from_millis(n as u64)),
    }
}

/// Translate a raw reply into the shape the command promises.
fn to_reply(command: &Command, value: &Value) -> CacheResult<Reply> {
    let convert = |e: RedisError| CacheError::backend(Tier::Remote, command.name(), e.to_string());
    Ok(match command {
        Command::Get { .. } => {
            Reply::Value(redis::from_redis_value::<Option<Vec<u8>>>(value).map_err(convert)?)
        }
        Command::Set { .. } | Command::Add { .. } => {
            Reply::Bool(redis::from_redis_value::<Option<String>>(value).map_err(convert)?.is_some())
        }
        Command::Delete { .. } | Command::Expire { .. } => {
            Reply::Bool(redis::from_redis_value::<i64>(value).map_err(convert)? > 0)
        }
        Command::Exists { .. } | Command::Increment { .. } => {
            Reply::Integer(redis::from_redis_value::<i64>(value).map_err(convert)?)
        }
        Command::Ttl { .. } => {
            Reply::Ttl(pttl_to_ttl(redis::from_redis_value::<i64>(value).map_err(convert)?))
        }
    })
}

#[async_trait]
impl CacheStore for RemoteStore {
    fn tier(&self) -> Tier {
        Tier::Remote
    }

    fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    async fn is_available(&self) -> bool {
        // Leasing runs the pool's health check on idle connections.
        self.pool.lease().await.is_ok()
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.keyspace.key(key));
        self.query("get", &cmd).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let cmd = set_cmd(&self.keyspace.key(key), &value, ttl, false);
        let reply: Option<String> = self.query("set", &cmd).await?;
        Ok(reply.is_some())
    }

    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let cmd = set_cmd(&self.keyspace.key(key), &value, ttl, true);
        let reply: Option<String> = self.query("add", &cmd).await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.keyspace.key(key));
        let removed: u64 = self.query("delete", &cmd).await?;
        Ok(removed > 0)
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("MGET");
        cmd.arg(self.keyspace.keys(keys));
        let values: Vec<Option<Vec<u8>>> = self.query("multi_get", &cmd).await?;
        if values.len() != keys.len() {
            return Err(CacheError::backend(
                Tier::Remote,
                "multi_get",
                format!("expected {} values, got {}", keys.len(), values.len()),
            ));
        }
        Ok(values)
    }

    async fn set_many(
        &self,
        items: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        if items.is_empty() {
            return Ok(true);
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in &items {
            pipe.add_command(set_cmd(&self.keyspace.key(key), value, ttl, false));
        }
        let replies = self.query_pipeline("multi_set", &pipe).await?;
        let all_written = replies.len() == items.len()
            && replies
                .iter()
                .all(|v| matches!(redis::from_redis_value::<Option<String>>(v), Ok(Some(_))));
        if !all_written {
            tracing::warn!(count = items.len(), "Redis multi_set did not confirm every write");
        }
        Ok(all_written)
    }

    async fn exists(&self, keys: &[String]) -> CacheResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("EXISTS");
        cmd.arg(self.keyspace.keys(keys));
        self.query("exists", &cmd).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<TimeToLive> {
        let mut cmd = redis::cmd("PTTL");
        cmd.arg(self.keyspace.key(key));
        let ms: i64 = self.query("ttl", &cmd).await?;
        Ok(pttl_to_ttl(ms))
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut cmd = redis::cmd("INCRBY");
        cmd.arg(self.keyspace.key(key)).arg(delta);
        self.query("increment", &cmd).await
    }

    async fn expire(&self, key: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        let changed: i64 = self
            .query("expire", &expire_cmd(&self.keyspace.key(key), ttl))
            .await?;
        Ok(changed > 0)
    }

    async fn execute(&self, batch: &Batch) -> CacheResult<Vec<Reply>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        if batch.mode() == BatchMode::Transaction {
            pipe.atomic();
        }
        for command in batch.commands() {
            let cmd = match command {
                Command::Get { key } => {
                    let mut cmd = redis::cmd("GET");
                    cmd.arg(self.keyspace.key(key));
                    cmd
                }
                Command::Set { key, value, ttl } => {
                    set_cmd(&self.keyspace.key(key), value, *ttl, false)
                }
                Command::Add { key, value, ttl } => {
                    set_cmd(&self.keyspace.key(key), value, *ttl, true)
                }
                Command::Delete { key } => {
                    let mut cmd = redis::cmd("DEL");
                    cmd.arg(self.keyspace.key(key));
                    cmd
                }
                Command::Exists { keys } => {
                    let mut cmd = redis::cmd("EXISTS");
                    cmd.arg(self.keyspace.keys(keys));
                    cmd
                }
                Command::Ttl { key } => {
                    let mut cmd = redis::cmd("PTTL");
                    cmd.arg(self.keyspace.key(key));
                    cmd
                }
                Command::Increment { key, delta } => {
                    let mut cmd = redis::cmd("INCRBY");
                    cmd.arg(self.keyspace.key(key)).arg(*delta);
                    cmd
                }
                Command::Expire { key, ttl } => expire_cmd(&self.keyspace.key(key), *ttl),
            };
            pipe.add_command(cmd);
        }

        let operation = batch.mode().as_str();
        let values = self.query_pipeline(operation, &pipe).await?;
        if values.len() != batch.len() {
            return Err(CacheError::backend(
                Tier::Remote,
                operation,
                format!("expected {} replies, got {}", batch.len(), values.len()),
            ));
        }
        batch
            .commands()
            .iter()
            .zip(values.iter())
            .map(|(command, value)| to_reply(command, value))
            .collect()
    }

    async fn clear(&self) -> CacheResult<u64> {
        let pattern = self.keyspace.scan_pattern();
        let mut lease = self.pool.lease().await?;
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let mut scan = redis::cmd("SCAN");
            scan.arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH);
            let page: Result<(u64, Vec<String>), RedisError> = scan.query_async(&mut *lease).await;
            let (next, keys) = match page {
                Ok(page) => page,
                Err(e) => return Err(release_failed(lease, "clear", &e)),
            };
            if !keys.is_empty() {
                let mut del = redis::cmd("DEL");
                del.arg(&keys);
                let count: Result<u64, RedisError> = del.query_async(&mut *lease).await;
                match count {
                    Ok(count) => removed += count,
                    Err(e) => return Err(release_failed(lease, "clear", &e)),
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(prefix = %self.keyspace.prefix(), removed, "remote tier cleared");
        Ok(removed)
    }

    async fn sweep(&self) -> CacheResult<u64> {
        // Redis expires entries natively.
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool::managed::{Metrics, RecycleResult};
    use std::io;

    struct Sockets;

    impl deadpool::managed::Manager for Sockets {
        type Type = ();
        type Error = io::Error;

        async fn create(&self) -> Result<(), io::Error> {
            Ok(())
        }

        async fn recycle(&self, _conn: &mut (), _: &Metrics) -> RecycleResult<io::Error> {
            Ok(())
        }
    }

    fn sockets() -> ConnectionPool<Sockets> {
        ConnectionPool::new(Tier::Remote, Sockets, PoolConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn transport_failure_discards_connection() {
        let pool = sockets();
        let lease = pool.lease().await.unwrap();
        let refused = RedisError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));

        let err = release_failed(lease, "clear", &refused);
        assert!(err.is_unavailable());
        assert_eq!(pool.status().size, 0);
    }

    #[tokio::test]
    async fn command_failure_keeps_connection() {
        let pool = sockets();
        let lease = pool.lease().await.unwrap();
        let wrong_type = RedisError::from((redis::ErrorKind::TypeError, "wrong type"));

        let err = release_failed(lease, "clear", &wrong_type);
        assert!(!err.is_unavailable());
        assert_eq!(pool.status().size, 1);
        assert_eq!(pool.status().available, 1);
    }

    #[test]
    fn pttl_sentinels() {
        assert_eq!(pttl_to_ttl(-2), TimeToLive::Missing);
        assert_eq!(pttl_to_ttl(-1), TimeToLive::Persistent);
        assert_eq!(pttl_to_ttl(0), TimeToLive::Expires(Duration::ZERO));
        assert_eq!(
            pttl_to_ttl(1500),
            TimeToLive::Expires(Duration::from_millis(1500))
        );
    }

    #[test]
    fn set_command_carries_ttl_and_nx() {
        let packed = set_cmd("k", b"v", Some(Duration::from_secs(2)), true).get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(text.contains("PX"));
        assert!(text.contains("2000"));
        assert!(text.contains("NX"));

        let packed = set_cmd("k", b"v", None, false).get_packed_command();
        let text = String::from_utf8_lossy(&packed);
        assert!(!text.contains("PX"));
        assert!(!text.contains("NX"));
    }

    #[test]
    fn expire_without_ttl_persists() {
        let packed = expire_cmd("k", None).get_packed_command();
        assert!(String::from_utf8_lossy(&packed).contains("PERSIST"));
        let packed = expire_cmd("k", Some(Duration::from_secs(1))).get_packed_command();
        assert!(String::from_utf8_lossy(&packed).contains("PEXPIRE"));
    }

    #[test]
    fn replies_are_shaped_per_command() {
        let reply = to_reply(&Command::get("a"), &Value::Nil).unwrap();
        assert_eq!(reply, Reply::Value(None));

        let reply = to_reply(&Command::delete("a"), &Value::Int(1)).unwrap();
        assert_eq!(reply, Reply::Bool(true));

        let reply = to_reply(&Command::ttl("a"), &Value::Int(-1)).unwrap();
        assert_eq!(reply, Reply::Ttl(TimeToLive::Persistent));

        let add = Command::Add {
            key: "a".into(),
            value: vec![1],
            ttl: None,
        };
        let reply = to_reply(&add, &Value::Nil).unwrap();
        assert_eq!(reply, Reply::Bool(false));

        let reply = to_reply(&Command::increment("a", 2), &Value::Int(7)).unwrap();
        assert_eq!(reply, Reply::Integer(7));
    }

    #[tokio::test]
    async fn unreachable_server_is_unavailable_not_a_panic() {
        let config = RemoteTierConfig {
            host: "127.0.0.1".into(),
            port: 1,
            timeout_ms: 500,
            ..Default::default()
        };
        let store = RemoteStore::connect(&config, Keyspace::new("t:")).unwrap();
        assert!(!store.is_available().await);

        let err = store.get("anything").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(store.pool().status().in_flight(), 0);
    }
}
