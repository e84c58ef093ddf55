//! Local-file tier.
//!
//! ## Layout
//!
//! One file per entry in a dedicated directory (created on demand):
//!
//! ```text
//! <root>/<sha256(prefixed key)>.entry   MessagePack { key, expires_at, value }
//! <root>/<sha256(prefixed key)>.lock    held during read-modify-write
//! <root>/.transaction.lock              held for the length of a transaction
//! ```
//!
//! The filesystem has no native expiry, so each entry records its own
//! `expires_at` (Unix milliseconds). Expired entries read as absent and are
//! removed lazily; [`CacheStore::sweep`] removes the rest.
//!
//! Writes go to a temporary file that is then renamed over the entry, so a
//! reader sees either the old or the new entry, never a torn one. Counter
//! updates, `add` and `expire` hold an exclusive per-key lock file, created
//! with `create_new`, which also serializes separate processes sharing the
//! directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::command::{Batch, BatchMode, Reply};
use crate::config::FileTierConfig;
use crate::error::{CacheError, CacheResult};
use crate::key::Keyspace;
use crate::store::{self, CacheStore, TimeToLive, ttl_millis};
use crate::tier::Tier;

const ENTRY_EXT: &str = "entry";
const LOCK_EXT: &str = "lock";
const TRANSACTION_LOCK: &str = ".transaction.lock";
const LOCK_RETRY: Duration = Duration::from_millis(5);
/// A lock older than this many lock timeouts is treated as left behind by a
/// crashed holder.
const STALE_LOCK_FACTOR: u32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    key: String,
    expires_at: Option<i64>,
    value: Vec<u8>,
}

impl FileEntry {
    fn is_live(&self, now_ms: i64) -> bool {
        self.expires_at.is_none_or(|at| at > now_ms)
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    keyspace: Keyspace,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
}

fn io_error(operation: &'static str, e: std::io::Error) -> CacheError {
    CacheError::backend(Tier::File, operation, e.to_string())
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, keyspace: Keyspace) -> Self {
        Self {
            root: root.into(),
            keyspace,
            clock: Arc::new(SystemClock),
            lock_timeout: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &FileTierConfig, keyspace: Keyspace) -> Self {
        Self::new(config.path.clone(), keyspace).with_lock_timeout(config.lock_timeout())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_stem(&self, key: &str) -> String {
        hex::encode(Sha256::digest(self.keyspace.key(key).as_bytes()))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{ENTRY_EXT}", self.file_stem(key)))
    }

    fn lock_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{LOCK_EXT}", self.file_stem(key)))
    }

    fn expires_at(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl_millis(ttl).map(|ms| {
            self.clock
                .now_millis()
                .saturating_add(i64::try_from(ms).unwrap_or(i64::MAX))
        })
    }

    async fn ensure_root(&self, operation: &'static str) -> CacheResult<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| io_error(operation, e))
    }

    async fn read_path(&self, path: &Path, operation: &'static str) -> CacheResult<Option<FileEntry>> {
        match fs::read(path).await {
            Ok(bytes) => codec::decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(operation, e)),
        }
    }

    /// The live entry for `key`, removing it if it has expired.
    async fn read_live(&self, key: &str, operation: &'static str) -> CacheResult<Option<FileEntry>> {
        let path = self.entry_path(key);
        let Some(entry) = self.read_path(&path, operation).await? else {
            return Ok(None);
        };
        if entry.key != self.keyspace.key(key) {
            return Ok(None);
        }
        if entry.is_live(self.clock.now_millis()) {
            return Ok(Some(entry));
        }
        remove_if_present(&path)
            .await
            .map_err(|e| io_error(operation, e))?;
        Ok(None)
    }

    async fn write(&self, entry: &FileEntry, raw_key: &str, operation: &'static str) -> CacheResult<()> {
        self.ensure_root(operation).await?;
        let bytes = codec::encode(entry)?;
        let path = self.entry_path(raw_key);
        let tmp = self
            .root
            .join(format!(".{}.{}.tmp", self.file_stem(raw_key), uuid::Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(operation, e));
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(io_error(operation, e));
        }
        Ok(())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
        operation: &'static str,
    ) -> CacheResult<()> {
        let entry = FileEntry {
            key: self.keyspace.key(key),
            expires_at: self.expires_at(ttl),
            value,
        };
        self.write(&entry, key, operation).await
    }

    async fn lock_key(&self, key: &str, operation: &'static str) -> CacheResult<LockFile> {
        self.ensure_root(operation).await?;
        LockFile::acquire(self.lock_path(key), self.lock_timeout, operation).await
    }

    /// Every entry file in the directory.
    async fn entry_files(&self, operation: &'static str) -> CacheResult<Vec<PathBuf>> {
        let mut dir = match fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(operation, e)),
        };
        let mut paths = Vec::new();
        while let Some(dirent) = dir.next_entry().await.map_err(|e| io_error(operation, e))? {
            let path = dirent.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Exclusive lock held as long as the lock file exists.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    async fn acquire(path: PathBuf, timeout: Duration, operation: &'static str) -> CacheResult<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if Self::is_stale(&path, timeout).await {
                        tracing::warn!(path = %path.display(), "breaking stale cache lock");
                        let _ = fs::remove_file(&path).await;
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(CacheError::backend(
                            Tier::File,
                            operation,
                            format!("timed out waiting for lock {}", path.display()),
                        ));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(io_error(operation, e)),
            }
        }
    }

    async fn is_stale(path: &Path, timeout: Duration) -> bool {
        let Ok(meta) = fs::metadata(path).await else {
            return false;
        };
        meta.modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > timeout * STALE_LOCK_FACTOR)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[async_trait]
impl CacheStore for FileStore {
    fn tier(&self) -> Tier {
        Tier::File
    }

    fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    async fn is_available(&self) -> bool {
        if fs::create_dir_all(&self.root).await.is_err() {
            return false;
        }
        match fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(_) => false,
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.read_live(key, "get").await?.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        self.put(key, value, ttl, "set").await?;
        Ok(true)
    }

    async fn add(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> CacheResult<bool> {
        let _lock = self.lock_key(key, "add").await?;
        if self.read_live(key, "add").await?.is_some() {
            return Ok(false);
        }
        self.put(key, value, ttl, "add").await?;
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let live = self.read_live(key, "delete").await?.is_some();
        if !live {
            return Ok(false);
        }
        remove_if_present(&self.entry_path(key))
            .await
            .map_err(|e| io_error("delete", e))
    }

    async fn get_many(&self, keys: &[String]) -> CacheResult<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set_many(
        &self,
        items: Vec<(String, Vec<u8>)>,
        ttl: Option<Duration>,
    ) -> CacheResult<bool> {
        let mut all_written = true;
        for (key, value) in items {
            if let Err(e) = self.put(&key, value, ttl, "multi_set").await {
                tracing::warn!(key = %key, error = %e, "file tier multi_set write failed");
                all_written = false;
            }
        }
        Ok(all_written)
    }

    async fn exists(&self, keys: &[String]) -> CacheResult<u64> {
        let mut present = 0;
        for key in keys {
            if self.read_live(key, "exists").await?.is_some() {
                present += 1;
            }
        }
        Ok(present)
    }

    async fn ttl(&self, key: &str) -> CacheResult<TimeToLive> {
        Ok(match self.read_live(key, "ttl").await? {
            None => TimeToLive::Missing,
            Some(FileEntry {
                expires_at: None, ..
            }) => TimeToLive::Persistent,
            Some(FileEntry {
                expires_at: Some(at),
                ..
            }) => {
                let left = at.saturating_sub(self.clock.now_millis()).max(0);
                TimeToLive::Expires(Duration::from_millis(left as u64))
            }
        })
    }

    async fn increment(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let _lock = self.lock_key(key, "increment").await?;
        let (current, expires_at) = match self.read_live(key, "increment").await? {
            Some(entry) => (codec::decode_counter(&entry.value)?, entry.expires_at),
            None => (0, None),
        };
        let next = current.checked_add(delta).ok_or_else(|| {
            CacheError::backend(Tier::File, "increment", "increment would overflow")
        })?;
        let entry = FileEntry {
            key: self.keyspace.key(key),
            expires_at,
            value: codec::encode_counter(next),
        };
        self.write(&entry, key, "increment").await?;
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        let _lock = self.lock_key(key, "expire").await?;
        let Some(mut entry) = self.read_live(key, "expire").await? else {
            return Ok(false);
        };
        let expires_at = self.expires_at(ttl);
        if expires_at.is_none() && entry.expires_at.is_none() {
            return Ok(false);
        }
        entry.expires_at = expires_at;
        self.write(&entry, key, "expire").await?;
        Ok(true)
    }

    /// Run a batch in order.
    ///
    /// A transaction holds the tier-wide transaction lock, which only
    /// serializes it against other transactions. Plain reads and writes do
    /// not take that lock and may observe a transaction half-applied, and a
    /// failure part-way does not roll back earlier commands.
    async fn execute(&self, batch: &Batch) -> CacheResult<Vec<Reply>> {
        let operation = batch.mode().as_str();
        let _lock = match batch.mode() {
            BatchMode::Transaction => {
                self.ensure_root(operation).await?;
                Some(
                    LockFile::acquire(
                        self.root.join(TRANSACTION_LOCK),
                        self.lock_timeout,
                        operation,
                    )
                    .await?,
                )
            }
            BatchMode::Pipeline => None,
        };
        let mut replies = Vec::with_capacity(batch.len());
        for command in batch.commands() {
            replies.push(store::apply(self, command).await?);
        }
        Ok(replies)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut removed = 0;
        for path in self.entry_files("clear").await? {
            let owned = match self.read_path(&path, "clear").await {
                Ok(Some(entry)) => self.keyspace.owns(&entry.key),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache entry");
                    false
                }
            };
            if owned && remove_if_present(&path).await.map_err(|e| io_error("clear", e))? {
                removed += 1;
            }
        }
        tracing::debug!(root = %self.root.display(), removed, "file tier cleared");
        Ok(removed)
    }

    async fn sweep(&self) -> CacheResult<u64> {
        let now = self.clock.now_millis();
        let mut removed = 0;
        for path in self.entry_files("cleanup").await? {
            match self.read_path(&path, "cleanup").await {
                Ok(Some(entry)) if !entry.is_live(now) => {
                    if remove_if_present(&path)
                        .await
                        .map_err(|e| io_error("cleanup", e))?
                    {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable cache entry");
                }
            }
        }
        tracing::debug!(root = %self.root.display(), removed, "file tier swept");
        Ok(removed)
    }
}
