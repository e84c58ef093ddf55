use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::key::Keyspace;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Global key prefix; identifies the deployment.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// TTL used by calls that do not pass one. `0` means no expiry.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Remote (Redis) tier
    #[serde(default)]
    pub remote: RemoteTierConfig,

    /// Local-file tier
    #[serde(default)]
    pub file: FileTierConfig,

    /// Rate limiter policy
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_prefix() -> String {
    "cachet:".to_string()
}

fn default_ttl_secs() -> u64 {
    3600 // 1 hour
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            default_ttl_secs: default_ttl_secs(),
            remote: RemoteTierConfig::default(),
            file: FileTierConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !self.remote.enabled && !self.file.enabled {
            return Err("at least one of remote.enabled or file.enabled must be true".into());
        }
        if self.remote.enabled {
            if self.remote.host.is_empty() {
                return Err("remote.host must not be empty".into());
            }
            if self.remote.port == 0 {
                return Err("remote.port must be > 0".into());
            }
            if self.remote.pool_size == 0 {
                return Err("remote.pool_size must be > 0".into());
            }
            if self.remote.timeout_ms == 0 {
                return Err("remote.timeout_ms must be > 0".into());
            }
        }
        if self.file.enabled && self.file.path.as_os_str().is_empty() {
            return Err("file.path must not be empty".into());
        }
        if self.rate_limit.limit == 0 {
            return Err("rate_limit.limit must be > 0".into());
        }
        if self.rate_limit.window_secs == 0 {
            return Err("rate_limit.window_secs must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Default TTL as passed to cache calls; `None` when configured as `0`.
    pub fn default_ttl(&self) -> Option<Duration> {
        (self.default_ttl_secs > 0).then(|| Duration::from_secs(self.default_ttl_secs))
    }

    pub fn remote_keyspace(&self) -> Keyspace {
        Keyspace::resolve(self.remote.prefix.as_deref(), &self.prefix)
    }

    pub fn file_keyspace(&self) -> Keyspace {
        Keyspace::resolve(self.file.prefix.as_deref(), &self.prefix)
    }

    /// Parse settings from a TOML document, applying defaults for missing fields.
    pub fn from_toml_str(s: &str) -> Result<Self, String> {
        let settings: CacheSettings =
            toml::from_str(s).map_err(|e| format!("config parse error: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Remote tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTierConfig {
    /// Enable the remote tier (the file tier serves everything without it)
    #[serde(default = "default_remote_enabled")]
    pub enabled: bool,

    #[serde(default = "default_remote_host")]
    pub host: String,

    #[serde(default = "default_remote_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub database: i64,

    /// Key prefix for this tier; falls back to the global prefix
    #[serde(default)]
    pub prefix: Option<String>,

    /// Maximum number of pooled connections
    #[serde(default = "default_remote_pool_size")]
    pub pool_size: usize,

    /// Connect/wait/recycle timeout in milliseconds
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_remote_enabled() -> bool {
    true
}

fn default_remote_host() -> String {
    "127.0.0.1".to_string()
}

fn default_remote_port() -> u16 {
    6379
}

fn default_remote_pool_size() -> usize {
    10
}

fn default_remote_timeout_ms() -> u64 {
    5000
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            enabled: default_remote_enabled(),
            host: default_remote_host(),
            port: default_remote_port(),
            password: None,
            database: 0,
            prefix: None,
            pool_size: default_remote_pool_size(),
            timeout_ms: default_remote_timeout_ms(),
        }
    }
}

impl RemoteTierConfig {
    /// Connection URL for the Redis client, e.g. `redis://:secret@host:6379/0`.
    pub fn url(&self) -> String {
        match self.password.as_deref() {
            Some(password) if !password.is_empty() => format!(
                "redis://:{}@{}:{}/{}",
                urlencoding::encode(password),
                self.host,
                self.port,
                self.database
            ),
            _ => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Local-file tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTierConfig {
    #[serde(default = "default_file_enabled")]
    pub enabled: bool,

    /// Directory holding one file per entry; created on demand
    #[serde(default = "default_file_path")]
    pub path: PathBuf,

    #[serde(default)]
    pub prefix: Option<String>,

    /// How long to wait for a per-key lock before failing
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_file_enabled() -> bool {
    true
}

fn default_file_path() -> PathBuf {
    std::env::temp_dir().join("cachet")
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

impl Default for FileTierConfig {
    fn default() -> Self {
        Self {
            enabled: default_file_enabled(),
            path: default_file_path(),
            prefix: None,
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl FileTierConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Rate limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    #[serde(default = "default_rate_limit")]
    pub limit: u64,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Prepended to the client identity to form the counter key
    #[serde(default = "default_rate_limit_prefix")]
    pub prefix: String,
}

fn default_rate_limit() -> u64 {
    100
}

fn default_window_secs() -> u64 {
    60
}

fn default_rate_limit_prefix() -> String {
    "rate_limit:".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: default_rate_limit(),
            window_secs: default_window_secs(),
            prefix: default_rate_limit_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::CacheSettings;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub fn load_config(path: Option<&str>) -> Result<CacheSettings, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(format!("config file not found: {p}"));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("cachet.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., CACHET__REMOTE__HOST=redis.internal
        builder = builder.add_source(
            Environment::with_prefix("CACHET")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<CacheSettings, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
