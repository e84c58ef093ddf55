//! Batched commands for pipelines and transactions.
//!
//! A [`Command`] is one of a closed set of operations. Value-bearing commands
//! are encoded when constructed, and [`CommandDescriptor`]s (the
//! `{ method, args }` wire form) are validated when converted, so a malformed
//! batch is rejected before any connection is leased.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{CacheError, CacheResult};
use crate::store::TimeToLive;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Get {
        key: String,
    },
    Set {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    /// Set only if the key is absent.
    Add {
        key: String,
        value: Vec<u8>,
        ttl: Option<Duration>,
    },
    Delete {
        key: String,
    },
    Exists {
        keys: Vec<String>,
    },
    Ttl {
        key: String,
    },
    Increment {
        key: String,
        delta: i64,
    },
    Expire {
        key: String,
        ttl: Option<Duration>,
    },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn set<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<Self> {
        Ok(Self::Set {
            key: key.into(),
            value: codec::encode(value)?,
            ttl,
        })
    }

    pub fn add<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<Self> {
        Ok(Self::Add {
            key: key.into(),
            value: codec::encode(value)?,
            ttl,
        })
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::Delete { key: key.into() }
    }

    pub fn exists<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::Exists {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ttl(key: impl Into<String>) -> Self {
        Self::Ttl { key: key.into() }
    }

    pub fn increment(key: impl Into<String>, delta: i64) -> Self {
        Self::Increment {
            key: key.into(),
            delta,
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self::Expire {
            key: key.into(),
            ttl,
        }
    }

    /// Method name as accepted by [`CommandDescriptor`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Set { .. } => "set",
            Self::Add { .. } => "add",
            Self::Delete { .. } => "delete",
            Self::Exists { .. } => "exists",
            Self::Ttl { .. } => "ttl",
            Self::Increment { .. } => "increment",
            Self::Expire { .. } => "expire",
        }
    }
}

/// `{ "method": "set", "args": ["key", {"any": "value"}, 60] }`
///
/// TTL arguments are whole seconds; `0` or `null` means no expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub method: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

impl CommandDescriptor {
    pub fn new(method: impl Into<String>, args: Vec<serde_json::Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }
}

impl TryFrom<CommandDescriptor> for Command {
    type Error = CacheError;

    fn try_from(descriptor: CommandDescriptor) -> CacheResult<Self> {
        let CommandDescriptor { method, args } = descriptor;
        let parsed = Args {
            method: &method,
            args: &args,
        };
        match method.to_ascii_lowercase().as_str() {
            "get" => {
                parsed.arity(1, 1)?;
                Ok(Command::get(parsed.key(0)?))
            }
            "set" | "add" => {
                parsed.arity(2, 3)?;
                let key = parsed.key(0)?;
                let value = codec::encode(&args[1])?;
                let ttl = parsed.ttl(2)?;
                Ok(if method.eq_ignore_ascii_case("set") {
                    Command::Set { key, value, ttl }
                } else {
                    Command::Add { key, value, ttl }
                })
            }
            "delete" | "del" => {
                parsed.arity(1, 1)?;
                Ok(Command::delete(parsed.key(0)?))
            }
            "exists" => {
                parsed.arity(1, usize::MAX)?;
                let keys = (0..args.len())
                    .map(|i| parsed.key(i))
                    .collect::<CacheResult<Vec<_>>>()?;
                Ok(Command::Exists { keys })
            }
            "ttl" => {
                parsed.arity(1, 1)?;
                Ok(Command::ttl(parsed.key(0)?))
            }
            "increment" | "incr" | "incrby" => {
                parsed.arity(1, 2)?;
                let delta = match args.get(1) {
                    None => 1,
                    Some(v) => v
                        .as_i64()
                        .ok_or_else(|| parsed.invalid("delta must be an integer"))?,
                };
                Ok(Command::increment(parsed.key(0)?, delta))
            }
            "expire" => {
                parsed.arity(2, 2)?;
                Ok(Command::expire(parsed.key(0)?, parsed.ttl(1)?))
            }
            _ => Err(CacheError::UnknownCommand { method }),
        }
    }
}

struct Args<'a> {
    method: &'a str,
    args: &'a [serde_json::Value],
}

impl Args<'_> {
    fn invalid(&self, message: impl Into<String>) -> CacheError {
        CacheError::invalid_command(self.method, message)
    }

    fn arity(&self, min: usize, max: usize) -> CacheResult<()> {
        let n = self.args.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("{min}")
            } else if max == usize::MAX {
                format!("at least {min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(self.invalid(format!("expected {expected} arguments, got {n}")));
        }
        Ok(())
    }

    fn key(&self, index: usize) -> CacheResult<String> {
        match self.args.get(index) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            _ => Err(self.invalid(format!("argument {index} must be a string key"))),
        }
    }

    fn ttl(&self, index: usize) -> CacheResult<Option<Duration>> {
        match self.args.get(index) {
            None | Some(serde_json::Value::Null) => Ok(None),
            Some(v) => {
                let secs = v
                    .as_u64()
                    .ok_or_else(|| self.invalid("ttl must be a non-negative integer"))?;
                Ok((secs > 0).then(|| Duration::from_secs(secs)))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Sent together, no atomicity across commands.
    Pipeline,
    /// Executed as one atomic unit.
    Transaction,
}

impl BatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchMode::Pipeline => "pipeline",
            BatchMode::Transaction => "transaction",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    mode: BatchMode,
    commands: Vec<Command>,
}

impl Batch {
    pub fn new(mode: BatchMode, commands: Vec<Command>) -> Self {
        Self { mode, commands }
    }

    pub fn pipeline(commands: Vec<Command>) -> Self {
        Self::new(BatchMode::Pipeline, commands)
    }

    pub fn transaction(commands: Vec<Command>) -> Self {
        Self::new(BatchMode::Transaction, commands)
    }

    /// Validate every descriptor; the first invalid one rejects the batch.
    pub fn from_descriptors<I>(mode: BatchMode, descriptors: I) -> CacheResult<Self>
    where
        I: IntoIterator<Item = CommandDescriptor>,
    {
        let commands = descriptors
            .into_iter()
            .map(Command::try_from)
            .collect::<CacheResult<Vec<_>>>()?;
        Ok(Self::new(mode, commands))
    }

    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Result of one batched command, in command order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `get`: the stored payload, if present.
    Value(Option<Vec<u8>>),
    /// `set`, `add`, `delete`, `expire`.
    Bool(bool),
    /// `exists`, `increment`.
    Integer(i64),
    Ttl(TimeToLive),
}

impl Reply {
    /// Decode a `get` reply.
    pub fn decode<T: DeserializeOwned>(&self) -> CacheResult<Option<T>> {
        match self {
            Reply::Value(Some(bytes)) => codec::decode(bytes).map(Some),
            Reply::Value(None) => Ok(None),
            other => Err(CacheError::serialization(format!(
                "cannot decode a value from {other:?}"
            ))),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Reply::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_ttl(&self) -> Option<TimeToLive> {
        match self {
            Reply::Ttl(ttl) => Some(*ttl),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> CommandDescriptor {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn parses_known_methods() {
        let cmd = Command::try_from(descriptor(json!({"method": "get", "args": ["a"]}))).unwrap();
        assert_eq!(cmd, Command::get("a"));

        let cmd = Command::try_from(descriptor(
            json!({"method": "SET", "args": ["a", {"x": 1}, 30]}),
        ))
        .unwrap();
        match cmd {
            Command::Set { key, ttl, .. } => {
                assert_eq!(key, "a");
                assert_eq!(ttl, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected {other:?}"),
        }

        let cmd = Command::try_from(descriptor(json!({"method": "incr", "args": ["hits"]}))).unwrap();
        assert_eq!(cmd, Command::increment("hits", 1));

        let cmd =
            Command::try_from(descriptor(json!({"method": "exists", "args": ["a", "b"]}))).unwrap();
        assert_eq!(cmd, Command::exists(["a", "b"]));

        let cmd =
            Command::try_from(descriptor(json!({"method": "expire", "args": ["a", 0]}))).unwrap();
        assert_eq!(cmd, Command::expire("a", None));
    }

    #[test]
    fn rejects_unknown_method() {
        let err = Command::try_from(descriptor(json!({"method": "flushall"}))).unwrap_err();
        assert_eq!(
            err,
            CacheError::UnknownCommand {
                method: "flushall".into()
            }
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        let err = Command::try_from(descriptor(json!({"method": "get", "args": []}))).unwrap_err();
        assert!(matches!(err, CacheError::InvalidCommand { .. }));
        assert!(err.to_string().contains("expected 1 arguments, got 0"));

        let err = Command::try_from(descriptor(json!({"method": "get", "args": [5]}))).unwrap_err();
        assert!(err.to_string().contains("string key"));

        let err = Command::try_from(descriptor(json!({"method": "set", "args": ["a", 1, -3]})))
            .unwrap_err();
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn one_bad_descriptor_rejects_the_batch() {
        let err = Batch::from_descriptors(
            BatchMode::Transaction,
            vec![
                CommandDescriptor::new("get", vec![json!("a")]),
                CommandDescriptor::new("shutdown", vec![]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, CacheError::UnknownCommand { .. }));
    }

    #[test]
    fn reply_accessors() {
        let reply = Reply::Value(Some(codec::encode(&"hello").unwrap()));
        assert_eq!(reply.decode::<String>().unwrap(), Some("hello".to_string()));
        assert_eq!(Reply::Value(None).decode::<String>().unwrap(), None);
        assert!(Reply::Integer(3).decode::<String>().is_err());
        assert_eq!(Reply::Integer(3).as_integer(), Some(3));
        assert_eq!(Reply::Bool(true).as_bool(), Some(true));
        assert_eq!(Reply::Bool(true).as_integer(), None);
    }
}
