//! Cache error types.
//!
//! Every failure a cache operation can produce is a [`CacheError`]. The type is
//! `Clone` so that a settled [`Deferred`](crate::Deferred) can hand the same
//! failure to every observer.

use std::fmt;

use crate::tier::Tier;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// No connection could be obtained for the tier (pool exhausted, backend
    /// unreachable, or tier not configured).
    #[error("{tier} tier unavailable: {message}")]
    ConnectionUnavailable {
        /// The tier that could not be reached.
        tier: Tier,
        /// Description of the failure.
        message: String,
    },

    /// The backend rejected or failed a specific call.
    #[error("{tier} tier {operation} failed: {message}")]
    BackendOperationFailed {
        /// The tier that failed the call.
        tier: Tier,
        /// The operation name (e.g. `get`, `transaction`).
        operation: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A tier-scoped operation was given a name that is not a known tier.
    #[error("Tier not recognized: {name}")]
    TierNotRecognized {
        /// The rejected tier name.
        name: String,
    },

    /// A batch command descriptor named an operation that does not exist.
    #[error("Unknown command: {method}")]
    UnknownCommand {
        /// The rejected method name.
        method: String,
    },

    /// A batch command descriptor had malformed arguments.
    #[error("Invalid arguments for {method}: {message}")]
    InvalidCommand {
        /// The command whose arguments were rejected.
        method: String,
        /// Description of the problem.
        message: String,
    },

    /// The unit of work behind a deferred result ended without settling it.
    #[error("Operation abandoned before settling")]
    Abandoned,

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CacheError {
    /// Creates a new `ConnectionUnavailable` error.
    #[must_use]
    pub fn unavailable(tier: Tier, message: impl Into<String>) -> Self {
        Self::ConnectionUnavailable {
            tier,
            message: message.into(),
        }
    }

    /// Creates a new `BackendOperationFailed` error.
    #[must_use]
    pub fn backend(tier: Tier, operation: &'static str, message: impl Into<String>) -> Self {
        Self::BackendOperationFailed {
            tier,
            operation,
            message: message.into(),
        }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new `TierNotRecognized` error.
    #[must_use]
    pub fn tier_not_recognized(name: impl Into<String>) -> Self {
        Self::TierNotRecognized { name: name.into() }
    }

    /// Creates a new `InvalidCommand` error.
    #[must_use]
    pub fn invalid_command(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns `true` if the tier could not be reached at all, which makes
    /// the call eligible for fallback to another tier.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::BackendOperationFailed { .. } | Self::Abandoned => ErrorCategory::Backend,
            Self::Serialization { .. } => ErrorCategory::Serialization,
            Self::TierNotRecognized { .. }
            | Self::UnknownCommand { .. }
            | Self::InvalidCommand { .. } => ErrorCategory::Caller,
            Self::Config { .. } => ErrorCategory::Config,
        }
    }
}

/// Categories of cache errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection/reachability error.
    Infrastructure,
    /// The backend failed a call.
    Backend,
    /// Payload encoding error.
    Serialization,
    /// The caller passed something invalid.
    Caller,
    /// Configuration error.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Backend => write!(f, "backend"),
            Self::Serialization => write!(f, "serialization"),
            Self::Caller => write!(f, "caller"),
            Self::Config => write!(f, "config"),
        }
    }
}

/// Type alias for a cache result.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::unavailable(Tier::Remote, "connection refused");
        assert_eq!(err.to_string(), "remote tier unavailable: connection refused");

        let err = CacheError::backend(Tier::File, "set", "disk full");
        assert_eq!(err.to_string(), "file tier set failed: disk full");

        let err = CacheError::tier_not_recognized("memcached");
        assert_eq!(err.to_string(), "Tier not recognized: memcached");
    }

    #[test]
    fn test_error_predicates() {
        assert!(CacheError::unavailable(Tier::Remote, "x").is_unavailable());
        assert!(!CacheError::backend(Tier::Remote, "get", "x").is_unavailable());
        assert!(!CacheError::serialization("x").is_unavailable());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            CacheError::unavailable(Tier::Remote, "x").category(),
            ErrorCategory::Infrastructure
        );
        assert_eq!(
            CacheError::UnknownCommand {
                method: "flushall".into()
            }
            .category(),
            ErrorCategory::Caller
        );
        assert_eq!(ErrorCategory::Serialization.to_string(), "serialization");
    }
}
