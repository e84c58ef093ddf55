//! Tier identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// One backing store for cache data.
///
/// Ordering follows preference: the remote tier is tried before the file tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Shared Redis store.
    Remote,
    /// Local filesystem fallback.
    File,
}

impl Tier {
    /// Every recognized tier, in preference order.
    pub const ALL: [Tier; 2] = [Tier::Remote, Tier::File];

    /// Canonical name used in configuration, logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Remote => "remote",
            Tier::File => "file",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "remote" | "redis" => Ok(Tier::Remote),
            "file" | "local-file" | "local_file" => Ok(Tier::File),
            _ => Err(CacheError::tier_not_recognized(s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_names_and_aliases() {
        assert_eq!("remote".parse::<Tier>().unwrap(), Tier::Remote);
        assert_eq!("Redis".parse::<Tier>().unwrap(), Tier::Remote);
        assert_eq!("local-file".parse::<Tier>().unwrap(), Tier::File);
        assert_eq!(" file ".parse::<Tier>().unwrap(), Tier::File);
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "apcu".parse::<Tier>().unwrap_err();
        assert_eq!(err, CacheError::tier_not_recognized("apcu"));
    }

    #[test]
    fn display_round_trips_through_from_str() {
        for tier in Tier::ALL {
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
    }
}
