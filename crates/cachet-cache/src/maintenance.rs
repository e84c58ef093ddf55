//! Whole-cache maintenance: clear everything, sweep expired entries, clear
//! one tier.
//!
//! Directives are validated before anything runs. Each action is attempted
//! even if an earlier one failed, and every failure is kept in the
//! [`MaintenanceReport`] so the caller can signal it.

use std::fmt;

use crate::cache::Cache;
use crate::error::{CacheError, CacheResult};
use crate::tier::Tier;

/// What to do, as requested by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directives {
    pub clear_all: bool,
    pub cleanup: bool,
    /// Name of a single tier to clear.
    pub clear_tier: Option<String>,
}

impl Directives {
    pub fn is_empty(&self) -> bool {
        !self.clear_all && !self.cleanup && self.clear_tier.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ClearAll,
    Cleanup,
    ClearTier(Tier),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::ClearAll => f.write_str("clear_all"),
            Action::Cleanup => f.write_str("cleanup"),
            Action::ClearTier(tier) => write!(f, "clear_tier({tier})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub action: Action,
    /// Tiers the action touched.
    pub tiers: Vec<Tier>,
    /// Entries removed, or why the action failed.
    pub result: Result<u64, CacheError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    outcomes: Vec<ActionOutcome>,
}

impl MaintenanceReport {
    pub fn outcomes(&self) -> &[ActionOutcome] {
        &self.outcomes
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActionOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn removed(&self) -> u64 {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .sum()
    }
}

#[derive(Debug, Clone)]
pub struct Maintenance {
    cache: Cache,
}

impl Maintenance {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// Resolve directives into actions, in execution order.
    ///
    /// Fails with [`CacheError::TierNotRecognized`] if `clear_tier` does not
    /// name a valid tier.
    pub fn plan(&self, directives: &Directives) -> CacheResult<Vec<Action>> {
        let mut actions = Vec::new();
        if directives.clear_all {
            actions.push(Action::ClearAll);
        }
        if directives.cleanup {
            actions.push(Action::Cleanup);
        }
        if let Some(name) = &directives.clear_tier {
            actions.push(Action::ClearTier(name.parse()?));
        }
        Ok(actions)
    }

    pub async fn run(&self, directives: &Directives) -> CacheResult<MaintenanceReport> {
        let actions = self.plan(directives)?;
        let mut report = MaintenanceReport::default();
        for action in actions {
            report.outcomes.push(self.perform(action).await);
        }
        Ok(report)
    }

    async fn perform(&self, action: Action) -> ActionOutcome {
        let tiers = match action {
            Action::ClearAll | Action::Cleanup => self.cache.configured_tiers(),
            Action::ClearTier(tier) => vec![tier],
        };
        tracing::debug!(%action, ?tiers, "running cache maintenance");

        let result: CacheResult<u64> = match action {
            Action::ClearAll => self.cache.clear_all().await.map(|r| r.values().sum()),
            Action::Cleanup => self.cache.cleanup().await.map(|r| r.values().sum()),
            Action::ClearTier(tier) => self.cache.clear_tier(tier).await,
        };
        match &result {
            Ok(removed) => tracing::debug!(%action, removed, "cache maintenance finished"),
            Err(e) => {
                tracing::error!(%action, category = %e.category(), error = %e, "cache maintenance failed")
            }
        }
        ActionOutcome {
            action,
            tiers,
            result,
        }
    }
}
