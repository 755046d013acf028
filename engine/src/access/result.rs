//! Access decisions.

use og_common::CachePolicy;
use serde::{Deserialize, Serialize};

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessOutcome {
    Allowed,
    Forbidden,
    /// No opinion. Callers may keep checking other groups.
    Neutral,
}

/// An outcome plus the cacheability of the decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
    outcome: AccessOutcome,
    cache: CachePolicy,
}

impl AccessResult {
    pub fn allowed() -> Self {
        Self::with_outcome(AccessOutcome::Allowed)
    }

    pub fn forbidden() -> Self {
        Self::with_outcome(AccessOutcome::Forbidden)
    }

    pub fn neutral() -> Self {
        Self::with_outcome(AccessOutcome::Neutral)
    }

    /// Allowed if `condition` holds, Forbidden otherwise.
    pub fn allowed_if(condition: bool) -> Self {
        if condition {
            Self::allowed()
        } else {
            Self::forbidden()
        }
    }

    fn with_outcome(outcome: AccessOutcome) -> Self {
        Self {
            outcome,
            cache: CachePolicy::default(),
        }
    }

    pub const fn outcome(&self) -> AccessOutcome {
        self.outcome
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == AccessOutcome::Allowed
    }

    pub fn is_forbidden(&self) -> bool {
        self.outcome == AccessOutcome::Forbidden
    }

    pub fn is_neutral(&self) -> bool {
        self.outcome == AccessOutcome::Neutral
    }

    pub const fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CachePolicy {
        &mut self.cache
    }

    /// Merge `cache` into this result's cache policy.
    #[must_use]
    pub fn add_cache(mut self, cache: &CachePolicy) -> Self {
        self.cache.merge(cache);
        self
    }

    /// Take on the cacheability of another decision, keeping this outcome.
    pub fn inherit_cache(&mut self, other: &Self) -> &mut Self {
        self.cache.merge(&other.cache);
        self
    }

    pub fn into_parts(self) -> (AccessOutcome, CachePolicy) {
        (self.outcome, self.cache)
    }
}
