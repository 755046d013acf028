//! Cache policy metadata.
//!
//! Access decisions are cacheable by callers. Each decision carries the tags
//! that invalidate it, the request contexts it varies by, and a max-age.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::EntityRef;

/// Context name for decisions that vary by the acting user.
pub const USER_CONTEXT: &str = "user";

/// Cacheability of a computed value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    /// Tags whose invalidation invalidates the value.
    pub tags: BTreeSet<String>,
    /// Request contexts the value varies by.
    pub contexts: BTreeSet<String>,
    /// Max age in seconds. `None` means permanent.
    pub max_age: Option<u32>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) -> &mut Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn add_context(&mut self, context: impl Into<String>) -> &mut Self {
        self.contexts.insert(context.into());
        self
    }

    /// Depend on an entity: invalidated when it changes.
    pub fn add_entity(&mut self, entity: &EntityRef) -> &mut Self {
        self.add_tag(entity.cache_tag())
    }

    /// Depend on a named configuration object.
    pub fn add_config(&mut self, name: &str) -> &mut Self {
        self.add_tag(format!("config:{name}"))
    }

    /// Vary by the acting user.
    pub fn add_user_context(&mut self) -> &mut Self {
        self.add_context(USER_CONTEXT)
    }

    pub fn set_max_age(&mut self, seconds: u32) -> &mut Self {
        self.max_age = Some(self.max_age.map_or(seconds, |current| current.min(seconds)));
        self
    }

    /// Merge another policy into this one.
    ///
    /// Tags and contexts union; the shorter max-age wins.
    pub fn merge(&mut self, other: &Self) -> &mut Self {
        self.tags.extend(other.tags.iter().cloned());
        self.contexts.extend(other.contexts.iter().cloned());
        if let Some(seconds) = other.max_age {
            self.set_max_age(seconds);
        }
        self
    }

    #[must_use]
    pub fn merged(mut self, other: &Self) -> Self {
        self.merge(other);
        self
    }

    pub fn is_permanent(&self) -> bool {
        self.max_age.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_unions_tags_and_contexts() {
        let mut a = CachePolicy::new();
        a.add_tag("node:1").add_user_context();

        let mut b = CachePolicy::new();
        b.add_tag("node:2").add_config("og.settings");

        a.merge(&b);
        assert_eq!(a.tags.len(), 3);
        assert!(a.tags.contains("config:og.settings"));
        assert!(a.contexts.contains(USER_CONTEXT));
    }

    #[test]
    fn test_merge_keeps_shortest_max_age() {
        let mut a = CachePolicy::new();
        assert!(a.is_permanent());

        let mut b = CachePolicy::new();
        b.set_max_age(60);
        a.merge(&b);
        assert_eq!(a.max_age, Some(60));

        let mut c = CachePolicy::new();
        c.set_max_age(300);
        a.merge(&c);
        assert_eq!(a.max_age, Some(60));

        // Merging a permanent policy does not extend the max age.
        a.merge(&CachePolicy::new());
        assert_eq!(a.max_age, Some(60));
    }

    #[test]
    fn test_entity_tag() {
        let mut policy = CachePolicy::new();
        policy.add_entity(&EntityRef::new("node", "group", 5));
        assert!(policy.tags.contains("node:5"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut policy = CachePolicy::new();
        policy.add_tag("og_role:node-group-member").set_max_age(10);
        let json = serde_json::to_string(&policy).unwrap();
        let restored: CachePolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, restored);
    }
}
