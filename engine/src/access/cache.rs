//! Per-request permission cache.
//!
//! Holds two snapshots per (group, user): the permissions computed from
//! roles (pre-alter) and the permissions after the alteration hooks ran
//! (post-alter).

use std::collections::BTreeSet;

use dashmap::DashMap;
use og_common::{CachePolicy, EntityId, EntityRef};

/// Which side of the alteration hooks a snapshot was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePhase {
    PreAlter,
    PostAlter,
}

/// Permissions of one user in one group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSnapshot {
    /// The user holds an admin role in the group.
    pub is_admin: bool,
    pub permissions: BTreeSet<String>,
    pub cache: CachePolicy,
    /// Operation the hooks last ran for. Post-alter snapshots only.
    pub altered_for: Option<String>,
}

impl PermissionSnapshot {
    /// Whether this post-alter snapshot already answers `operation`.
    pub fn covers(&self, operation: &str) -> bool {
        self.permissions.contains(operation) || self.altered_for.as_deref() == Some(operation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Key {
    group_type: String,
    group_id: EntityId,
    user_id: EntityId,
    phase: CachePhase,
}

impl Key {
    fn new(group: &EntityRef, user_id: EntityId, phase: CachePhase) -> Self {
        Self {
            group_type: group.entity_type.clone(),
            group_id: group.id,
            user_id,
            phase,
        }
    }
}

/// Snapshots keyed by (group type, group id, user id, phase).
#[derive(Debug, Default)]
pub struct PermissionCache {
    entries: DashMap<Key, PermissionSnapshot>,
}

impl PermissionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(
        &self,
        group: &EntityRef,
        user_id: EntityId,
        phase: CachePhase,
    ) -> Option<PermissionSnapshot> {
        self.entries
            .get(&Key::new(group, user_id, phase))
            .map(|entry| entry.value().clone())
    }

    pub fn insert(
        &self,
        group: &EntityRef,
        user_id: EntityId,
        phase: CachePhase,
        snapshot: PermissionSnapshot,
    ) {
        self.entries.insert(Key::new(group, user_id, phase), snapshot);
    }

    /// Drop both phases of every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
