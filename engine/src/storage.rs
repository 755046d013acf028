//! Collaborator interfaces.
//!
//! The engine owns no persistence. Entities, reference fields, durable
//! settings, memberships and roles live behind these traits; the [`memory`]
//! module provides in-memory implementations.
//!
//! [`memory`]: crate::memory

use std::collections::BTreeSet;

use og_common::{Account, EntityId, EntityRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::membership::Membership;
use crate::roles::{Role, RoleId};

/// Failure reported by a storage backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// The backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed the operation.
    #[error("Storage error: {0}")]
    Backend(String),
}

/// Resolves the acting identity and site-wide permissions.
pub trait AccountProvider: Send + Sync {
    /// Identity of the current request.
    fn current(&self) -> Account;

    /// Site-wide (not group-scoped) permission check.
    fn has_permission(&self, account: &Account, permission: &str) -> Result<bool, StorageError>;

    /// Whether the account bypasses every access check.
    fn is_super_user(&self, account: &Account) -> bool;
}

/// Entity and bundle inspection.
pub trait EntityStore: Send + Sync {
    /// Entity types that can carry fields.
    fn entity_types(&self) -> Result<Vec<String>, StorageError>;

    /// Bundles of an entity type.
    fn bundles(&self, entity_type: &str) -> Result<Vec<String>, StorageError>;

    /// Load an entity; `None` if it does not exist.
    fn load(&self, entity_type: &str, id: EntityId) -> Result<Option<EntityRef>, StorageError>;

    /// Load several entities, skipping ids that do not exist.
    fn load_multiple(
        &self,
        entity_type: &str,
        ids: &BTreeSet<EntityId>,
    ) -> Result<Vec<EntityRef>, StorageError> {
        let mut entities = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.load(entity_type, *id)? {
                entities.push(entity);
            }
        }
        Ok(entities)
    }
}

/// A group audience reference field attached to a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudienceField {
    /// Field name, unique per host entity type.
    pub name: String,
    /// Entity type carrying the field.
    pub entity_type: String,
    /// Bundle carrying the field.
    pub bundle: String,
    /// Entity type the field references.
    pub target_type: String,
    /// Allowed target bundles. Empty means every bundle of `target_type`.
    pub target_bundles: BTreeSet<String>,
}

impl AudienceField {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            target_type: target_type.into(),
            target_bundles: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_target_bundles<I, S>(mut self, bundles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target_bundles = bundles.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the field may reference entities of `bundle`.
    pub fn targets_bundle(&self, bundle: &str) -> bool {
        self.target_bundles.is_empty() || self.target_bundles.contains(bundle)
    }
}

/// Index over group audience reference fields.
pub trait ReferenceFieldIndex: Send + Sync {
    /// Audience fields on a bundle.
    fn audience_fields(
        &self,
        entity_type: &str,
        bundle: &str,
    ) -> Result<Vec<AudienceField>, StorageError>;

    /// Ids of `field.entity_type` entities whose field references `target_id`.
    fn referencing_entities(
        &self,
        field: &AudienceField,
        target_id: EntityId,
    ) -> Result<BTreeSet<EntityId>, StorageError>;

    /// Target ids currently referenced by `entity` through `field`.
    fn referenced_ids(
        &self,
        entity: &EntityRef,
        field: &AudienceField,
    ) -> Result<BTreeSet<EntityId>, StorageError>;
}

/// Durable key-value settings store.
pub trait ConfigStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Membership persistence.
pub trait MembershipStore: Send + Sync {
    /// Insert or replace the membership with the same id.
    fn save(&self, membership: &Membership) -> Result<(), StorageError>;

    fn delete(&self, id: Uuid) -> Result<(), StorageError>;

    fn load(&self, id: Uuid) -> Result<Option<Membership>, StorageError>;

    /// Every membership of a user, in any state.
    fn find_by_user(&self, user_id: EntityId) -> Result<Vec<Membership>, StorageError>;

    /// Every membership of a group, in any state.
    fn find_by_group(
        &self,
        group_type: &str,
        group_id: EntityId,
    ) -> Result<Vec<Membership>, StorageError>;

    /// The membership of a user in a group, in any state.
    fn find(
        &self,
        user_id: EntityId,
        group_type: &str,
        group_id: EntityId,
    ) -> Result<Option<Membership>, StorageError> {
        Ok(self
            .find_by_user(user_id)?
            .into_iter()
            .find(|m| m.group_type == group_type && m.group_id == group_id))
    }
}

/// Role persistence.
pub trait RoleStore: Send + Sync {
    fn load(&self, id: &RoleId) -> Result<Option<Role>, StorageError>;

    fn load_by_bundle(&self, group_type: &str, group_bundle: &str)
        -> Result<Vec<Role>, StorageError>;

    /// Insert or replace the role with the same id.
    fn save(&self, role: &Role) -> Result<(), StorageError>;

    fn delete(&self, id: &RoleId) -> Result<(), StorageError>;
}
