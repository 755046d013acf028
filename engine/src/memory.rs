//! In-memory storage backends.
//!
//! Process-local implementations of every storage trait. Used by the test
//! suite and by embedders that keep group data in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use og_common::{Account, BundleMap, EntityId, EntityRef};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::membership::Membership;
use crate::roles::{Role, RoleId};
use crate::state::Backends;
use crate::storage::{
    AccountProvider, AudienceField, ConfigStore, EntityStore, MembershipStore,
    ReferenceFieldIndex, RoleStore, StorageError,
};

/// Accounts with a switchable current identity and site-wide grants.
#[derive(Debug, Default)]
pub struct InMemoryAccounts {
    current: RwLock<Account>,
    super_user: RwLock<Option<EntityId>>,
    grants: DashMap<EntityId, BTreeSet<String>>,
}

impl InMemoryAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `account` the identity of the current request.
    pub fn set_current(&self, account: Account) {
        *self.current.write() = account;
    }

    /// Designate the super user.
    pub fn set_super_user(&self, user_id: Option<EntityId>) {
        *self.super_user.write() = user_id;
    }

    /// Grant a site-wide permission.
    pub fn grant(&self, user_id: EntityId, permission: &str) {
        self.grants
            .entry(user_id)
            .or_default()
            .insert(permission.to_string());
    }

    pub fn revoke(&self, user_id: EntityId, permission: &str) {
        if let Some(mut grants) = self.grants.get_mut(&user_id) {
            grants.remove(permission);
        }
    }
}

impl AccountProvider for InMemoryAccounts {
    fn current(&self) -> Account {
        *self.current.read()
    }

    fn has_permission(&self, account: &Account, permission: &str) -> Result<bool, StorageError> {
        if account.is_anonymous() {
            return Ok(false);
        }
        Ok(self
            .grants
            .get(&account.id)
            .is_some_and(|grants| grants.contains(permission)))
    }

    fn is_super_user(&self, account: &Account) -> bool {
        !account.is_anonymous() && *self.super_user.read() == Some(account.id)
    }
}

/// Entities and their bundles.
#[derive(Debug, Default)]
pub struct InMemoryEntities {
    bundles: RwLock<BundleMap>,
    entities: DashMap<(String, EntityId), EntityRef>,
}

impl InMemoryEntities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a bundle without creating entities in it.
    pub fn add_bundle(&self, entity_type: &str, bundle: &str) {
        self.bundles
            .write()
            .entry(entity_type.to_string())
            .or_default()
            .insert(bundle.to_string());
    }

    /// Store an entity, declaring its bundle.
    pub fn insert(&self, entity: EntityRef) {
        self.add_bundle(&entity.entity_type, &entity.bundle);
        self.entities
            .insert((entity.entity_type.clone(), entity.id), entity);
    }

    pub fn remove(&self, entity_type: &str, id: EntityId) -> Option<EntityRef> {
        self.entities
            .remove(&(entity_type.to_string(), id))
            .map(|(_, entity)| entity)
    }
}

impl EntityStore for InMemoryEntities {
    fn entity_types(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.bundles.read().keys().cloned().collect())
    }

    fn bundles(&self, entity_type: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .bundles
            .read()
            .get(entity_type)
            .map(|bundles| bundles.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn load(&self, entity_type: &str, id: EntityId) -> Result<Option<EntityRef>, StorageError> {
        Ok(self
            .entities
            .get(&(entity_type.to_string(), id))
            .map(|entry| entry.value().clone()))
    }
}

/// Audience fields and their stored values.
///
/// Field values live in per-entity-type storage shared by every bundle that
/// carries a field of the same name.
#[derive(Debug, Default)]
pub struct InMemoryFields {
    fields: RwLock<Vec<AudienceField>>,
    /// (entity type, entity id, field name) → referenced ids.
    values: DashMap<(String, EntityId, String), BTreeSet<EntityId>>,
}

impl InMemoryFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a field, replacing any field of the same name on the bundle.
    pub fn add_field(&self, field: AudienceField) {
        let mut fields = self.fields.write();
        fields.retain(|f| {
            !(f.entity_type == field.entity_type && f.bundle == field.bundle && f.name == field.name)
        });
        fields.push(field);
    }

    pub fn remove_field(&self, entity_type: &str, bundle: &str, name: &str) {
        self.fields
            .write()
            .retain(|f| !(f.entity_type == entity_type && f.bundle == bundle && f.name == name));
    }

    /// Set the ids `entity` references through `field_name`.
    pub fn set_references<I>(&self, entity: &EntityRef, field_name: &str, targets: I)
    where
        I: IntoIterator<Item = EntityId>,
    {
        self.values.insert(
            (entity.entity_type.clone(), entity.id, field_name.to_string()),
            targets.into_iter().collect(),
        );
    }
}

impl ReferenceFieldIndex for InMemoryFields {
    fn audience_fields(
        &self,
        entity_type: &str,
        bundle: &str,
    ) -> Result<Vec<AudienceField>, StorageError> {
        Ok(self
            .fields
            .read()
            .iter()
            .filter(|f| f.entity_type == entity_type && f.bundle == bundle)
            .cloned()
            .collect())
    }

    fn referencing_entities(
        &self,
        field: &AudienceField,
        target_id: EntityId,
    ) -> Result<BTreeSet<EntityId>, StorageError> {
        Ok(self
            .values
            .iter()
            .filter(|entry| {
                let (entity_type, _, name) = entry.key();
                *entity_type == field.entity_type
                    && *name == field.name
                    && entry.value().contains(&target_id)
            })
            .map(|entry| entry.key().1)
            .collect())
    }

    fn referenced_ids(
        &self,
        entity: &EntityRef,
        field: &AudienceField,
    ) -> Result<BTreeSet<EntityId>, StorageError> {
        Ok(self
            .values
            .get(&(entity.entity_type.clone(), entity.id, field.name.clone()))
            .map(|ids| ids.value().clone())
            .unwrap_or_default())
    }
}

/// Key-value settings.
#[derive(Debug, Default)]
pub struct InMemoryConfig {
    values: DashMap<String, serde_json::Value>,
}

impl InMemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

impl ConfigStore for InMemoryConfig {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        Ok(self.values.get(key).map(|value| value.value().clone()))
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

/// Memberships keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryMemberships {
    rows: DashMap<Uuid, Membership>,
}

impl InMemoryMemberships {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows matching `predicate`, oldest first.
    fn select(&self, predicate: impl Fn(&Membership) -> bool) -> Vec<Membership> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        // v7 ids sort by creation time
        rows.sort_by_key(Membership::id);
        rows
    }
}

impl MembershipStore for InMemoryMemberships {
    fn save(&self, membership: &Membership) -> Result<(), StorageError> {
        let id = membership
            .id()
            .ok_or_else(|| StorageError::Backend("membership has no id".into()))?;
        self.rows.insert(id, membership.clone());
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<(), StorageError> {
        self.rows.remove(&id);
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Membership>, StorageError> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    fn find_by_user(&self, user_id: EntityId) -> Result<Vec<Membership>, StorageError> {
        Ok(self.select(|m| m.user_id == user_id))
    }

    fn find_by_group(
        &self,
        group_type: &str,
        group_id: EntityId,
    ) -> Result<Vec<Membership>, StorageError> {
        Ok(self.select(|m| m.group_type == group_type && m.group_id == group_id))
    }
}

/// Roles keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryRoles {
    roles: DashMap<RoleId, Role>,
}

impl InMemoryRoles {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoleStore for InMemoryRoles {
    fn load(&self, id: &RoleId) -> Result<Option<Role>, StorageError> {
        Ok(self.roles.get(id).map(|role| role.value().clone()))
    }

    fn load_by_bundle(
        &self,
        group_type: &str,
        group_bundle: &str,
    ) -> Result<Vec<Role>, StorageError> {
        let by_id: BTreeMap<RoleId, Role> = self
            .roles
            .iter()
            .filter(|entry| entry.value().belongs_to(group_type, group_bundle))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        Ok(by_id.into_values().collect())
    }

    fn save(&self, role: &Role) -> Result<(), StorageError> {
        self.roles.insert(role.id(), role.clone());
        Ok(())
    }

    fn delete(&self, id: &RoleId) -> Result<(), StorageError> {
        self.roles.remove(id);
        Ok(())
    }
}

/// One of each in-memory backend, with typed handles kept for seeding.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackends {
    pub accounts: Arc<InMemoryAccounts>,
    pub entities: Arc<InMemoryEntities>,
    pub fields: Arc<InMemoryFields>,
    pub config: Arc<InMemoryConfig>,
    pub memberships: Arc<InMemoryMemberships>,
    pub roles: Arc<InMemoryRoles>,
}

impl MemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same stores as trait objects.
    pub fn backends(&self) -> Backends {
        Backends {
            accounts: self.accounts.clone(),
            entities: self.entities.clone(),
            fields: self.fields.clone(),
            config: self.config.clone(),
            memberships: self.memberships.clone(),
            roles: self.roles.clone(),
        }
    }
}
