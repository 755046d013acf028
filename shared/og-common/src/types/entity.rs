//! Entity Types

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric entity identifier. User ids share this space.
pub type EntityId = u64;

/// Entity type id of user accounts.
pub const USER_ENTITY_TYPE: &str = "user";

/// Entity type id → set of bundle ids.
///
/// Ordered so that serialized maps and iteration are deterministic.
pub type BundleMap = BTreeMap<String, BTreeSet<String>>;

/// An (entity type, bundle) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleKey {
    pub entity_type: String,
    pub bundle: String,
}

impl BundleKey {
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
        }
    }
}

impl fmt::Display for BundleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.bundle)
    }
}

/// Snapshot of an entity as seen by the engine.
///
/// The engine never loads or saves entities itself; storage hands it these
/// references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity type id (e.g. "node").
    pub entity_type: String,
    /// Bundle id (e.g. "article").
    pub bundle: String,
    /// Entity id.
    pub id: EntityId,
    /// Owning user, for entity types with an ownership concept.
    pub owner_id: Option<EntityId>,
}

impl EntityRef {
    /// Create a reference to an entity without an owner.
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            id,
            owner_id: None,
        }
    }

    /// Create a reference to a user entity.
    pub fn user(id: EntityId) -> Self {
        Self::new(USER_ENTITY_TYPE, USER_ENTITY_TYPE, id)
    }

    /// Set the owning user.
    #[must_use]
    pub fn with_owner(mut self, owner_id: EntityId) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Whether this entity is a user account.
    pub fn is_user(&self) -> bool {
        self.entity_type == USER_ENTITY_TYPE
    }

    /// Whether `user_id` owns this entity.
    ///
    /// Always `false` for entity types without ownership.
    pub fn is_owned_by(&self, user_id: EntityId) -> bool {
        self.owner_id == Some(user_id)
    }

    pub fn bundle_key(&self) -> BundleKey {
        BundleKey::new(self.entity_type.clone(), self.bundle.clone())
    }

    /// Cache tag identifying this entity (e.g. `node:12`).
    pub fn cache_tag(&self) -> String {
        format!("{}:{}", self.entity_type, self.id)
    }

    /// Cache tag invalidated whenever any entity of this type changes.
    pub fn list_cache_tag(&self) -> String {
        format!("{}_list", self.entity_type)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity_type, self.bundle, self.id)
    }
}
