//! Group type registry.
//!
//! Tracks which bundles are groups and which are group content. The group map
//! is durable; the relation map is derived from audience fields, cached in
//! the config store and rebuilt lazily after invalidation.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use og_common::{BundleKey, BundleMap};
use parking_lot::RwLock;

use super::relations::{self, RelationMap};
use crate::error::{Error, Result};
use crate::roles::RoleManager;
use crate::storage::{ConfigStore, EntityStore, ReferenceFieldIndex};

/// Config key holding the group map.
pub const GROUP_MAP_KEY: &str = "og.settings.groups";

/// Config key caching the relation map.
pub const RELATION_MAP_KEY: &str = "og.group_relation_map";

/// Notified after a bundle becomes or stops being a group.
pub trait GroupTypeListener: Send + Sync {
    fn group_created(&self, _group_type: &str, _group_bundle: &str) {}

    fn group_removed(&self, _group_type: &str, _group_bundle: &str) {}
}

/// Registry of group bundles and their content bundles.
pub struct GroupTypeManager {
    config: Arc<dyn ConfigStore>,
    entities: Arc<dyn EntityStore>,
    fields: Arc<dyn ReferenceFieldIndex>,
    roles: RoleManager,
    listeners: Vec<Arc<dyn GroupTypeListener>>,
    groups: RwLock<BundleMap>,
    relations: RwLock<Option<Arc<RelationMap>>>,
    /// Bumped on every invalidation so a rebuild racing with it is dropped.
    generation: AtomicU64,
}

impl std::fmt::Debug for GroupTypeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupTypeManager")
            .field("groups", &*self.groups.read())
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl GroupTypeManager {
    /// Load the group map from `config`.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        entities: Arc<dyn EntityStore>,
        fields: Arc<dyn ReferenceFieldIndex>,
        roles: RoleManager,
        listeners: Vec<Arc<dyn GroupTypeListener>>,
    ) -> Result<Self> {
        let groups = match config.get(GROUP_MAP_KEY)? {
            Some(value) => serde_json::from_value(value)?,
            None => BundleMap::new(),
        };
        tracing::debug!(group_types = groups.len(), "loaded group map");

        Ok(Self {
            config,
            entities,
            fields,
            roles,
            listeners,
            groups: RwLock::new(groups),
            relations: RwLock::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Whether the bundle is a group.
    pub fn is_group(&self, entity_type: &str, bundle: &str) -> bool {
        self.groups
            .read()
            .get(entity_type)
            .is_some_and(|bundles| bundles.contains(bundle))
    }

    /// Whether the bundle has an audience field that can reference a group.
    pub fn is_group_content(&self, entity_type: &str, bundle: &str) -> Result<bool> {
        let fields = self.fields.audience_fields(entity_type, bundle)?;
        let groups = self.groups.read();
        Ok(fields.iter().any(|field| {
            groups
                .get(&field.target_type)
                .is_some_and(|bundles| bundles.iter().any(|b| field.targets_bundle(b)))
        }))
    }

    /// Entity type → group bundles.
    pub fn get_group_map(&self) -> BundleMap {
        self.groups.read().clone()
    }

    /// Group bundles of one entity type.
    pub fn get_group_bundle_ids_by_entity_type(&self, entity_type: &str) -> BTreeSet<String> {
        self.groups
            .read()
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Every group bundle, ordered by entity type then bundle.
    pub fn get_all_group_bundles(&self) -> Vec<BundleKey> {
        self.groups
            .read()
            .iter()
            .flat_map(|(entity_type, bundles)| {
                bundles
                    .iter()
                    .map(move |bundle| BundleKey::new(entity_type.clone(), bundle.clone()))
            })
            .collect()
    }

    /// Make a bundle a group.
    ///
    /// Persists the group map, creates the bundle's default roles and
    /// notifies listeners. If role creation fails the registration is undone.
    #[tracing::instrument(skip(self))]
    pub fn add_group(&self, entity_type: &str, bundle: &str) -> Result<()> {
        let added = self.update_group_map(|groups| {
            groups
                .entry(entity_type.to_string())
                .or_default()
                .insert(bundle.to_string())
        })?;
        if !added {
            return Err(Error::GroupAlreadyRegistered(BundleKey::new(
                entity_type,
                bundle,
            )));
        }

        if let Err(err) = self.create_group_roles(entity_type, bundle) {
            tracing::warn!(error = %err, "group registration failed, rolling back");
            if let Err(rollback) = self.unregister(entity_type, bundle) {
                tracing::error!(error = %rollback, "failed to roll back group registration");
            }
            return Err(err);
        }

        for listener in &self.listeners {
            listener.group_created(entity_type, bundle);
        }

        tracing::info!("registered group bundle");
        Ok(())
    }

    fn create_group_roles(&self, entity_type: &str, bundle: &str) -> Result<()> {
        self.reset_group_relation_map()?;
        let content_bundles = self.get_group_content_bundle_ids_by_group_bundle(entity_type, bundle)?;
        self.roles
            .create_per_bundle_roles(entity_type, bundle, &content_bundles)?;
        Ok(())
    }

    /// Undo a partial `add_group`.
    fn unregister(&self, entity_type: &str, bundle: &str) -> Result<()> {
        self.update_group_map(|groups| remove_bundle(groups, entity_type, bundle))?;
        self.reset_group_relation_map()?;
        self.roles.remove_roles_by_bundle(entity_type, bundle)?;
        Ok(())
    }

    /// Stop treating a bundle as a group and delete its roles.
    #[tracing::instrument(skip(self))]
    pub fn remove_group(&self, entity_type: &str, bundle: &str) -> Result<()> {
        let removed = self.update_group_map(|groups| remove_bundle(groups, entity_type, bundle))?;
        if !removed {
            tracing::debug!("bundle was not a group");
        }

        let deleted = self.roles.remove_roles_by_bundle(entity_type, bundle)?;
        self.reset_group_relation_map()?;

        for listener in &self.listeners {
            listener.group_removed(entity_type, bundle);
        }

        tracing::info!(roles_deleted = deleted, "removed group bundle");
        Ok(())
    }

    /// Apply `update` to a copy of the group map and persist it if it changed.
    ///
    /// The in-memory map is swapped only after the config write succeeds.
    fn update_group_map(&self, update: impl FnOnce(&mut BundleMap) -> bool) -> Result<bool> {
        let mut groups = self.groups.write();
        let mut updated = groups.clone();
        if !update(&mut updated) {
            return Ok(false);
        }
        self.config
            .set(GROUP_MAP_KEY, serde_json::to_value(&updated)?)?;
        *groups = updated;
        Ok(true)
    }

    /// Drop the relation map so the next read rebuilds it.
    ///
    /// Call after adding, changing or removing an audience field.
    pub fn reset_group_relation_map(&self) -> Result<()> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        *self.relations.write() = None;
        self.config.delete(RELATION_MAP_KEY)?;
        tracing::debug!("relation map invalidated");
        Ok(())
    }

    /// The relation map, rebuilt if invalidated.
    ///
    /// A rebuild that races with an invalidation is returned to the caller
    /// but neither cached nor left in the config store.
    pub fn get_group_relation_map(&self) -> Result<Arc<RelationMap>> {
        if let Some(map) = self.relations.read().as_ref() {
            return Ok(Arc::clone(map));
        }

        let generation = self.generation.load(Ordering::Acquire);
        let current = || self.generation.load(Ordering::Acquire) == generation;

        let map = match self.config.get(RELATION_MAP_KEY)? {
            Some(value) => serde_json::from_value(value)?,
            None => {
                let groups = self.get_group_map();
                let map = relations::build(&groups, self.entities.as_ref(), self.fields.as_ref())?;
                if current() {
                    self.config
                        .set(RELATION_MAP_KEY, serde_json::to_value(&map)?)?;
                    // Invalidated between the check and the write.
                    if !current() {
                        self.config.delete(RELATION_MAP_KEY)?;
                    }
                }
                tracing::debug!(group_types = map.len(), "relation map rebuilt");
                map
            }
        };
        let map = Arc::new(map);

        let mut cached = self.relations.write();
        if current() {
            *cached = Some(Arc::clone(&map));
        }
        Ok(map)
    }

    /// Group bundles a content bundle can reference.
    pub fn get_group_bundle_ids_by_group_content_bundle(
        &self,
        entity_type: &str,
        bundle: &str,
    ) -> Result<BundleMap> {
        let map = self.get_group_relation_map()?;
        Ok(relations::group_bundles_of(&map, entity_type, bundle))
    }

    /// Content bundles that can reference a group bundle.
    pub fn get_group_content_bundle_ids_by_group_bundle(
        &self,
        entity_type: &str,
        bundle: &str,
    ) -> Result<BundleMap> {
        let map = self.get_group_relation_map()?;
        Ok(relations::content_bundles_of(&map, entity_type, bundle))
    }

    pub const fn roles(&self) -> &RoleManager {
        &self.roles
    }
}

/// Remove `bundle` from the map, pruning an emptied entity type.
fn remove_bundle(groups: &mut BundleMap, entity_type: &str, bundle: &str) -> bool {
    let removed = groups
        .get_mut(entity_type)
        .is_some_and(|bundles| bundles.remove(bundle));
    if groups.get(entity_type).is_some_and(BTreeSet::is_empty) {
        groups.remove(entity_type);
    }
    removed
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::{OnceLock, Weak};

    use super::*;
    use crate::memory::{InMemoryConfig, InMemoryEntities, InMemoryFields, InMemoryRoles};
    use crate::permissions::{CorePermissions, CoreRoles, PermissionRegistry};
    use crate::roles::{Role, RoleId, ADMINISTRATOR, MEMBER, NON_MEMBER};
    use crate::storage::{AudienceField, RoleStore, StorageError};

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        removed: AtomicUsize,
    }

    impl GroupTypeListener for Counting {
        fn group_created(&self, _: &str, _: &str) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }

        fn group_removed(&self, _: &str, _: &str) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        config: Arc<InMemoryConfig>,
        fields: Arc<InMemoryFields>,
        listener: Arc<Counting>,
        manager: GroupTypeManager,
    }

    fn fixture() -> Fixture {
        let config = Arc::new(InMemoryConfig::new());
        let fields = Arc::new(InMemoryFields::new());
        let listener = Arc::new(Counting::default());
        let manager = build(
            config.clone(),
            fields.clone(),
            Arc::new(InMemoryRoles::new()),
            vec![listener.clone()],
        );
        Fixture {
            config,
            fields,
            listener,
            manager,
        }
    }

    fn build(
        config: Arc<dyn ConfigStore>,
        fields: Arc<InMemoryFields>,
        roles: Arc<dyn RoleStore>,
        listeners: Vec<Arc<dyn GroupTypeListener>>,
    ) -> GroupTypeManager {
        let entities = Arc::new(InMemoryEntities::new());
        for bundle in ["group", "article"] {
            entities.add_bundle("node", bundle);
        }
        let roles = RoleManager::new(
            roles,
            Arc::new(PermissionRegistry::new().with_provider(Arc::new(CorePermissions))),
            vec![Arc::new(CoreRoles)],
        );
        GroupTypeManager::new(config, entities, fields, roles, listeners).unwrap()
    }

    /// Role store whose writes fail while `failing` is set.
    #[derive(Default)]
    struct FlakyRoles {
        inner: InMemoryRoles,
        failing: AtomicBool,
    }

    impl RoleStore for FlakyRoles {
        fn load(&self, id: &RoleId) -> std::result::Result<Option<Role>, StorageError> {
            self.inner.load(id)
        }

        fn load_by_bundle(
            &self,
            group_type: &str,
            group_bundle: &str,
        ) -> std::result::Result<Vec<Role>, StorageError> {
            self.inner.load_by_bundle(group_type, group_bundle)
        }

        fn save(&self, role: &Role) -> std::result::Result<(), StorageError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("roles".into()));
            }
            self.inner.save(role)
        }

        fn delete(&self, id: &RoleId) -> std::result::Result<(), StorageError> {
            self.inner.delete(id)
        }
    }

    /// Config store that adds an audience field and invalidates the relation
    /// map just before the rebuilt map is written, once.
    struct InvalidatingConfig {
        inner: InMemoryConfig,
        fields: Arc<InMemoryFields>,
        manager: OnceLock<Weak<GroupTypeManager>>,
        armed: AtomicBool,
    }

    impl ConfigStore for InvalidatingConfig {
        fn get(&self, key: &str) -> std::result::Result<Option<serde_json::Value>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: serde_json::Value) -> std::result::Result<(), StorageError> {
            if key == RELATION_MAP_KEY && self.armed.swap(false, Ordering::SeqCst) {
                self.fields
                    .add_field(AudienceField::new("og_audience", "node", "article", "node"));
                if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
                    manager.reset_group_relation_map().unwrap();
                }
            }
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> std::result::Result<(), StorageError> {
            self.inner.delete(key)
        }
    }

    #[test]
    fn test_add_group() {
        let f = fixture();
        assert!(!f.manager.is_group("node", "group"));

        f.manager.add_group("node", "group").unwrap();
        assert!(f.manager.is_group("node", "group"));
        assert!(f.config.contains(GROUP_MAP_KEY));
        assert_eq!(f.listener.created.load(Ordering::SeqCst), 1);

        let names: Vec<_> = f
            .manager
            .roles()
            .roles_by_bundle("node", "group")
            .unwrap()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, [NON_MEMBER, MEMBER, ADMINISTRATOR]);
    }

    #[test]
    fn test_add_group_twice_fails() {
        let f = fixture();
        f.manager.add_group("node", "group").unwrap();
        assert!(matches!(
            f.manager.add_group("node", "group"),
            Err(Error::GroupAlreadyRegistered(_))
        ));
        assert_eq!(f.listener.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_group_map_survives_reload() {
        let f = fixture();
        f.manager.add_group("node", "group").unwrap();

        let reloaded = GroupTypeManager::new(
            f.config.clone(),
            Arc::new(InMemoryEntities::new()),
            f.fields.clone(),
            f.manager.roles().clone(),
            Vec::new(),
        )
        .unwrap();
        assert!(reloaded.is_group("node", "group"));
        assert_eq!(
            reloaded.get_all_group_bundles(),
            [BundleKey::new("node", "group")]
        );
    }

    #[test]
    fn test_remove_group() {
        let f = fixture();
        f.manager.add_group("node", "group").unwrap();
        f.manager.remove_group("node", "group").unwrap();

        assert!(!f.manager.is_group("node", "group"));
        assert!(f.manager.get_group_map().is_empty());
        assert!(f
            .manager
            .roles()
            .roles_by_bundle("node", "group")
            .unwrap()
            .is_empty());
        assert_eq!(f.listener.removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_group_content() {
        let f = fixture();
        f.fields
            .add_field(AudienceField::new("og_audience", "node", "article", "node"));
        assert!(!f.manager.is_group_content("node", "article").unwrap());

        f.manager.add_group("node", "group").unwrap();
        assert!(f.manager.is_group_content("node", "article").unwrap());
        assert!(!f.manager.is_group_content("node", "group").unwrap());
    }

    #[test]
    fn test_relation_map_is_cached_until_reset() {
        let f = fixture();
        f.manager.add_group("node", "group").unwrap();
        assert!(f
            .manager
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap()
            .is_empty());
        assert!(f.config.contains(RELATION_MAP_KEY));

        // New field is invisible until the map is reset.
        f.fields
            .add_field(AudienceField::new("og_audience", "node", "article", "node"));
        assert!(f
            .manager
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap()
            .is_empty());

        f.manager.reset_group_relation_map().unwrap();
        assert!(!f.config.contains(RELATION_MAP_KEY));
        let content = f
            .manager
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap();
        assert!(content["node"].contains("article"));
    }

    #[test]
    fn test_invalidated_rebuild_is_not_persisted() {
        let fields = Arc::new(InMemoryFields::new());
        let config = Arc::new(InvalidatingConfig {
            inner: InMemoryConfig::new(),
            fields: fields.clone(),
            manager: OnceLock::new(),
            armed: AtomicBool::new(false),
        });
        let manager = Arc::new(build(
            config.clone(),
            fields.clone(),
            Arc::new(InMemoryRoles::new()),
            Vec::new(),
        ));
        config.manager.set(Arc::downgrade(&manager)).unwrap();
        manager.add_group("node", "group").unwrap();
        manager.reset_group_relation_map().unwrap();

        // The field lands while the map is being rebuilt.
        config.armed.store(true, Ordering::SeqCst);
        let stale = manager
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap();
        assert!(stale.is_empty());
        assert!(!config.inner.contains(RELATION_MAP_KEY));

        let content = manager
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap();
        assert!(content["node"].contains("article"));

        let reloaded = build(
            config.clone(),
            fields,
            Arc::new(InMemoryRoles::new()),
            Vec::new(),
        );
        let content = reloaded
            .get_group_content_bundle_ids_by_group_bundle("node", "group")
            .unwrap();
        assert!(content["node"].contains("article"));
    }

    #[test]
    fn test_failed_role_creation_rolls_back_group() {
        let config = Arc::new(InMemoryConfig::new());
        let roles = Arc::new(FlakyRoles::default());
        let listener = Arc::new(Counting::default());
        let manager = build(
            config.clone(),
            Arc::new(InMemoryFields::new()),
            roles.clone(),
            vec![listener.clone()],
        );

        roles.failing.store(true, Ordering::SeqCst);
        let err = manager.add_group("node", "group").unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Unavailable(_))));
        assert!(!manager.is_group("node", "group"));
        assert!(manager.get_group_map().is_empty());
        assert_eq!(listener.created.load(Ordering::SeqCst), 0);

        let persisted: BundleMap =
            serde_json::from_value(config.get(GROUP_MAP_KEY).unwrap().unwrap()).unwrap();
        assert!(persisted.is_empty());

        roles.failing.store(false, Ordering::SeqCst);
        manager.add_group("node", "group").unwrap();
        assert!(manager.is_group("node", "group"));
        assert_eq!(
            manager.roles().roles_by_bundle("node", "group").unwrap().len(),
            3
        );
        assert_eq!(listener.created.load(Ordering::SeqCst), 1);
    }
}
