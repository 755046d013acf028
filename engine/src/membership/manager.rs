//! Membership resolution.
//!
//! Answers "which groups is this user in" and "which groups is this content
//! in" on top of the membership store and the audience field index. Every
//! query is cached for the lifetime of the manager; writes do not invalidate
//! the caches, so callers that mutate memberships or audience fields inside
//! a request must call [`MembershipManager::reset`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use og_common::{Account, EntityId, EntityRef};

use super::model::{Membership, StateFilter};
use crate::error::{Error, Result};
use crate::roles::{Role, RoleId};
use crate::state::OgState;
use crate::storage::AudienceField;

/// Entity type → entity ids.
pub type EntityIdMap = BTreeMap<String, BTreeSet<EntityId>>;

/// Entity type → loaded entities.
pub type EntityMap = BTreeMap<String, Vec<EntityRef>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupIdsKey {
    entity_type: String,
    entity_id: EntityId,
    group_type: Option<String>,
    group_bundle: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ContentIdsKey {
    group_type: String,
    group_id: EntityId,
    /// Sorted and deduplicated.
    entity_types: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupMembershipsKey {
    group_type: String,
    group_id: EntityId,
    states: StateFilter,
}

/// Request-scoped membership resolver.
pub struct MembershipManager {
    state: OgState,
    user_memberships: DashMap<(EntityId, StateFilter), Arc<Vec<Membership>>>,
    group_ids: DashMap<GroupIdsKey, Arc<EntityIdMap>>,
    content_ids: DashMap<ContentIdsKey, Arc<EntityIdMap>>,
    group_memberships: DashMap<GroupMembershipsKey, Arc<Vec<Membership>>>,
}

impl MembershipManager {
    pub fn new(state: OgState) -> Self {
        Self {
            state,
            user_memberships: DashMap::new(),
            group_ids: DashMap::new(),
            content_ids: DashMap::new(),
            group_memberships: DashMap::new(),
        }
    }

    /// Clear every cached query.
    pub fn reset(&self) {
        self.user_memberships.clear();
        self.group_ids.clear();
        self.content_ids.clear();
        self.group_memberships.clear();
        tracing::debug!("membership caches reset");
    }

    /// Memberships of a user in the given states, oldest first.
    #[tracing::instrument(skip(self))]
    pub fn get_memberships(&self, user_id: EntityId, states: StateFilter) -> Result<Vec<Membership>> {
        if let Some(cached) = self.user_memberships.get(&(user_id, states)) {
            return Ok(cached.as_ref().clone());
        }

        let memberships: Vec<_> = self
            .state
            .memberships
            .find_by_user(user_id)?
            .into_iter()
            .filter(|m| states.accepts(m.state))
            .collect();

        self.user_memberships
            .insert((user_id, states), Arc::new(memberships.clone()));
        Ok(memberships)
    }

    /// The user's membership in `group`, if it is in one of `states`.
    pub fn get_membership(
        &self,
        group: &EntityRef,
        user_id: EntityId,
        states: StateFilter,
    ) -> Result<Option<Membership>> {
        Ok(self
            .get_memberships(user_id, states)?
            .into_iter()
            .find(|m| m.is_in_group(group)))
    }

    /// Group ids of a user's memberships, by group type.
    pub fn get_user_group_ids(&self, user_id: EntityId, states: StateFilter) -> Result<EntityIdMap> {
        let mut ids = EntityIdMap::new();
        for membership in self.get_memberships(user_id, states)? {
            ids.entry(membership.group_type)
                .or_default()
                .insert(membership.group_id);
        }
        Ok(ids)
    }

    /// Groups of a user's memberships, by group type.
    pub fn get_user_groups(&self, user_id: EntityId, states: StateFilter) -> Result<EntityMap> {
        self.load_groups(self.get_user_group_ids(user_id, states)?)
    }

    /// A new, unsaved active membership.
    pub fn create_membership(
        &self,
        group: &EntityRef,
        user: &Account,
        membership_type: Option<&str>,
    ) -> Result<Membership> {
        if user.is_anonymous() {
            return Err(Error::AnonymousMembership);
        }
        let mut membership = Membership::new(group, user.id);
        if let Some(membership_type) = membership_type {
            membership.membership_type = membership_type.to_string();
        }
        Ok(membership)
    }

    /// Persist a membership, assigning its id on first save.
    ///
    /// Rejects memberships without a user or an existing group, a second
    /// membership for the same (user, group) pair, and roles that do not
    /// exist or belong to another group bundle.
    #[tracing::instrument(skip(self, membership), fields(user_id = membership.user_id, group_id = membership.group_id))]
    pub fn save_membership(&self, membership: &mut Membership) -> Result<()> {
        if membership.user_id == Account::ANONYMOUS_ID {
            return Err(Error::IncompleteMembership("user"));
        }
        if membership.group_type.is_empty()
            || self
                .state
                .entities
                .load(&membership.group_type, membership.group_id)?
                .is_none()
        {
            return Err(Error::IncompleteMembership("group"));
        }

        if let Some(existing) = self.state.memberships.find(
            membership.user_id,
            &membership.group_type,
            membership.group_id,
        )? {
            if existing.id() != membership.id() {
                return Err(Error::DuplicateMembership {
                    user_id: membership.user_id,
                    group_type: membership.group_type.clone(),
                    group_id: membership.group_id,
                });
            }
        }

        for id in membership.explicit_role_ids() {
            let role = self
                .state
                .roles
                .load(id)?
                .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
            membership.check_role(&role)?;
        }

        let id = membership.assign_id();
        self.state.memberships.save(membership)?;
        tracing::debug!(membership_id = %id, "membership saved");
        Ok(())
    }

    pub fn delete_membership(&self, membership: &Membership) -> Result<()> {
        if let Some(id) = membership.id() {
            self.state.memberships.delete(id)?;
            tracing::debug!(membership_id = %id, "membership deleted");
        }
        Ok(())
    }

    /// Ids of the groups a content entity references, by group type.
    ///
    /// Only audience fields targeting `group_type` (and able to reference
    /// `group_bundle`) are read. References to deleted groups are dropped.
    /// User entities are rejected: users join groups through memberships.
    #[tracing::instrument(skip(self, entity), fields(entity = %entity))]
    pub fn get_group_ids(
        &self,
        entity: &EntityRef,
        group_type: Option<&str>,
        group_bundle: Option<&str>,
    ) -> Result<EntityIdMap> {
        if entity.is_user() {
            return Err(Error::UserEntityNotAllowed);
        }

        let key = GroupIdsKey {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.id,
            group_type: group_type.map(str::to_string),
            group_bundle: group_bundle.map(str::to_string),
        };
        if let Some(cached) = self.group_ids.get(&key) {
            return Ok(cached.as_ref().clone());
        }

        let mut referenced = EntityIdMap::new();
        for field in self
            .state
            .fields
            .audience_fields(&entity.entity_type, &entity.bundle)?
        {
            if group_type.is_some_and(|t| t != field.target_type)
                || group_bundle.is_some_and(|b| !field.targets_bundle(b))
            {
                continue;
            }
            let ids = self.state.fields.referenced_ids(entity, &field)?;
            referenced.entry(field.target_type).or_default().extend(ids);
        }

        let mut group_ids = EntityIdMap::new();
        for (target_type, ids) in referenced {
            let groups = self.state.entities.load_multiple(&target_type, &ids)?;
            if groups.len() < ids.len() {
                tracing::warn!(
                    target_type = %target_type,
                    orphaned = ids.len() - groups.len(),
                    "content references deleted groups"
                );
            }
            let kept: BTreeSet<_> = groups
                .into_iter()
                .filter(|g| group_bundle.is_none_or(|b| g.bundle == b))
                .map(|g| g.id)
                .collect();
            if !kept.is_empty() {
                group_ids.insert(target_type, kept);
            }
        }

        self.group_ids.insert(key, Arc::new(group_ids.clone()));
        Ok(group_ids)
    }

    /// Groups a content entity references, by group type.
    pub fn get_groups(
        &self,
        entity: &EntityRef,
        group_type: Option<&str>,
        group_bundle: Option<&str>,
    ) -> Result<EntityMap> {
        self.load_groups(self.get_group_ids(entity, group_type, group_bundle)?)
    }

    /// Number of groups a content entity references.
    pub fn get_group_count(
        &self,
        entity: &EntityRef,
        group_type: Option<&str>,
        group_bundle: Option<&str>,
    ) -> Result<usize> {
        Ok(self
            .get_group_ids(entity, group_type, group_bundle)?
            .values()
            .map(BTreeSet::len)
            .sum())
    }

    /// Ids of the content referencing `group`, by content entity type.
    ///
    /// `entity_types` restricts the content types searched; empty means all.
    #[tracing::instrument(skip(self, group), fields(group = %group))]
    pub fn get_group_content_ids(
        &self,
        group: &EntityRef,
        entity_types: &[&str],
    ) -> Result<EntityIdMap> {
        let key = ContentIdsKey {
            group_type: group.entity_type.clone(),
            group_id: group.id,
            entity_types: entity_types.iter().map(|t| (*t).to_string()).collect(),
        };
        if let Some(cached) = self.content_ids.get(&key) {
            return Ok(cached.as_ref().clone());
        }

        // Every bundle is scanned, user bundles included: the relation map
        // leaves them out but their audience fields still reference groups.
        // Field storage is per entity type, so query each field name once.
        let mut fields: BTreeMap<(String, String), AudienceField> = BTreeMap::new();
        for content_type in self.state.entities.entity_types()? {
            if !key.entity_types.is_empty() && !key.entity_types.contains(&content_type) {
                continue;
            }
            for bundle in self.state.entities.bundles(&content_type)? {
                for field in self.state.fields.audience_fields(&content_type, &bundle)? {
                    if field.target_type == group.entity_type && field.targets_bundle(&group.bundle) {
                        fields
                            .entry((content_type.clone(), field.name.clone()))
                            .or_insert(field);
                    }
                }
            }
        }

        let mut content_ids = EntityIdMap::new();
        for ((content_type, _), field) in &fields {
            let ids = self.state.fields.referencing_entities(field, group.id)?;
            if !ids.is_empty() {
                content_ids
                    .entry(content_type.clone())
                    .or_default()
                    .extend(ids);
            }
        }

        self.content_ids.insert(key, Arc::new(content_ids.clone()));
        Ok(content_ids)
    }

    /// Whether the user has a membership in `group` in one of `states`.
    pub fn is_member(&self, group: &EntityRef, user_id: EntityId, states: StateFilter) -> Result<bool> {
        Ok(self
            .get_user_group_ids(user_id, states)?
            .get(&group.entity_type)
            .is_some_and(|ids| ids.contains(&group.id)))
    }

    pub fn is_member_pending(&self, group: &EntityRef, user_id: EntityId) -> Result<bool> {
        self.is_member(group, user_id, StateFilter::PENDING)
    }

    pub fn is_member_blocked(&self, group: &EntityRef, user_id: EntityId) -> Result<bool> {
        self.is_member(group, user_id, StateFilter::BLOCKED)
    }

    /// Memberships of a group in the given states, oldest first.
    pub fn get_group_memberships(
        &self,
        group: &EntityRef,
        states: StateFilter,
    ) -> Result<Vec<Membership>> {
        let key = GroupMembershipsKey {
            group_type: group.entity_type.clone(),
            group_id: group.id,
            states,
        };
        if let Some(cached) = self.group_memberships.get(&key) {
            return Ok(cached.as_ref().clone());
        }

        let memberships: Vec<_> = self
            .state
            .memberships
            .find_by_group(&group.entity_type, group.id)?
            .into_iter()
            .filter(|m| states.accepts(m.state))
            .collect();

        self.group_memberships
            .insert(key, Arc::new(memberships.clone()));
        Ok(memberships)
    }

    pub fn get_group_membership_count(&self, group: &EntityRef, states: StateFilter) -> Result<usize> {
        Ok(self.get_group_memberships(group, states)?.len())
    }

    /// Memberships of a group holding any of the named roles.
    pub fn get_group_memberships_by_role_names(
        &self,
        group: &EntityRef,
        role_names: &[&str],
        states: StateFilter,
    ) -> Result<Vec<Membership>> {
        let role_ids: Vec<_> = role_names
            .iter()
            .map(|name| RoleId::new(&group.entity_type, &group.bundle, name))
            .collect();
        Ok(self
            .get_group_memberships(group, states)?
            .into_iter()
            .filter(|m| role_ids.iter().any(|id| m.has_role(id)))
            .collect())
    }

    /// Roles a membership holds, the implicit `member` role included.
    pub fn get_roles(&self, membership: &Membership) -> Result<Vec<Role>> {
        self.state.roles.load_multiple(&membership.role_ids())
    }

    /// Whether any of the membership's roles is an admin role or grants
    /// `permission`.
    pub fn membership_has_permission(&self, membership: &Membership, permission: &str) -> Result<bool> {
        Ok(self
            .get_roles(membership)?
            .iter()
            .any(|role| role.is_admin || role.has_permission(permission)))
    }

    fn load_groups(&self, ids: EntityIdMap) -> Result<EntityMap> {
        let mut groups = EntityMap::new();
        for (group_type, ids) in ids {
            let loaded = self.state.entities.load_multiple(&group_type, &ids)?;
            if !loaded.is_empty() {
                groups.insert(group_type, loaded);
            }
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::membership::MembershipState;
    use crate::memory::MemoryBackends;
    use crate::roles::{ADMINISTRATOR, MEMBER};
    use crate::state::Extensions;
    use crate::storage::AudienceField;

    struct Fixture {
        backends: MemoryBackends,
        manager: MembershipManager,
        group: EntityRef,
    }

    fn fixture() -> Fixture {
        let backends = MemoryBackends::new();
        let state = OgState::new(
            Config::default_for_test(),
            backends.backends(),
            Extensions::with_core(),
        )
        .unwrap();

        let group = EntityRef::new("node", "group", 1).with_owner(10);
        backends.entities.insert(group.clone());
        backends.entities.add_bundle("node", "article");
        backends
            .fields
            .add_field(AudienceField::new("og_audience", "node", "article", "node"));
        state.group_types.add_group("node", "group").unwrap();

        Fixture {
            manager: state.membership_manager(),
            backends,
            group,
        }
    }

    fn join(f: &Fixture, user_id: EntityId, state: MembershipState) -> Membership {
        let mut membership = f
            .manager
            .create_membership(&f.group, &Account::authenticated(user_id), None)
            .unwrap()
            .with_state(state);
        f.manager.save_membership(&mut membership).unwrap();
        membership
    }

    #[test]
    fn test_create_membership_rejects_anonymous() {
        let f = fixture();
        assert!(matches!(
            f.manager
                .create_membership(&f.group, &Account::anonymous(), None),
            Err(Error::AnonymousMembership)
        ));

        let membership = f
            .manager
            .create_membership(&f.group, &Account::authenticated(2), Some("premium"))
            .unwrap();
        assert!(membership.is_new());
        assert_eq!(membership.membership_type, "premium");
    }

    #[test]
    fn test_duplicate_membership_fails() {
        let f = fixture();
        let mut first = join(&f, 2, MembershipState::Active);

        let mut second = Membership::new(&f.group, 2).with_state(MembershipState::Pending);
        assert!(matches!(
            f.manager.save_membership(&mut second),
            Err(Error::DuplicateMembership { user_id: 2, .. })
        ));

        // Re-saving the existing row is fine.
        first.state = MembershipState::Blocked;
        f.manager.save_membership(&mut first).unwrap();
        assert_eq!(f.backends.memberships.len(), 1);
    }

    #[test]
    fn test_save_rejects_missing_group() {
        let f = fixture();
        let mut membership = Membership::new(&EntityRef::new("node", "group", 99), 2);
        assert!(matches!(
            f.manager.save_membership(&mut membership),
            Err(Error::IncompleteMembership("group"))
        ));
    }

    #[test]
    fn test_save_rejects_unknown_role() {
        let f = fixture();
        let mut membership = Membership::new(&f.group, 2);
        membership
            .add_role(&Role::new("node", "group", "ghost"))
            .unwrap();
        assert!(matches!(
            f.manager.save_membership(&mut membership),
            Err(Error::RoleNotFound(_))
        ));
    }

    #[test]
    fn test_state_filters() {
        let f = fixture();
        join(&f, 2, MembershipState::Pending);

        assert!(!f.manager.is_member(&f.group, 2, StateFilter::default()).unwrap());
        assert!(f.manager.is_member_pending(&f.group, 2).unwrap());
        assert!(!f.manager.is_member_blocked(&f.group, 2).unwrap());
        assert!(f
            .manager
            .get_membership(&f.group, 2, StateFilter::ACTIVE | StateFilter::PENDING)
            .unwrap()
            .is_some());
        assert!(f
            .manager
            .get_membership(&f.group, 2, StateFilter::ACTIVE)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_cache_requires_reset() {
        let f = fixture();
        assert!(f.manager.get_memberships(2, StateFilter::ACTIVE).unwrap().is_empty());

        join(&f, 2, MembershipState::Active);
        assert!(f.manager.get_memberships(2, StateFilter::ACTIVE).unwrap().is_empty());

        f.manager.reset();
        assert_eq!(f.manager.get_memberships(2, StateFilter::ACTIVE).unwrap().len(), 1);
    }

    #[test]
    fn test_user_groups() {
        let f = fixture();
        join(&f, 2, MembershipState::Active);

        let ids = f.manager.get_user_group_ids(2, StateFilter::ACTIVE).unwrap();
        assert_eq!(ids["node"], BTreeSet::from([1]));

        let groups = f.manager.get_user_groups(2, StateFilter::ACTIVE).unwrap();
        assert_eq!(groups["node"], vec![f.group.clone()]);
    }

    #[test]
    fn test_group_ids_reject_users() {
        let f = fixture();
        assert!(matches!(
            f.manager.get_group_ids(&EntityRef::user(2), None, None),
            Err(Error::UserEntityNotAllowed)
        ));
    }

    #[test]
    fn test_group_ids_drop_orphans() {
        let f = fixture();
        let article = EntityRef::new("node", "article", 20);
        f.backends.entities.insert(article.clone());
        f.backends.fields.set_references(&article, "og_audience", [1, 404]);

        let ids = f.manager.get_group_ids(&article, None, None).unwrap();
        assert_eq!(ids["node"], BTreeSet::from([1]));
        assert_eq!(f.manager.get_group_count(&article, None, None).unwrap(), 1);
        assert_eq!(f.manager.get_groups(&article, None, None).unwrap()["node"].len(), 1);

        assert!(f
            .manager
            .get_group_ids(&article, Some("taxonomy_term"), None)
            .unwrap()
            .is_empty());
        assert!(f
            .manager
            .get_group_ids(&article, Some("node"), Some("club"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_group_content_ids() {
        let f = fixture();
        for id in [20, 21] {
            let article = EntityRef::new("node", "article", id);
            f.backends.entities.insert(article.clone());
            f.backends.fields.set_references(&article, "og_audience", [1]);
        }

        let content = f.manager.get_group_content_ids(&f.group, &[]).unwrap();
        assert_eq!(content["node"], BTreeSet::from([20, 21]));

        assert!(f
            .manager
            .get_group_content_ids(&f.group, &["comment"])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_group_memberships_by_role() {
        let f = fixture();
        let admin = f
            .manager
            .state
            .roles
            .role("node", "group", ADMINISTRATOR)
            .unwrap()
            .unwrap();

        let mut boss = Membership::new(&f.group, 2);
        boss.add_role(&admin).unwrap();
        f.manager.save_membership(&mut boss).unwrap();
        join(&f, 3, MembershipState::Active);
        join(&f, 4, MembershipState::Blocked);

        assert_eq!(f.manager.get_group_membership_count(&f.group, StateFilter::ACTIVE).unwrap(), 2);
        assert_eq!(f.manager.get_group_membership_count(&f.group, StateFilter::all()).unwrap(), 3);

        let admins = f
            .manager
            .get_group_memberships_by_role_names(&f.group, &[ADMINISTRATOR], StateFilter::ACTIVE)
            .unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].user_id, 2);

        let members = f
            .manager
            .get_group_memberships_by_role_names(&f.group, &[MEMBER], StateFilter::ACTIVE)
            .unwrap();
        assert_eq!(members.len(), 2);

        assert!(f.manager.membership_has_permission(&boss, "anything").unwrap());
        assert_eq!(f.manager.get_roles(&boss).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_membership() {
        let f = fixture();
        let membership = join(&f, 2, MembershipState::Active);
        f.manager.delete_membership(&membership).unwrap();
        f.manager.reset();
        assert!(!f.manager.is_member(&f.group, 2, StateFilter::all()).unwrap());
    }
}
