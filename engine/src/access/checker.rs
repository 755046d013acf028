//! Group access checks.
//!
//! Decision order for a group operation:
//! 1. Bundles that are not groups get no opinion (Neutral)
//! 2. The super user is always allowed
//! 3. Holders of the site-wide "administer group" permission are allowed
//! 4. With owner full access enabled, the group owner is allowed
//! 5. Otherwise the user's group permissions decide: admin roles grant
//!    everything, other roles grant the permissions they list
//!
//! Permissions come from role data (pre-alter) and are then passed through
//! the registered [`PermissionAlterer`]s (post-alter). Both snapshots are
//! cached per (group, user) for the lifetime of the [`GroupAccess`].

use std::collections::BTreeSet;

use og_common::{Account, BundleMap, CachePolicy, EntityRef};

use super::cache::{CachePhase, PermissionCache, PermissionSnapshot};
use super::result::AccessResult;
use crate::config::SETTINGS_CONFIG_NAME;
use crate::error::Result;
use crate::membership::{MembershipManager, StateFilter};
use crate::permissions::{Ownership, ADMINISTER_GROUP, UPDATE_GROUP};
use crate::roles::NON_MEMBER;
use crate::state::OgState;

/// What an alteration hook is running for.
#[derive(Debug, Clone, Copy)]
pub struct AlterContext<'a> {
    /// Normalized operation being checked.
    pub operation: &'a str,
    pub group: &'a EntityRef,
    pub user: &'a Account,
}

/// Adjusts a user's computed group permissions.
///
/// Hooks run in registration order. They may add or remove permission names
/// and must extend `cache` with whatever their changes depend on.
pub trait PermissionAlterer: Send + Sync {
    fn alter(
        &self,
        permissions: &mut BTreeSet<String>,
        cache: &mut CachePolicy,
        context: &AlterContext<'_>,
    );
}

/// Switches for [`GroupAccess::user_access_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessOptions {
    /// Decide from role data alone, without running alteration hooks.
    pub skip_alter: bool,
    /// Disregard site-wide and group admin status.
    pub ignore_admin: bool,
}

impl AccessOptions {
    #[must_use]
    pub const fn skip_alter(mut self) -> Self {
        self.skip_alter = true;
        self
    }

    #[must_use]
    pub const fn ignore_admin(mut self) -> Self {
        self.ignore_admin = true;
        self
    }
}

/// Group-level edit is always checked through `UPDATE_GROUP`.
fn normalize_operation(operation: &str) -> &str {
    match operation {
        "update" | "edit" => UPDATE_GROUP,
        other => other,
    }
}

/// Request-scoped access checker.
pub struct GroupAccess {
    state: OgState,
    memberships: MembershipManager,
    cache: PermissionCache,
}

impl GroupAccess {
    pub fn new(state: OgState) -> Self {
        Self {
            memberships: MembershipManager::new(state.clone()),
            state,
            cache: PermissionCache::new(),
        }
    }

    /// The membership resolver backing this checker.
    pub const fn memberships(&self) -> &MembershipManager {
        &self.memberships
    }

    /// Drop every cached permission snapshot.
    ///
    /// Call after memberships, roles or group types change. The membership
    /// resolver has its own [`MembershipManager::reset`].
    pub fn reset_cache(&self) {
        self.cache.clear();
        tracing::debug!("permission cache reset");
    }

    /// Whether `user` may perform `operation` on `group`.
    ///
    /// `None` checks the current account.
    pub fn user_access(
        &self,
        group: &EntityRef,
        operation: &str,
        user: Option<&Account>,
    ) -> Result<AccessResult> {
        self.user_access_with(group, operation, user, AccessOptions::default())
    }

    #[tracing::instrument(skip(self, group, user), fields(group = %group))]
    pub fn user_access_with(
        &self,
        group: &EntityRef,
        operation: &str,
        user: Option<&Account>,
        options: AccessOptions,
    ) -> Result<AccessResult> {
        if !self
            .state
            .group_types
            .is_group(&group.entity_type, &group.bundle)
        {
            return Ok(AccessResult::neutral());
        }

        let user = self.resolve_user(user);
        let mut cache = self.base_cache(&user);
        cache.add_entity(group);

        if self.state.accounts.is_super_user(&user) {
            return Ok(AccessResult::allowed().add_cache(&cache));
        }

        if !options.ignore_admin && self.state.accounts.has_permission(&user, ADMINISTER_GROUP)? {
            return Ok(AccessResult::allowed().add_cache(&cache));
        }

        let operation = normalize_operation(operation);

        if self.state.config.owner_full_access
            && !user.is_anonymous()
            && group.is_owned_by(user.id)
        {
            return Ok(AccessResult::allowed().add_cache(&cache));
        }

        let snapshot = if options.skip_alter {
            self.pre_alter(group, &user)?
        } else {
            self.post_alter(group, &user, operation)?
        };

        let granted =
            (snapshot.is_admin && !options.ignore_admin) || snapshot.permissions.contains(operation);
        cache.merge(&snapshot.cache);

        tracing::debug!(user_id = user.id, operation, granted, "group access decided");
        Ok(AccessResult::allowed_if(granted).add_cache(&cache))
    }

    /// Access to an entity that may be a group, group content or both.
    ///
    /// Groups are checked directly. Content is checked against each group it
    /// belongs to, first through its content operation permissions and then
    /// through the plain group permission named `operation`. Entities that
    /// are neither get Neutral.
    #[tracing::instrument(skip(self, entity, user), fields(entity = %entity))]
    pub fn user_access_entity(
        &self,
        operation: &str,
        entity: &EntityRef,
        user: Option<&Account>,
    ) -> Result<AccessResult> {
        let user = self.resolve_user(user);
        let mut result = AccessResult::neutral();

        if self
            .state
            .group_types
            .is_group(&entity.entity_type, &entity.bundle)
        {
            let access = self.user_access(entity, operation, Some(&user))?;
            if access.is_allowed() {
                return Ok(access);
            }
            // Groups can be content of other groups, so keep looking.
            result = AccessResult::forbidden().add_cache(access.cache());
        }

        if !self
            .state
            .group_types
            .is_group_content(&entity.entity_type, &entity.bundle)?
        {
            return Ok(result);
        }

        let groups = if entity.is_user() {
            self.memberships
                .get_user_groups(entity.id, StateFilter::ACTIVE)?
        } else {
            self.memberships.get_groups(entity, None, None)?
        };

        if groups.is_empty() {
            // Possibly orphaned; any change to the type's entities may change that.
            result.cache_mut().add_tag(entity.list_cache_tag());
            return Ok(result);
        }

        let mut forbidden = AccessResult::forbidden().add_cache(result.cache());
        forbidden.cache_mut().add_entity(entity);

        for group in groups.values().flatten() {
            let operation_access =
                self.user_access_group_content_entity_operation(operation, group, entity, Some(&user))?;
            if operation_access.is_allowed() {
                return Ok(operation_access);
            }

            let access = self.user_access(group, operation, Some(&user))?;
            if access.is_allowed() {
                return Ok(access);
            }

            forbidden
                .inherit_cache(&operation_access)
                .inherit_cache(&access);
        }

        Ok(forbidden)
    }

    /// Access to `operation` on one piece of content within `group`.
    ///
    /// Tries each content operation permission for the entity's bundle, in
    /// registration order, that matches `operation` and the ownership scope
    /// ("own" only applies to content the user owns). Returns the first
    /// Allowed, or Neutral.
    #[tracing::instrument(skip(self, group, entity, user), fields(group = %group, entity = %entity))]
    pub fn user_access_group_content_entity_operation(
        &self,
        operation: &str,
        group: &EntityRef,
        entity: &EntityRef,
        user: Option<&Account>,
    ) -> Result<AccessResult> {
        let user = self.resolve_user(user);

        // Ownership compares ids only; anonymous content is owned by user 0.
        let is_owner = entity.is_owned_by(user.id);
        let scopes: &[Ownership] = if is_owner {
            &[Ownership::Any, Ownership::Own]
        } else {
            &[Ownership::Any]
        };

        let content_bundles = BundleMap::from([(
            entity.entity_type.clone(),
            BTreeSet::from([entity.bundle.clone()]),
        )]);
        let candidates = self.state.permissions.default_entity_operation_permissions(
            &group.entity_type,
            &group.bundle,
            &content_bundles,
            None,
        )?;

        let mut cache = CachePolicy::new();
        cache.add_entity(entity);
        if self.is_current(&user) {
            cache.add_user_context();
        }

        for candidate in candidates.iter().filter(|p| {
            p.operation == operation
                && p.entity_type == entity.entity_type
                && p.bundle == entity.bundle
                && scopes.contains(&p.ownership())
        }) {
            let access = self.user_access(group, &candidate.name, Some(&user))?;
            if access.is_allowed() {
                tracing::debug!(permission = %candidate.name, "content operation allowed");
                return Ok(access.add_cache(&cache));
            }
            cache.merge(access.cache());
        }

        Ok(AccessResult::neutral().add_cache(&cache))
    }

    fn resolve_user(&self, user: Option<&Account>) -> Account {
        user.copied()
            .unwrap_or_else(|| self.state.accounts.current())
    }

    fn is_current(&self, user: &Account) -> bool {
        self.state.accounts.current().id == user.id
    }

    /// Every group decision depends on the engine settings, and varies by
    /// user when made for the current one.
    fn base_cache(&self, user: &Account) -> CachePolicy {
        let mut cache = CachePolicy::new();
        cache.add_config(SETTINGS_CONFIG_NAME);
        if self.is_current(user) {
            cache.add_user_context();
        }
        cache
    }

    /// Permissions from role data, cached per (group, user).
    fn pre_alter(&self, group: &EntityRef, user: &Account) -> Result<PermissionSnapshot> {
        if let Some(snapshot) = self.cache.get(group, user.id, CachePhase::PreAlter) {
            tracing::trace!("pre-alter cache hit");
            return Ok(snapshot);
        }

        let mut snapshot = PermissionSnapshot::default();
        let membership = self
            .memberships
            .get_membership(group, user.id, StateFilter::all())?;

        match membership {
            Some(membership) if membership.is_active() => {
                snapshot.cache.add_tag(membership.cache_tag());
                for role in self.memberships.get_roles(&membership)? {
                    snapshot.cache.add_tag(role.cache_tag());
                    if role.is_admin {
                        snapshot.is_admin = true;
                        break;
                    }
                    snapshot.permissions.extend(role.permissions.iter().cloned());
                }
            }
            Some(membership) if membership.is_blocked() => {
                snapshot.cache.add_tag(membership.cache_tag());
            }
            _ => {
                if let Some(role) =
                    self.state
                        .roles
                        .role(&group.entity_type, &group.bundle, NON_MEMBER)?
                {
                    snapshot.cache.add_tag(role.cache_tag());
                    snapshot.permissions = role.permissions;
                }
            }
        }

        self.cache
            .insert(group, user.id, CachePhase::PreAlter, snapshot.clone());
        Ok(snapshot)
    }

    /// Permissions after the alteration hooks.
    ///
    /// Hooks re-run only when the cached snapshot neither grants `operation`
    /// nor was produced for it.
    fn post_alter(
        &self,
        group: &EntityRef,
        user: &Account,
        operation: &str,
    ) -> Result<PermissionSnapshot> {
        if let Some(snapshot) = self.cache.get(group, user.id, CachePhase::PostAlter) {
            if snapshot.covers(operation) {
                tracing::trace!("post-alter cache hit");
                return Ok(snapshot);
            }
        }

        let mut snapshot = self.pre_alter(group, user)?;
        let context = AlterContext {
            operation,
            group,
            user,
        };
        for alterer in self.state.alterers.iter() {
            alterer.alter(&mut snapshot.permissions, &mut snapshot.cache, &context);
        }
        snapshot.altered_for = Some(operation.to_string());

        self.cache
            .insert(group, user.id, CachePhase::PostAlter, snapshot.clone());
        Ok(snapshot)
    }
}
