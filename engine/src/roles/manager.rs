//! Role lifecycle.
//!
//! Creates the roles of a new group type, looks roles up by scope or by the
//! permissions they grant, and guards required roles against deletion.

use std::collections::BTreeSet;
use std::sync::Arc;

use og_common::BundleMap;
use validator::Validate;

use super::model::{Role, RoleId, MEMBER, NON_MEMBER};
use crate::error::{Error, Result};
use crate::permissions::PermissionRegistry;
use crate::storage::RoleStore;

/// Contributes extra default roles to new group types.
pub trait DefaultRoleProvider: Send + Sync {
    /// Roles to create for `group_type`/`group_bundle`.
    ///
    /// The returned roles are re-scoped to the group type, so providers may
    /// leave the scope fields empty.
    fn default_roles(&self, group_type: &str, group_bundle: &str) -> Vec<Role>;
}

/// Role management on top of a [`RoleStore`].
#[derive(Clone)]
pub struct RoleManager {
    store: Arc<dyn RoleStore>,
    permissions: Arc<PermissionRegistry>,
    providers: Vec<Arc<dyn DefaultRoleProvider>>,
}

impl RoleManager {
    pub fn new(
        store: Arc<dyn RoleStore>,
        permissions: Arc<PermissionRegistry>,
        providers: Vec<Arc<dyn DefaultRoleProvider>>,
    ) -> Self {
        Self {
            store,
            permissions,
            providers,
        }
    }

    /// The `non-member` and `member` roles every group type has.
    pub fn required_default_roles(&self, group_type: &str, group_bundle: &str) -> Vec<Role> {
        let mut non_member = Role::required(group_type, group_bundle, NON_MEMBER, "Non-member");
        non_member.weight = -2;
        let mut member = Role::required(group_type, group_bundle, MEMBER, "Member");
        member.weight = -1;
        vec![non_member, member]
    }

    /// Required roles followed by provider roles, in provider order.
    ///
    /// Provider roles named like a required role are ignored.
    pub fn default_roles(&self, group_type: &str, group_bundle: &str) -> Vec<Role> {
        let mut roles = self.required_default_roles(group_type, group_bundle);

        for provider in &self.providers {
            for mut role in provider.default_roles(group_type, group_bundle) {
                if role.name() == NON_MEMBER || role.name() == MEMBER {
                    tracing::warn!(
                        role = role.name(),
                        "default role provider redeclared a required role; ignoring"
                    );
                    continue;
                }
                role.group_type = group_type.to_string();
                role.group_bundle = group_bundle.to_string();
                roles.push(role);
            }
        }
        roles
    }

    /// Create the default roles of a new group type.
    ///
    /// Each role receives the permissions providers declare as default for
    /// its name. Roles that already exist are left untouched.
    #[tracing::instrument(skip(self, content_bundles))]
    pub fn create_per_bundle_roles(
        &self,
        group_type: &str,
        group_bundle: &str,
        content_bundles: &BundleMap,
    ) -> Result<Vec<Role>> {
        let mut created = Vec::new();

        for mut role in self.default_roles(group_type, group_bundle) {
            if self.store.load(&role.id())?.is_some() {
                tracing::debug!(role = %role.id(), "role already exists");
                continue;
            }

            for permission in self.permissions.default_group_permissions(
                group_type,
                group_bundle,
                Some(role.name()),
            )? {
                role.grant_permission(permission.name);
            }
            for permission in self.permissions.default_entity_operation_permissions(
                group_type,
                group_bundle,
                content_bundles,
                Some(role.name()),
            )? {
                role.grant_permission(permission.name);
            }

            self.save_role(&role)?;
            created.push(role);
        }

        tracing::info!(count = created.len(), "created group roles");
        Ok(created)
    }

    /// Delete every role of a group type, required ones included.
    #[tracing::instrument(skip(self))]
    pub fn remove_roles_by_bundle(&self, group_type: &str, group_bundle: &str) -> Result<usize> {
        let roles = self.store.load_by_bundle(group_type, group_bundle)?;
        for role in &roles {
            self.store.delete(&role.id())?;
        }
        Ok(roles.len())
    }

    /// Roles of a group type, ordered by weight then name.
    pub fn roles_by_bundle(&self, group_type: &str, group_bundle: &str) -> Result<Vec<Role>> {
        let mut roles = self.store.load_by_bundle(group_type, group_bundle)?;
        roles.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.name().cmp(b.name())));
        Ok(roles)
    }

    pub fn role(&self, group_type: &str, group_bundle: &str, name: &str) -> Result<Option<Role>> {
        self.load(&RoleId::new(group_type, group_bundle, name))
    }

    pub fn load(&self, id: &RoleId) -> Result<Option<Role>> {
        Ok(self.store.load(id)?)
    }

    /// Load several roles, skipping ids that do not exist.
    pub fn load_multiple<'a, I>(&self, ids: I) -> Result<Vec<Role>>
    where
        I: IntoIterator<Item = &'a RoleId>,
    {
        let mut roles = Vec::new();
        for id in ids {
            if let Some(role) = self.store.load(id)? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    /// Roles of a group type granting the given permissions.
    ///
    /// With `require_all`, a role must grant every permission; otherwise any
    /// one of them suffices.
    pub fn roles_by_permissions(
        &self,
        permissions: &[&str],
        group_type: &str,
        group_bundle: &str,
        require_all: bool,
    ) -> Result<Vec<Role>> {
        let roles = self.roles_by_bundle(group_type, group_bundle)?;
        Ok(roles
            .into_iter()
            .filter(|role| {
                if require_all {
                    permissions.iter().all(|p| role.has_permission(p))
                } else {
                    permissions.iter().any(|p| role.has_permission(p))
                }
            })
            .collect())
    }

    /// Validate and persist a role.
    ///
    /// A standard role cannot take the place of a stored required role.
    pub fn save_role(&self, role: &Role) -> Result<()> {
        role.validate()?;
        if !role.is_required() {
            if let Some(stored) = self.store.load(&role.id())? {
                if stored.is_required() {
                    return Err(Error::RequiredRole(stored.id().to_string()));
                }
            }
        }
        self.store.save(role)?;
        Ok(())
    }

    /// Delete a standard role.
    pub fn delete_role(&self, id: &RoleId) -> Result<()> {
        let role = self
            .store
            .load(id)?
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
        if role.is_required() {
            return Err(Error::RequiredRole(id.to_string()));
        }
        self.store.delete(id)?;
        Ok(())
    }

    /// Rename a standard role. Its id changes with its name.
    pub fn rename_role(&self, id: &RoleId, new_name: &str) -> Result<Role> {
        let mut role = self
            .store
            .load(id)?
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))?;
        role.set_name(new_name)?;

        if role.id() != *id && self.store.load(&role.id())?.is_some() {
            return Err(Error::RoleExists(role.id().to_string()));
        }
        self.save_role(&role)?;
        if role.id() != *id {
            self.store.delete(id)?;
        }
        Ok(role)
    }

    /// Union of the explicit permissions of `roles`.
    pub fn permission_union(roles: &[Role]) -> BTreeSet<String> {
        roles
            .iter()
            .flat_map(|role| role.permissions.iter().cloned())
            .collect()
    }
}
