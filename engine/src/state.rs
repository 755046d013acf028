//! Shared engine state.
//!
//! `OgState` holds everything that outlives a request: configuration, storage
//! backends, provider lists and the group type registry. Per-request objects
//! ([`GroupAccess`], [`MembershipManager`]) are created from it and own their
//! caches.

use std::sync::Arc;

use crate::access::{GroupAccess, PermissionAlterer};
use crate::config::Config;
use crate::error::Result;
use crate::group_types::{GroupTypeListener, GroupTypeManager};
use crate::membership::MembershipManager;
use crate::permissions::{CorePermissions, CoreRoles, PermissionProvider, PermissionRegistry};
use crate::roles::{DefaultRoleProvider, RoleManager};
use crate::storage::{
    AccountProvider, ConfigStore, EntityStore, MembershipStore, ReferenceFieldIndex, RoleStore,
};

/// Storage collaborators.
#[derive(Clone)]
pub struct Backends {
    pub accounts: Arc<dyn AccountProvider>,
    pub entities: Arc<dyn EntityStore>,
    pub fields: Arc<dyn ReferenceFieldIndex>,
    pub config: Arc<dyn ConfigStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub roles: Arc<dyn RoleStore>,
}

/// Extension points, each invoked in registration order.
#[derive(Clone, Default)]
pub struct Extensions {
    permission_providers: Vec<Arc<dyn PermissionProvider>>,
    role_providers: Vec<Arc<dyn DefaultRoleProvider>>,
    alterers: Vec<Arc<dyn PermissionAlterer>>,
    listeners: Vec<Arc<dyn GroupTypeListener>>,
}

impl Extensions {
    /// No extensions at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in permissions and `administrator` role.
    pub fn with_core() -> Self {
        Self::new()
            .permission_provider(Arc::new(CorePermissions))
            .role_provider(Arc::new(CoreRoles))
    }

    #[must_use]
    pub fn permission_provider(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.permission_providers.push(provider);
        self
    }

    #[must_use]
    pub fn role_provider(mut self, provider: Arc<dyn DefaultRoleProvider>) -> Self {
        self.role_providers.push(provider);
        self
    }

    #[must_use]
    pub fn alterer(mut self, alterer: Arc<dyn PermissionAlterer>) -> Self {
        self.alterers.push(alterer);
        self
    }

    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn GroupTypeListener>) -> Self {
        self.listeners.push(listener);
        self
    }
}

/// Engine state shared across requests.
#[derive(Clone)]
pub struct OgState {
    /// Engine configuration
    pub config: Arc<Config>,
    /// Acting identity and site-wide permissions
    pub accounts: Arc<dyn AccountProvider>,
    pub entities: Arc<dyn EntityStore>,
    /// Audience field index
    pub fields: Arc<dyn ReferenceFieldIndex>,
    pub memberships: Arc<dyn MembershipStore>,
    pub permissions: Arc<PermissionRegistry>,
    pub roles: RoleManager,
    /// Group and group content registry
    pub group_types: Arc<GroupTypeManager>,
    /// Permission set alteration hooks
    pub alterers: Arc<[Arc<dyn PermissionAlterer>]>,
}

impl std::fmt::Debug for OgState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OgState")
            .field("config", &self.config)
            .field("permissions", &self.permissions)
            .field("group_types", &self.group_types)
            .field("alterers", &self.alterers.len())
            .finish_non_exhaustive()
    }
}

impl OgState {
    /// Wire the engine. Loads the group map from the config backend.
    pub fn new(config: Config, backends: Backends, extensions: Extensions) -> Result<Self> {
        let Extensions {
            permission_providers,
            role_providers,
            alterers,
            listeners,
        } = extensions;

        let mut registry = PermissionRegistry::new();
        for provider in permission_providers {
            registry.register(provider);
        }
        let permissions = Arc::new(registry);

        let roles = RoleManager::new(backends.roles, Arc::clone(&permissions), role_providers);
        let group_types = GroupTypeManager::new(
            backends.config,
            Arc::clone(&backends.entities),
            Arc::clone(&backends.fields),
            roles.clone(),
            listeners,
        )?;

        tracing::debug!(
            permission_providers = permissions.provider_count(),
            alterers = alterers.len(),
            "engine state ready"
        );

        Ok(Self {
            config: Arc::new(config),
            accounts: backends.accounts,
            entities: backends.entities,
            fields: backends.fields,
            memberships: backends.memberships,
            permissions,
            roles,
            group_types: Arc::new(group_types),
            alterers: alterers.into(),
        })
    }

    /// Access checker for one request.
    pub fn access(&self) -> GroupAccess {
        GroupAccess::new(self.clone())
    }

    /// Membership resolver for one request.
    pub fn membership_manager(&self) -> MembershipManager {
        MembershipManager::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackends;

    #[test]
    fn test_core_extensions() {
        let state = OgState::new(
            Config::default_for_test(),
            MemoryBackends::new().backends(),
            Extensions::with_core(),
        )
        .unwrap();
        assert_eq!(state.permissions.provider_count(), 1);
        assert!(state.alterers.is_empty());
        assert!(state.group_types.get_group_map().is_empty());
    }

    #[test]
    fn test_state_reloads_group_map() {
        let backends = MemoryBackends::new();
        let state = OgState::new(
            Config::default_for_test(),
            backends.backends(),
            Extensions::with_core(),
        )
        .unwrap();
        state.group_types.add_group("node", "group").unwrap();

        let reloaded =
            OgState::new(Config::default_for_test(), backends.backends(), Extensions::new())
                .unwrap();
        assert!(reloaded.group_types.is_group("node", "group"));
    }
}
