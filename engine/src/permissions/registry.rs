//! Permission registry.
//!
//! Aggregates the permission definitions contributed by registered
//! providers. Providers are consulted in registration order and their output
//! is concatenated as-is: two providers may declare the same permission name
//! (for instance with different default roles for different bundles), and
//! the registry does not pick a winner.

use std::sync::Arc;

use og_common::BundleMap;

use super::model::{GroupContentOperationPermission, GroupPermission, Permission};
use crate::error::Result;

/// Contributes permission definitions for a group type.
pub trait PermissionProvider: Send + Sync {
    /// Permissions for groups of `group_type`/`group_bundle`.
    ///
    /// `content_bundles` lists the content bundles that may be attached to the
    /// group bundle; providers use it to declare content operation
    /// permissions.
    fn permissions(
        &self,
        group_type: &str,
        group_bundle: &str,
        content_bundles: &BundleMap,
    ) -> Vec<Permission>;
}

/// Ordered set of permission providers.
#[derive(Clone, Default)]
pub struct PermissionRegistry {
    providers: Vec<Arc<dyn PermissionProvider>>,
}

impl std::fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionRegistry")
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider. Later providers' definitions follow earlier ones.
    pub fn register(&mut self, provider: Arc<dyn PermissionProvider>) {
        self.providers.push(provider);
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// All permission definitions for a group bundle, in registration order.
    ///
    /// Fails if any provider contributes a malformed definition.
    pub fn default_permissions(
        &self,
        group_type: &str,
        group_bundle: &str,
        content_bundles: &BundleMap,
    ) -> Result<Vec<Permission>> {
        let mut permissions = Vec::new();
        for provider in &self.providers {
            for permission in provider.permissions(group_type, group_bundle, content_bundles) {
                permission.validate()?;
                permissions.push(permission);
            }
        }

        tracing::trace!(
            group_type,
            group_bundle,
            count = permissions.len(),
            "collected permission definitions"
        );
        Ok(permissions)
    }

    /// Group-level permissions, optionally only those granted to `role_name`
    /// by default.
    pub fn default_group_permissions(
        &self,
        group_type: &str,
        group_bundle: &str,
        role_name: Option<&str>,
    ) -> Result<Vec<GroupPermission>> {
        let permissions = self.default_permissions(group_type, group_bundle, &BundleMap::new())?;

        Ok(permissions
            .into_iter()
            .filter(|p| role_name.is_none_or(|role| p.is_default_for(role)))
            .filter_map(|p| match p {
                Permission::Group(p) => Some(p),
                Permission::GroupContentOperation(_) => None,
            })
            .collect())
    }

    /// Content operation permissions for `content_bundles`, optionally only
    /// those granted to `role_name` by default.
    pub fn default_entity_operation_permissions(
        &self,
        group_type: &str,
        group_bundle: &str,
        content_bundles: &BundleMap,
        role_name: Option<&str>,
    ) -> Result<Vec<GroupContentOperationPermission>> {
        let permissions = self.default_permissions(group_type, group_bundle, content_bundles)?;

        Ok(permissions
            .into_iter()
            .filter(|p| role_name.is_none_or(|role| p.is_default_for(role)))
            .filter_map(|p| match p {
                Permission::GroupContentOperation(p) => Some(p),
                Permission::Group(_) => None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct Fixed(Vec<Permission>);

    impl PermissionProvider for Fixed {
        fn permissions(&self, _: &str, _: &str, _: &BundleMap) -> Vec<Permission> {
            self.0.clone()
        }
    }

    /// Declares one "view" permission per content bundle it is given.
    struct PerBundle;

    impl PermissionProvider for PerBundle {
        fn permissions(&self, _: &str, _: &str, content_bundles: &BundleMap) -> Vec<Permission> {
            content_bundles
                .iter()
                .flat_map(|(entity_type, bundles)| {
                    bundles.iter().map(move |bundle| {
                        GroupContentOperationPermission::new(
                            format!("view any {bundle} {entity_type}"),
                            format!("View {bundle}"),
                            entity_type.clone(),
                            bundle.clone(),
                            "view",
                            false,
                        )
                        .with_default_roles(["member"])
                        .into()
                    })
                })
                .collect()
        }
    }

    fn content(entity_type: &str, bundles: &[&str]) -> BundleMap {
        let mut map = BundleMap::new();
        map.insert(
            entity_type.to_string(),
            bundles.iter().map(|b| (*b).to_string()).collect::<BTreeSet<_>>(),
        );
        map
    }

    fn registry() -> PermissionRegistry {
        PermissionRegistry::new()
            .with_provider(Arc::new(Fixed(vec![
                GroupPermission::new("subscribe", "Subscribe")
                    .with_default_roles(["non-member"])
                    .into(),
                GroupPermission::new("manage members", "Manage members").into(),
            ])))
            .with_provider(Arc::new(PerBundle))
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let all = registry()
            .default_permissions("node", "group", &content("node", &["article", "page"]))
            .unwrap();
        let names: Vec<_> = all.iter().map(Permission::name).collect();
        assert_eq!(
            names,
            [
                "subscribe",
                "manage members",
                "view any article node",
                "view any page node"
            ]
        );
    }

    #[test]
    fn test_duplicates_are_kept() {
        let registry = PermissionRegistry::new()
            .with_provider(Arc::new(Fixed(vec![GroupPermission::new("a", "A").into()])))
            .with_provider(Arc::new(Fixed(vec![GroupPermission::new("a", "A")
                .with_default_roles(["member"])
                .into()])));

        let all = registry
            .default_permissions("node", "group", &BundleMap::new())
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_group_permissions_by_role() {
        let registry = registry();
        let all = registry
            .default_group_permissions("node", "group", None)
            .unwrap();
        assert_eq!(all.len(), 2);

        let non_member = registry
            .default_group_permissions("node", "group", Some("non-member"))
            .unwrap();
        assert_eq!(non_member.len(), 1);
        assert_eq!(non_member[0].name, "subscribe");
    }

    #[test]
    fn test_entity_operation_permissions_by_role() {
        let registry = registry();
        let ops = registry
            .default_entity_operation_permissions(
                "node",
                "group",
                &content("node", &["article"]),
                Some("member"),
            )
            .unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, "view");

        let none = registry
            .default_entity_operation_permissions(
                "node",
                "group",
                &content("node", &["article"]),
                Some("administrator"),
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_malformed_permission_fails() {
        let registry = PermissionRegistry::new()
            .with_provider(Arc::new(Fixed(vec![GroupPermission::new("", "Nameless").into()])));
        assert!(registry
            .default_permissions("node", "group", &BundleMap::new())
            .is_err());
    }
}
