//! Built-in permissions and default roles.
//!
//! Every deployment registers these so that groups get the standard
//! membership permissions and per-bundle content CRUD permissions.

use og_common::BundleMap;

use super::model::{GroupContentOperationPermission, GroupPermission, Permission};
use super::registry::PermissionProvider;
use super::{
    ADD_USER, ADMINISTER_PERMISSIONS, APPROVE_AND_DENY_SUBSCRIPTION, DELETE_GROUP, MANAGE_MEMBERS,
    SUBSCRIBE, SUBSCRIBE_WITHOUT_APPROVAL, UNSUBSCRIBE, UPDATE_GROUP,
};
use crate::roles::{DefaultRoleProvider, Role, ADMINISTRATOR, MEMBER, NON_MEMBER};

/// Content operations that get "own"/"any" permission pairs.
const OWNED_OPERATIONS: &[&str] = &["update", "delete"];

/// Name of a content operation permission (e.g. "update own article node").
pub fn content_operation_permission_name(
    operation: &str,
    owner: bool,
    bundle: &str,
    entity_type: &str,
) -> String {
    let scope = if owner { "own" } else { "any" };
    format!("{operation} {scope} {bundle} {entity_type}")
}

/// Name of the create permission for a content bundle (e.g. "create article node").
pub fn create_permission_name(bundle: &str, entity_type: &str) -> String {
    format!("create {bundle} {entity_type}")
}

/// Standard group and content permissions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorePermissions;

impl CorePermissions {
    fn group_permissions() -> Vec<GroupPermission> {
        vec![
            GroupPermission::new(SUBSCRIBE, "Subscribe to group")
                .with_description("Allow non-members to request membership to a group (approval required).")
                .with_default_roles([NON_MEMBER]),
            GroupPermission::new(SUBSCRIBE_WITHOUT_APPROVAL, "Subscribe to group (no approval required)")
                .with_description("Allow non-members to join a group without an approval from group administrators."),
            GroupPermission::new(UNSUBSCRIBE, "Unsubscribe from group")
                .with_description("Allow members to unsubscribe themselves from a group, removing their membership.")
                .with_default_roles([MEMBER]),
            GroupPermission::new(APPROVE_AND_DENY_SUBSCRIPTION, "Approve and deny subscription")
                .with_description("Users may allow or deny another user's subscription request.")
                .with_default_roles([ADMINISTRATOR]),
            GroupPermission::new(ADD_USER, "Add user")
                .with_description("Users may add other users to the group without approval.")
                .with_default_roles([ADMINISTRATOR]),
            GroupPermission::new(MANAGE_MEMBERS, "Manage members")
                .with_description("Users may remove group members and alter member status and roles.")
                .with_default_roles([ADMINISTRATOR])
                .restricted(),
            GroupPermission::new(ADMINISTER_PERMISSIONS, "Administer permissions")
                .with_description("Users may view, create, edit and delete permissions and roles within the group.")
                .with_default_roles([ADMINISTRATOR])
                .restricted(),
            GroupPermission::new(UPDATE_GROUP, "Edit group")
                .with_description("Edit the group. Note: this permission controls only node entity type groups.")
                .with_default_roles([ADMINISTRATOR]),
            GroupPermission::new(DELETE_GROUP, "Delete group")
                .with_description("Delete the group.")
                .with_default_roles([ADMINISTRATOR])
                .restricted(),
        ]
    }

    fn content_permissions(entity_type: &str, bundle: &str) -> Vec<GroupContentOperationPermission> {
        let mut permissions = vec![GroupContentOperationPermission::new(
            create_permission_name(bundle, entity_type),
            format!("{bundle}: Create new content"),
            entity_type,
            bundle,
            "create",
            false,
        )];

        for operation in OWNED_OPERATIONS {
            for owner in [true, false] {
                let scope = if owner { "own" } else { "any" };
                permissions.push(GroupContentOperationPermission::new(
                    content_operation_permission_name(operation, owner, bundle, entity_type),
                    format!("{bundle}: {} {scope} content", capitalize(operation)),
                    entity_type,
                    bundle,
                    *operation,
                    owner,
                ));
            }
        }
        permissions
    }
}

impl PermissionProvider for CorePermissions {
    fn permissions(&self, _: &str, _: &str, content_bundles: &BundleMap) -> Vec<Permission> {
        let mut permissions: Vec<Permission> = Self::group_permissions()
            .into_iter()
            .map(Permission::from)
            .collect();

        for (entity_type, bundles) in content_bundles {
            for bundle in bundles {
                permissions.extend(
                    Self::content_permissions(entity_type, bundle)
                        .into_iter()
                        .map(Permission::from),
                );
            }
        }
        permissions
    }
}

/// Contributes the `administrator` role to every new group type.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoreRoles;

impl DefaultRoleProvider for CoreRoles {
    fn default_roles(&self, group_type: &str, group_bundle: &str) -> Vec<Role> {
        let mut admin = Role::new(group_type, group_bundle, ADMINISTRATOR);
        admin.label = "Administrator".into();
        admin.is_admin = true;
        admin.weight = 2;
        vec![admin]
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}
