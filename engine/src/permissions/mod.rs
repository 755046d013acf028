//! Permission definitions and their registry.
//!
//! Permissions are plain names granted to roles. Their definitions (title,
//! default roles, content operation scope) come from providers registered in
//! the [`PermissionRegistry`].

pub mod builtin;
pub mod model;
pub mod registry;

pub use builtin::{
    content_operation_permission_name, create_permission_name, CorePermissions, CoreRoles,
};
pub use model::{GroupContentOperationPermission, GroupPermission, Ownership, Permission};
pub use registry::{PermissionProvider, PermissionRegistry};

/// Site-wide permission bypassing every group check.
pub const ADMINISTER_GROUP: &str = "administer group";

/// Group-level edit permission. The "update" and "edit" operations on a
/// group resolve to it.
pub const UPDATE_GROUP: &str = "update group";
pub const DELETE_GROUP: &str = "delete group";
pub const SUBSCRIBE: &str = "subscribe";
pub const SUBSCRIBE_WITHOUT_APPROVAL: &str = "subscribe without approval";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const APPROVE_AND_DENY_SUBSCRIPTION: &str = "approve and deny subscription";
pub const ADD_USER: &str = "add user";
pub const MANAGE_MEMBERS: &str = "manage members";
pub const ADMINISTER_PERMISSIONS: &str = "administer permissions";
