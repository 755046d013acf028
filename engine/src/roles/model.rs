//! Role model.

use std::collections::BTreeSet;
use std::fmt;

use og_common::BundleKey;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// Role granted to users without an active membership.
pub const NON_MEMBER: &str = "non-member";
/// Role implicitly held by every active member.
pub const MEMBER: &str = "member";
/// Admin role contributed by the built-in role provider.
pub const ADMINISTRATOR: &str = "administrator";

/// Role identifier: `{group_type}-{group_bundle}-{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(String);

impl RoleId {
    pub fn new(group_type: &str, group_bundle: &str, name: &str) -> Self {
        Self(format!("{group_type}-{group_bundle}-{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a role may be renamed or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    /// Exists for every group type; cannot be renamed or deleted.
    Required,
    #[default]
    Standard,
}

/// A named set of permissions scoped to one group type and bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Role {
    #[validate(length(min = 1, max = 64, message = "Group type must be 1-64 characters"))]
    pub group_type: String,
    #[validate(length(min = 1, max = 128, message = "Group bundle must be 1-128 characters"))]
    pub group_bundle: String,
    #[validate(length(min = 1, max = 64, message = "Name must be 1-64 characters"))]
    name: String,
    #[validate(length(max = 255, message = "Label must be at most 255 characters"))]
    pub label: String,
    /// Display order; lower sorts first.
    pub weight: i32,
    /// Holders get every group permission regardless of `permissions`.
    pub is_admin: bool,
    role_type: RoleType,
    pub permissions: BTreeSet<String>,
}

impl Role {
    /// Create a standard role.
    pub fn new(group_type: &str, group_bundle: &str, name: &str) -> Self {
        Self {
            group_type: group_type.to_string(),
            group_bundle: group_bundle.to_string(),
            name: name.to_string(),
            label: name.to_string(),
            weight: 0,
            is_admin: false,
            role_type: RoleType::Standard,
            permissions: BTreeSet::new(),
        }
    }

    /// Create a required role.
    pub(crate) fn required(group_type: &str, group_bundle: &str, name: &str, label: &str) -> Self {
        Self {
            label: label.to_string(),
            role_type: RoleType::Required,
            ..Self::new(group_type, group_bundle, name)
        }
    }

    pub fn id(&self) -> RoleId {
        RoleId::new(&self.group_type, &self.group_bundle, &self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn role_type(&self) -> RoleType {
        self.role_type
    }

    pub fn is_required(&self) -> bool {
        self.role_type == RoleType::Required
    }

    pub fn bundle_key(&self) -> BundleKey {
        BundleKey::new(self.group_type.clone(), self.group_bundle.clone())
    }

    /// Whether the role is scoped to `group_type`/`group_bundle`.
    pub fn belongs_to(&self, group_type: &str, group_bundle: &str) -> bool {
        self.group_type == group_type && self.group_bundle == group_bundle
    }

    /// Rename the role. Required roles keep their name.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        if self.is_required() {
            return Err(Error::RequiredRole(self.id().to_string()));
        }
        self.name = name.to_string();
        Ok(())
    }

    pub fn grant_permission(&mut self, permission: impl Into<String>) -> &mut Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn revoke_permission(&mut self, permission: &str) -> &mut Self {
        self.permissions.remove(permission);
        self
    }

    /// Whether the permission is explicitly granted.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Cache tag invalidated when the role changes.
    pub fn cache_tag(&self) -> String {
        format!("og_role:{}", self.id())
    }
}
