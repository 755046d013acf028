//! Permission definitions.
//!
//! A permission is either group-level ([`GroupPermission`]) or scoped to an
//! operation on one content bundle ([`GroupContentOperationPermission`]).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{Error, Result};

/// Ownership scope of a content operation permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ownership {
    /// Applies regardless of who owns the content.
    Any,
    /// Applies only to content owned by the acting user.
    Own,
}

impl Ownership {
    pub const fn from_owner_flag(owner: bool) -> Self {
        if owner {
            Self::Own
        } else {
            Self::Any
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Own => "own",
        }
    }
}

/// Permission applying to the group as a whole (e.g. "administer group").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GroupPermission {
    #[validate(length(min = 1, message = "Permission name cannot be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "Permission title cannot be empty"))]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Roles granted this permission when a group type is created.
    #[serde(default)]
    pub default_roles: BTreeSet<String>,
    /// Advisory flag for UIs: the permission has security implications.
    #[serde(default)]
    pub restrict_access: bool,
}

impl GroupPermission {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: None,
            default_roles: BTreeSet::new(),
            restrict_access: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_default_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn restricted(mut self) -> Self {
        self.restrict_access = true;
        self
    }
}

/// Permission for one operation on one content bundle, optionally limited to
/// content the acting user owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GroupContentOperationPermission {
    #[validate(length(min = 1, message = "Permission name cannot be empty"))]
    pub name: String,
    #[validate(length(min = 1, message = "Permission title cannot be empty"))]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_roles: BTreeSet<String>,
    #[serde(default)]
    pub restrict_access: bool,
    #[validate(length(min = 1, message = "Entity type cannot be empty"))]
    pub entity_type: String,
    #[validate(length(min = 1, message = "Bundle cannot be empty"))]
    pub bundle: String,
    #[validate(length(min = 1, message = "Operation cannot be empty"))]
    pub operation: String,
    /// `false` applies to any content, `true` only to the user's own.
    pub owner: bool,
}

impl GroupContentOperationPermission {
    pub fn new(
        name: impl Into<String>,
        title: impl Into<String>,
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        operation: impl Into<String>,
        owner: bool,
    ) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            description: None,
            default_roles: BTreeSet::new(),
            restrict_access: false,
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            operation: operation.into(),
            owner,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_default_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn restricted(mut self) -> Self {
        self.restrict_access = true;
        self
    }

    pub const fn ownership(&self) -> Ownership {
        Ownership::from_owner_flag(self.owner)
    }
}

/// A permission definition contributed by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "definition", rename_all = "snake_case")]
pub enum Permission {
    Group(GroupPermission),
    GroupContentOperation(GroupContentOperationPermission),
}

impl Permission {
    pub fn name(&self) -> &str {
        match self {
            Self::Group(p) => &p.name,
            Self::GroupContentOperation(p) => &p.name,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Group(p) => &p.title,
            Self::GroupContentOperation(p) => &p.title,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Group(p) => p.description.as_deref(),
            Self::GroupContentOperation(p) => p.description.as_deref(),
        }
    }

    pub const fn default_roles(&self) -> &BTreeSet<String> {
        match self {
            Self::Group(p) => &p.default_roles,
            Self::GroupContentOperation(p) => &p.default_roles,
        }
    }

    pub const fn restricts_access(&self) -> bool {
        match self {
            Self::Group(p) => p.restrict_access,
            Self::GroupContentOperation(p) => p.restrict_access,
        }
    }

    /// Whether `role_name` receives this permission by default.
    pub fn is_default_for(&self, role_name: &str) -> bool {
        self.default_roles().contains(role_name)
    }

    /// Check the declaration is well formed.
    pub fn validate(&self) -> Result<()> {
        let outcome = match self {
            Self::Group(p) => p.validate(),
            Self::GroupContentOperation(p) => p.validate(),
        };
        outcome.map_err(|e| Error::InvalidPermission(format!("{}: {e}", self.name())))
    }

    /// Parse a permission from its JSON declaration.
    ///
    /// Unknown properties and a non-boolean `owner` are rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let permission: Self =
            serde_json::from_value(value).map_err(|e| Error::InvalidPermission(e.to_string()))?;
        permission.validate()?;
        Ok(permission)
    }

    pub const fn as_group(&self) -> Option<&GroupPermission> {
        match self {
            Self::Group(p) => Some(p),
            Self::GroupContentOperation(_) => None,
        }
    }

    pub const fn as_content_operation(&self) -> Option<&GroupContentOperationPermission> {
        match self {
            Self::Group(_) => None,
            Self::GroupContentOperation(p) => Some(p),
        }
    }
}

impl From<GroupPermission> for Permission {
    fn from(value: GroupPermission) -> Self {
        Self::Group(value)
    }
}

impl From<GroupContentOperationPermission> for Permission {
    fn from(value: GroupContentOperationPermission) -> Self {
        Self::GroupContentOperation(value)
    }
}
