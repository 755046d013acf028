//! Engine error types.

use og_common::{BundleKey, EntityId};
use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by the engine.
///
/// Precondition violations are programmer errors and are never coerced into
/// an access decision. Storage failures are propagated unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// A content-oriented query was called with a user entity.
    #[error("User entities are not group content; use memberships instead")]
    UserEntityNotAllowed,

    /// A membership was requested for an anonymous account.
    #[error("Cannot create a membership for an anonymous user")]
    AnonymousMembership,

    /// A membership was saved without a user or a group.
    #[error("Membership is missing its {0}")]
    IncompleteMembership(&'static str),

    /// A second membership for the same (user, group) pair.
    #[error("User {user_id} already has a membership in {group_type}:{group_id}")]
    DuplicateMembership {
        user_id: EntityId,
        group_type: String,
        group_id: EntityId,
    },

    /// A role from a different group type or bundle was attached to a membership.
    #[error("Role {role} does not belong to group type {expected}")]
    RoleScopeMismatch { role: String, expected: BundleKey },

    /// The non-member role was attached to a membership.
    #[error("The non-member role cannot be assigned to a membership")]
    NonMemberRoleAssigned,

    /// A required role was renamed or deleted.
    #[error("Required role {0} cannot be renamed or deleted")]
    RequiredRole(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    /// A rename would overwrite another role.
    #[error("Role {0} already exists")]
    RoleExists(String),

    /// A permission declaration is malformed.
    #[error("Invalid permission: {0}")]
    InvalidPermission(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// `add_group` on a bundle that is already a group.
    #[error("{0} is already a group")]
    GroupAlreadyRegistered(BundleKey),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is a caller mistake rather than a backend failure.
    pub const fn is_precondition(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Serialization(_))
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
