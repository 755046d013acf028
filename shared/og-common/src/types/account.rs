//! Account Types

use serde::{Deserialize, Serialize};

use super::entity::{EntityId, EntityRef};

/// Acting identity for an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    /// User id. Anonymous visitors use `0`.
    pub id: EntityId,
    /// Whether the identity is authenticated.
    pub authenticated: bool,
}

impl Account {
    /// Id shared by all anonymous visitors.
    pub const ANONYMOUS_ID: EntityId = 0;

    pub const fn anonymous() -> Self {
        Self {
            id: Self::ANONYMOUS_ID,
            authenticated: false,
        }
    }

    pub const fn authenticated(id: EntityId) -> Self {
        Self {
            id,
            authenticated: true,
        }
    }

    pub const fn is_anonymous(&self) -> bool {
        !self.authenticated || self.id == Self::ANONYMOUS_ID
    }

    /// The user entity behind this account.
    pub fn entity(&self) -> EntityRef {
        EntityRef::user(self.id)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::anonymous()
    }
}
