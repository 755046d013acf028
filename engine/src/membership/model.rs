//! Membership model.
//!
//! A membership links one user to one group. Its state encodes the user's
//! standing; there is never more than one membership per (user, group).

use std::collections::BTreeSet;

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use og_common::{BundleKey, EntityId, EntityRef};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::roles::{Role, RoleId, MEMBER, NON_MEMBER};

/// Membership bundle used when none is given.
pub const DEFAULT_MEMBERSHIP_TYPE: &str = "default";

/// Standing of a user in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipState {
    #[default]
    Active,
    /// Awaiting approval.
    Pending,
    /// Banned from the group.
    Blocked,
}

bitflags! {
    /// Set of membership states a query accepts.
    ///
    /// A bitset, so two filters naming the same states in a different order
    /// are the same value (and the same cache key).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StateFilter: u8 {
        const ACTIVE  = 1 << 0;
        const PENDING = 1 << 1;
        const BLOCKED = 1 << 2;
    }
}

impl Default for StateFilter {
    fn default() -> Self {
        Self::ACTIVE
    }
}

impl StateFilter {
    /// Whether a membership in `state` passes the filter.
    pub const fn accepts(self, state: MembershipState) -> bool {
        self.contains(Self::from_state(state))
    }

    pub const fn from_state(state: MembershipState) -> Self {
        match state {
            MembershipState::Active => Self::ACTIVE,
            MembershipState::Pending => Self::PENDING,
            MembershipState::Blocked => Self::BLOCKED,
        }
    }
}

impl FromIterator<MembershipState> for StateFilter {
    fn from_iter<T: IntoIterator<Item = MembershipState>>(iter: T) -> Self {
        iter.into_iter()
            .fold(Self::empty(), |filter, state| filter | Self::from_state(state))
    }
}

/// A user's membership in a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    id: Option<Uuid>,
    pub user_id: EntityId,
    pub group_type: String,
    pub group_bundle: String,
    pub group_id: EntityId,
    pub state: MembershipState,
    pub membership_type: String,
    roles: BTreeSet<RoleId>,
    pub created: DateTime<Utc>,
}

impl Membership {
    /// Create an unsaved active membership of `user_id` in `group`.
    pub fn new(group: &EntityRef, user_id: EntityId) -> Self {
        Self {
            id: None,
            user_id,
            group_type: group.entity_type.clone(),
            group_bundle: group.bundle.clone(),
            group_id: group.id,
            state: MembershipState::Active,
            membership_type: DEFAULT_MEMBERSHIP_TYPE.to_string(),
            roles: BTreeSet::new(),
            created: Utc::now(),
        }
    }

    #[must_use]
    pub const fn with_state(mut self, state: MembershipState) -> Self {
        self.state = state;
        self
    }

    /// Storage id; `None` until first saved.
    pub const fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub(crate) fn assign_id(&mut self) -> Uuid {
        *self.id.get_or_insert_with(Uuid::now_v7)
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn group_bundle_key(&self) -> BundleKey {
        BundleKey::new(self.group_type.clone(), self.group_bundle.clone())
    }

    /// Whether this membership is in `group`.
    pub fn is_in_group(&self, group: &EntityRef) -> bool {
        self.group_type == group.entity_type && self.group_id == group.id
    }

    pub fn is_active(&self) -> bool {
        self.state == MembershipState::Active
    }

    pub fn is_pending(&self) -> bool {
        self.state == MembershipState::Pending
    }

    pub fn is_blocked(&self) -> bool {
        self.state == MembershipState::Blocked
    }

    /// Whether the member owns the group.
    ///
    /// Always `false` for groups without ownership.
    pub fn is_owner(&self, group: &EntityRef) -> bool {
        self.is_in_group(group) && group.is_owned_by(self.user_id)
    }

    /// Attach a role.
    ///
    /// The role must be scoped to this membership's group type and bundle,
    /// and must not be the `non-member` role. The `member` role is implicit
    /// and is not stored.
    pub fn add_role(&mut self, role: &Role) -> Result<&mut Self> {
        self.check_role(role)?;
        if role.name() != MEMBER {
            self.roles.insert(role.id());
        }
        Ok(self)
    }

    /// Replace the explicit roles.
    pub fn set_roles(&mut self, roles: &[Role]) -> Result<&mut Self> {
        for role in roles {
            self.check_role(role)?;
        }
        self.roles = roles
            .iter()
            .filter(|role| role.name() != MEMBER)
            .map(Role::id)
            .collect();
        Ok(self)
    }

    pub fn revoke_role(&mut self, id: &RoleId) -> &mut Self {
        self.roles.remove(id);
        self
    }

    /// Whether the membership holds the role, the implicit `member` role
    /// included.
    pub fn has_role(&self, id: &RoleId) -> bool {
        *id == self.member_role_id() || self.roles.contains(id)
    }

    /// Explicitly attached roles.
    pub const fn explicit_role_ids(&self) -> &BTreeSet<RoleId> {
        &self.roles
    }

    /// Every role the membership holds: `member` first, then the explicit ones.
    pub fn role_ids(&self) -> Vec<RoleId> {
        std::iter::once(self.member_role_id())
            .chain(self.roles.iter().cloned())
            .collect()
    }

    /// Reject roles a membership can never hold.
    pub(crate) fn check_role(&self, role: &Role) -> Result<()> {
        if !role.belongs_to(&self.group_type, &self.group_bundle) {
            return Err(Error::RoleScopeMismatch {
                role: role.id().to_string(),
                expected: self.group_bundle_key(),
            });
        }
        if role.name() == NON_MEMBER {
            return Err(Error::NonMemberRoleAssigned);
        }
        Ok(())
    }

    fn member_role_id(&self) -> RoleId {
        RoleId::new(&self.group_type, &self.group_bundle, MEMBER)
    }

    /// Cache tag invalidated when the membership changes.
    pub fn cache_tag(&self) -> String {
        self.id.map_or_else(
            || "og_membership_list".to_string(),
            |id| format!("og_membership:{id}"),
        )
    }
}
