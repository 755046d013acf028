//! Group memberships.

pub mod manager;
pub mod model;

pub use manager::{EntityIdMap, EntityMap, MembershipManager};
pub use model::{Membership, MembershipState, StateFilter, DEFAULT_MEMBERSHIP_TYPE};
