//! Entity and account types.

pub mod account;
pub mod entity;

pub use account::Account;
pub use entity::{BundleKey, BundleMap, EntityId, EntityRef, USER_ENTITY_TYPE};
