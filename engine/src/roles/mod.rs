//! Group roles.

pub mod manager;
pub mod model;

pub use manager::{DefaultRoleProvider, RoleManager};
pub use model::{Role, RoleId, RoleType, ADMINISTRATOR, MEMBER, NON_MEMBER};
