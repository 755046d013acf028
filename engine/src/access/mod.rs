//! Access decisions for groups and group content.

pub mod cache;
pub mod checker;
pub mod result;

pub use cache::{CachePhase, PermissionCache, PermissionSnapshot};
pub use checker::{AccessOptions, AlterContext, GroupAccess, PermissionAlterer};
pub use result::{AccessOutcome, AccessResult};
