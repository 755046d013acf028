//! Group-scoped access control.
//!
//! Decides whether a user may perform an operation on a group or on content
//! that belongs to groups, based on memberships, group roles and site-wide
//! permissions.

pub mod access;
pub mod config;
pub mod error;
pub mod group_types;
pub mod membership;
pub mod memory;
pub mod permissions;
pub mod roles;
pub mod state;
pub mod storage;
pub mod telemetry;

pub use access::{AccessOptions, AccessOutcome, AccessResult, GroupAccess, PermissionAlterer};
pub use config::Config;
pub use error::{Error, Result};
pub use state::{Backends, Extensions, OgState};
