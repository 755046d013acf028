//! Group and group content bundles.

pub mod manager;
pub mod relations;

pub use manager::{GroupTypeListener, GroupTypeManager, GROUP_MAP_KEY, RELATION_MAP_KEY};
pub use relations::RelationMap;
