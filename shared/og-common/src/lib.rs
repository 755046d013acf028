//! OG Common Library
//!
//! Vocabulary types shared by the access engine and the code embedding it:
//! entity references, acting accounts and cache policies.

pub mod cache;
pub mod types;

pub use cache::CachePolicy;
pub use types::*;
