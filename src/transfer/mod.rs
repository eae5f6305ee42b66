//! Inter-warehouse transfer detection and linking

pub mod matcher;
pub mod query;

pub use matcher::*;
pub use query::*;
