//! Utility modules

pub mod directory;
pub mod memory_storage;
pub mod validation;

pub use directory::*;
pub use memory_storage::*;
pub use validation::*;
