//! Legacy log import: row parsing, batch aggregation and asset resolution

pub mod aggregator;
pub mod parser;
pub mod resolver;

pub use aggregator::*;
pub use parser::*;
pub use resolver::*;
