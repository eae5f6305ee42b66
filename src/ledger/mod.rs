//! Ledger module containing orchestration, transaction processing and costing

pub mod core;
pub mod costing;
pub mod transaction;

pub use core::*;
pub use costing::*;
pub use transaction::*;
