//! Reconciliation of imported batches: meter progressions and final inventory

pub mod inventory;
pub mod meter;

pub use inventory::*;
pub use meter::*;
