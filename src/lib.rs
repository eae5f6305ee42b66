//! # Fuel Ledger Core
//!
//! A batch reconciliation library that migrates legacy diesel and urea logs
//! into validated per-warehouse inventory ledgers.
//!
//! ## Features
//!
//! - **Import**: classification of loosely typed legacy rows with per-row error isolation
//! - **Batches**: per (plant, warehouse) totals and computed final inventory
//! - **Asset mapping**: idempotent legacy code resolution with a guided mapping step
//! - **Meter validation**: horometer/odometer deltas, regressions and implausible rates
//! - **Reconciliation**: computed vs. reported inventory with a configurable tolerance
//! - **Transfers**: tolerance-based matching and atomic linking with cost preservation
//! - **Costing**: FIFO valuation of warehouse stock
//! - **Storage abstraction**: database-agnostic design with trait-based storage
//!
//! ## Quick Start
//!
//! ```rust
//! use fuel_ledger_core::{FuelConfig, FuelLedger, ImportContext, LegacyRow, MemoryStorage, ProductType};
//!
//! let ledger = FuelLedger::new(MemoryStorage::new(), FuelConfig::default()).unwrap();
//! let context = ImportContext::new(ProductType::Diesel).with_location("P01", "1");
//! let row = LegacyRow {
//!     row_number: 2,
//!     date: Some("2024-05-01".to_string()),
//!     quantity_in: Some("1,200.5".to_string()),
//!     ..Default::default()
//! };
//!
//! let staged = ledger.stage(&[row], &context);
//! assert_eq!(staged.batches.len(), 1);
//! ```

pub mod config;
pub mod import;
pub mod ledger;
pub mod reconciliation;
pub mod traits;
pub mod transfer;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use import::*;
pub use ledger::*;
pub use reconciliation::*;
pub use traits::*;
pub use transfer::*;
pub use types::*;
pub use utils::*;

// Re-export transaction patterns for convenience
pub use ledger::transaction::patterns;
