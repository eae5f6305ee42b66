//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// Filter accepted by [`TransactionStorage::query_transactions`]
///
/// Every `None` field matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    pub product_type: Option<ProductType>,
    pub plant_id: Option<String>,
    pub warehouse_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub transaction_type: Option<TransactionType>,
    pub is_transfer: Option<bool>,
    pub batch_id: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, transaction: &Transaction) -> bool {
        self.product_type
            .is_none_or(|p| transaction.product_type == p)
            && self
                .plant_id
                .as_ref()
                .is_none_or(|p| &transaction.plant_id == p)
            && self
                .warehouse_id
                .as_ref()
                .is_none_or(|w| &transaction.warehouse_id == w)
            && self
                .start_date
                .is_none_or(|start| transaction.transaction_date >= start)
            && self
                .end_date
                .is_none_or(|end| transaction.transaction_date <= end)
            && self
                .transaction_type
                .is_none_or(|t| transaction.transaction_type == t)
            && self
                .is_transfer
                .is_none_or(|flag| transaction.is_transfer == flag)
            && self
                .batch_id
                .as_ref()
                .is_none_or(|b| transaction.batch_id.as_ref() == Some(b))
    }

    /// Every product movement of one warehouse within its plant
    pub fn warehouse(key: &WarehouseKey, product_type: ProductType) -> Self {
        Self {
            product_type: Some(product_type),
            plant_id: Some(key.plant_id.clone()),
            warehouse_id: Some(key.warehouse_id.clone()),
            ..Default::default()
        }
    }

    /// The transactions a batch summary is derived from
    pub fn batch(batch_id: &str) -> Self {
        Self {
            batch_id: Some(batch_id.to_string()),
            ..Default::default()
        }
    }
}

/// Storage abstraction for the fuel ledger
///
/// Implementations back transactions and batch summaries with any store
/// (PostgreSQL, SQLite, in-memory, etc.). `link_transfer` is the only call
/// that mutates existing transactions and must be all-or-nothing.
#[async_trait]
pub trait TransactionStorage: Send + Sync {
    /// Append a new transaction
    async fn append_transaction(&mut self, transaction: &Transaction) -> FuelResult<()>;

    /// Append several transactions as one write.
    ///
    /// Re-appending a transaction identical to the stored one is a no-op, so a
    /// commit that failed after this write can be retried as a whole.
    async fn append_transactions(&mut self, transactions: &[Transaction]) -> FuelResult<()>;

    /// Get a transaction by ID
    async fn get_transaction(&self, transaction_id: &str) -> FuelResult<Option<Transaction>>;

    /// List transactions matching the filter, in no particular order
    async fn query_transactions(&self, filter: &TransactionFilter)
        -> FuelResult<Vec<Transaction>>;

    /// Mark both sides as a transfer pair, optionally overwriting the entry cost.
    ///
    /// Either both transactions are updated or neither is. Implementations
    /// re-check that neither side is already linked inside the write.
    async fn link_transfer(&mut self, link: &TransferLink) -> FuelResult<()>;

    /// Save a new batch summary
    async fn save_batch(&mut self, batch: &PlantBatch) -> FuelResult<()>;

    /// Replace an existing batch summary
    async fn update_batch(&mut self, batch: &PlantBatch) -> FuelResult<()>;

    /// Get a batch summary by ID
    async fn get_batch(&self, batch_id: &str) -> FuelResult<Option<PlantBatch>>;

    /// List all batch summaries
    async fn list_batches(&self) -> FuelResult<Vec<PlantBatch>>;
}

/// Canonical asset as known to the asset registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub code: String,
    pub name: Option<String>,
}

/// Read-only view of the asset registry
pub trait AssetDirectory: Send + Sync {
    /// Find an asset by its canonical code
    fn find_asset(&self, code: &str) -> Option<AssetRecord>;
}

/// Read-only view of plants and their warehouses
pub trait WarehouseDirectory: Send + Sync {
    fn warehouse_exists(&self, warehouse: &WarehouseKey) -> bool;
}

/// Trait for implementing custom transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction before it is appended
    fn validate_transaction(&self, transaction: &Transaction) -> FuelResult<()>;
}

/// Default transaction validator with the structural rules only
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> FuelResult<()> {
        transaction.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_filter_matching() {
        let txn = Transaction::new(
            TransactionType::Entry,
            "P1".to_string(),
            "W2".to_string(),
            ProductType::Diesel,
            BigDecimal::from(100),
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        );

        assert!(TransactionFilter::default().matches(&txn));

        let filter = TransactionFilter {
            warehouse_id: Some("W2".to_string()),
            start_date: NaiveDate::from_ymd_opt(2024, 5, 3),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 17),
            transaction_type: Some(TransactionType::Entry),
            is_transfer: Some(false),
            ..Default::default()
        };
        assert!(filter.matches(&txn));

        let other_product = TransactionFilter {
            product_type: Some(ProductType::Urea),
            ..Default::default()
        };
        assert!(!other_product.matches(&txn));

        let too_late = TransactionFilter {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 11),
            ..Default::default()
        };
        assert!(!too_late.matches(&txn));

        let same_number_other_plant =
            TransactionFilter::warehouse(&WarehouseKey::new("P9", "W2"), ProductType::Diesel);
        assert!(!same_number_other_plant.matches(&txn));
        assert!(TransactionFilter::warehouse(&txn.warehouse(), ProductType::Diesel).matches(&txn));
    }

    #[test]
    fn test_batch_filter_requires_membership() {
        let mut txn = Transaction::new(
            TransactionType::Consumption,
            "P1".to_string(),
            "W2".to_string(),
            ProductType::Diesel,
            BigDecimal::from(40),
            NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
        );
        assert!(!TransactionFilter::batch("batch-1").matches(&txn));
        txn.batch_id = Some("batch-1".to_string());
        assert!(TransactionFilter::batch("batch-1").matches(&txn));
        assert!(!TransactionFilter::batch("batch-2").matches(&txn));
    }
}
