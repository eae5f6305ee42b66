//! Transaction processing and management

use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::traits::*;
use crate::types::*;

/// Transaction manager for handling transaction operations
pub struct TransactionManager<S: TransactionStorage> {
    storage: S,
    validator: Box<dyn TransactionValidator>,
}

impl<S: TransactionStorage> TransactionManager<S> {
    /// Create a new transaction manager
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultTransactionValidator),
        }
    }

    /// Create a new transaction manager with custom validator
    pub fn with_validator(storage: S, validator: Box<dyn TransactionValidator>) -> Self {
        Self { storage, validator }
    }

    /// Record a single new transaction
    pub async fn record_transaction(&mut self, mut transaction: Transaction) -> FuelResult<()> {
        self.validator.validate_transaction(&transaction)?;
        transaction.updated_at = chrono::Utc::now().naive_utc();
        self.storage.append_transaction(&transaction).await
    }

    /// Validate every transaction, then append them as one write
    pub async fn record_transactions(&mut self, transactions: &[Transaction]) -> FuelResult<()> {
        for transaction in transactions {
            self.validator.validate_transaction(transaction)?;
        }
        self.storage.append_transactions(transactions).await
    }

    /// Get a transaction by ID
    pub async fn get_transaction(&self, transaction_id: &str) -> FuelResult<Option<Transaction>> {
        self.storage.get_transaction(transaction_id).await
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_transaction_required(&self, transaction_id: &str) -> FuelResult<Transaction> {
        self.storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| FuelError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Get all transactions of one warehouse within a date range
    pub async fn get_warehouse_transactions(
        &self,
        warehouse: &WarehouseKey,
        product_type: Option<ProductType>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> FuelResult<Vec<Transaction>> {
        self.storage
            .query_transactions(&TransactionFilter {
                plant_id: Some(warehouse.plant_id.clone()),
                warehouse_id: Some(warehouse.warehouse_id.clone()),
                product_type,
                start_date,
                end_date,
                ..Default::default()
            })
            .await
    }

    /// Query transactions with an arbitrary filter
    pub async fn query(&self, filter: &TransactionFilter) -> FuelResult<Vec<Transaction>> {
        self.storage.query_transactions(filter).await
    }
}

/// Transaction builder for creating movements
#[derive(Debug)]
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Create a new transaction builder
    pub fn new(
        transaction_type: TransactionType,
        plant_id: impl Into<String>,
        warehouse_id: impl Into<String>,
        product_type: ProductType,
        quantity_liters: impl Into<BigDecimal>,
        date: NaiveDate,
    ) -> Self {
        Self {
            transaction: Transaction::new(
                transaction_type,
                plant_id.into(),
                warehouse_id.into(),
                product_type,
                quantity_liters.into(),
                date,
            ),
        }
    }

    /// Fuel received into a warehouse
    pub fn entry(
        plant_id: impl Into<String>,
        warehouse_id: impl Into<String>,
        product_type: ProductType,
        quantity_liters: impl Into<BigDecimal>,
        date: NaiveDate,
    ) -> Self {
        Self::new(
            TransactionType::Entry,
            plant_id,
            warehouse_id,
            product_type,
            quantity_liters,
            date,
        )
    }

    /// Fuel dispensed out of a warehouse
    pub fn consumption(
        plant_id: impl Into<String>,
        warehouse_id: impl Into<String>,
        product_type: ProductType,
        quantity_liters: impl Into<BigDecimal>,
        date: NaiveDate,
    ) -> Self {
        Self::new(
            TransactionType::Consumption,
            plant_id,
            warehouse_id,
            product_type,
            quantity_liters,
            date,
        )
    }

    /// Manual stock correction
    pub fn adjustment(
        plant_id: impl Into<String>,
        warehouse_id: impl Into<String>,
        product_type: ProductType,
        quantity_liters: impl Into<BigDecimal>,
        direction: AdjustmentDirection,
        date: NaiveDate,
    ) -> Self {
        let mut builder = Self::new(
            TransactionType::Adjustment,
            plant_id,
            warehouse_id,
            product_type,
            quantity_liters,
            date,
        );
        builder.transaction.adjustment_direction = Some(direction);
        builder
    }

    /// Use a caller-provided id instead of a generated one
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.transaction.id = id.into();
        self
    }

    pub fn unit_cost(mut self, unit_cost: BigDecimal) -> Self {
        self.transaction.unit_cost = Some(unit_cost);
        self
    }

    /// Legacy equipment code
    pub fn asset(mut self, asset_code: impl Into<String>) -> Self {
        self.transaction.asset_code = Some(asset_code.into());
        self
    }

    /// Attach meter readings
    pub fn meters(mut self, horometer: Option<BigDecimal>, kilometer: Option<BigDecimal>) -> Self {
        self.transaction.horometer = horometer;
        self.transaction.kilometer = kilometer;
        self
    }

    /// Count the transaction in an existing batch summary
    pub fn batch(mut self, batch_id: impl Into<String>) -> Self {
        self.transaction.batch_id = Some(batch_id.into());
        self
    }

    pub fn source_row(mut self, row_number: usize) -> Self {
        self.transaction.source_row_number = Some(row_number);
        self
    }

    /// Build the transaction
    pub fn build(self) -> FuelResult<Transaction> {
        self.transaction.validate()?;
        Ok(self.transaction)
    }
}

/// Common transaction patterns
pub mod patterns {
    use super::*;

    /// Delivery from a supplier at a known price
    pub fn supplier_delivery(
        plant_id: &str,
        warehouse_id: &str,
        product_type: ProductType,
        quantity_liters: BigDecimal,
        unit_cost: BigDecimal,
        date: NaiveDate,
    ) -> FuelResult<Transaction> {
        TransactionBuilder::entry(plant_id, warehouse_id, product_type, quantity_liters, date)
            .unit_cost(unit_cost)
            .build()
    }

    /// Dispensing into a piece of equipment, with its meter readings
    pub fn equipment_refuel(
        plant_id: &str,
        warehouse_id: &str,
        asset_code: &str,
        quantity_liters: BigDecimal,
        horometer: Option<BigDecimal>,
        kilometer: Option<BigDecimal>,
        date: NaiveDate,
    ) -> FuelResult<Transaction> {
        TransactionBuilder::consumption(
            plant_id,
            warehouse_id,
            ProductType::Diesel,
            quantity_liters,
            date,
        )
        .asset(asset_code)
        .meters(horometer, kilometer)
        .build()
    }

    /// Correction that brings stock down to a physical count
    pub fn stock_count_correction(
        plant_id: &str,
        warehouse_id: &str,
        product_type: ProductType,
        book_liters: &BigDecimal,
        counted_liters: &BigDecimal,
        date: NaiveDate,
    ) -> FuelResult<Transaction> {
        let difference = counted_liters - book_liters;
        let direction = if difference < BigDecimal::from(0) {
            AdjustmentDirection::Decrease
        } else {
            AdjustmentDirection::Increase
        };
        TransactionBuilder::adjustment(
            plant_id,
            warehouse_id,
            product_type,
            difference.abs(),
            direction,
            date,
        )
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::memory_storage::MemoryStorage;
    use crate::utils::validation::StrictTransactionValidator;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    #[test]
    fn test_builder_sets_adjustment_direction() {
        let adj = TransactionBuilder::adjustment(
            "P01",
            "1",
            ProductType::Urea,
            15,
            AdjustmentDirection::Decrease,
            day(2),
        )
        .source_row(9)
        .build()
        .unwrap();

        assert_eq!(adj.adjustment_direction, Some(AdjustmentDirection::Decrease));
        assert_eq!(adj.signed_quantity(), BigDecimal::from(-15));
        assert_eq!(adj.source_row_number, Some(9));
    }

    #[test]
    fn test_stock_count_correction() {
        let adj = patterns::stock_count_correction(
            "P01",
            "1",
            ProductType::Diesel,
            &BigDecimal::from(1170),
            &BigDecimal::from(1160),
            day(30),
        )
        .unwrap();

        assert_eq!(adj.quantity_liters, BigDecimal::from(10));
        assert!(adj.is_outflow());
    }

    #[tokio::test]
    async fn test_manager_records_and_queries() {
        let storage = MemoryStorage::new();
        let mut manager = TransactionManager::new(storage);

        let delivery = patterns::supplier_delivery(
            "P01",
            "1",
            ProductType::Diesel,
            BigDecimal::from(5000),
            "21.80".parse().unwrap(),
            day(1),
        )
        .unwrap();
        manager.record_transaction(delivery.clone()).await.unwrap();

        let stored = manager.get_transaction_required(&delivery.id).await.unwrap();
        assert_eq!(stored.quantity_liters, BigDecimal::from(5000));

        let listed = manager
            .get_warehouse_transactions(
                &WarehouseKey::new("P01", "1"),
                Some(ProductType::Diesel),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);

        let other_plant = manager
            .get_warehouse_transactions(&WarehouseKey::new("P02", "1"), None, None, None)
            .await
            .unwrap();
        assert!(other_plant.is_empty());

        assert!(matches!(
            manager.get_transaction_required("missing").await,
            Err(FuelError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_custom_validator_rejects_before_append() {
        let storage = MemoryStorage::new();
        let mut manager =
            TransactionManager::with_validator(storage.clone(), Box::new(StrictTransactionValidator));

        let unassigned =
            TransactionBuilder::consumption("P01", "1", ProductType::Diesel, 0, day(3))
                .build()
                .unwrap();
        assert!(manager.record_transaction(unassigned).await.is_err());
        assert!(storage
            .query_transactions(&TransactionFilter::default())
            .await
            .unwrap()
            .is_empty());
    }
}
