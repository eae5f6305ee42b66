//! Core types and data structures for the fuel ledger

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fuel products tracked per warehouse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductType {
    Diesel,
    /// Diesel exhaust fluid (AdBlue / ARLA 32)
    Urea,
}

impl ProductType {
    /// Parse a product label as it appears in legacy logs
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "diesel" | "diésel" => Some(ProductType::Diesel),
            "urea" | "adblue" | "arla" | "arla32" | "arla 32" => Some(ProductType::Urea),
            _ => None,
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductType::Diesel => write!(f, "diesel"),
            ProductType::Urea => write!(f, "urea"),
        }
    }
}

/// Kinds of inventory movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Fuel received into the warehouse
    Entry,
    /// Fuel dispensed out of the warehouse
    Consumption,
    /// Manual stock correction
    Adjustment,
}

impl TransactionType {
    /// The type a transfer counterpart must have
    pub fn counterpart(&self) -> Option<TransactionType> {
        match self {
            TransactionType::Entry => Some(TransactionType::Consumption),
            TransactionType::Consumption => Some(TransactionType::Entry),
            TransactionType::Adjustment => None,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Entry => write!(f, "entry"),
            TransactionType::Consumption => write!(f, "consumption"),
            TransactionType::Adjustment => write!(f, "adjustment"),
        }
    }
}

/// Sign of an adjustment; quantities themselves are never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentDirection {
    Increase,
    Decrease,
}

/// A single inventory movement imported from a legacy log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,
    pub transaction_type: TransactionType,
    /// Present iff `transaction_type` is `Adjustment`
    pub adjustment_direction: Option<AdjustmentDirection>,
    pub plant_id: String,
    pub warehouse_id: String,
    pub product_type: ProductType,
    /// Legacy equipment code as written in the source row
    pub asset_code: Option<String>,
    pub quantity_liters: BigDecimal,
    pub unit_cost: Option<BigDecimal>,
    pub transaction_date: NaiveDate,
    pub horometer: Option<BigDecimal>,
    pub kilometer: Option<BigDecimal>,
    /// Whether this movement is one half of a linked transfer
    pub is_transfer: bool,
    /// The counterpart of a linked transfer
    pub reference_transaction_id: Option<String>,
    /// Row in the legacy source this transaction came from
    pub source_row_number: Option<usize>,
    /// Batch summary this transaction is counted in
    #[serde(default)]
    pub batch_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Transaction {
    /// Create a new transaction with a generated id
    pub fn new(
        transaction_type: TransactionType,
        plant_id: String,
        warehouse_id: String,
        product_type: ProductType,
        quantity_liters: BigDecimal,
        transaction_date: NaiveDate,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        let adjustment_direction = match transaction_type {
            TransactionType::Adjustment => Some(AdjustmentDirection::Increase),
            _ => None,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transaction_type,
            adjustment_direction,
            plant_id,
            warehouse_id,
            product_type,
            asset_code: None,
            quantity_liters,
            unit_cost: None,
            transaction_date,
            horometer: None,
            kilometer: None,
            is_transfer: false,
            reference_transaction_id: None,
            source_row_number: None,
            batch_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn warehouse(&self) -> WarehouseKey {
        WarehouseKey::new(self.plant_id.as_str(), self.warehouse_id.as_str())
    }

    /// Adds stock to the warehouse (entries and increase adjustments)
    pub fn is_inflow(&self) -> bool {
        match self.transaction_type {
            TransactionType::Entry => true,
            TransactionType::Consumption => false,
            TransactionType::Adjustment => {
                self.adjustment_direction == Some(AdjustmentDirection::Increase)
            }
        }
    }

    /// Removes stock from the warehouse (consumptions and decrease adjustments)
    pub fn is_outflow(&self) -> bool {
        !self.is_inflow()
    }

    /// Quantity with the sign of its effect on stock
    pub fn signed_quantity(&self) -> BigDecimal {
        if self.is_inflow() {
            self.quantity_liters.clone()
        } else {
            -self.quantity_liters.clone()
        }
    }

    /// Validate the structural invariants of the transaction
    pub fn validate(&self) -> FuelResult<()> {
        if self.quantity_liters < BigDecimal::from(0) {
            return Err(FuelError::Validation(format!(
                "Transaction '{}' has a negative quantity: {}",
                self.id, self.quantity_liters
            )));
        }

        if let Some(cost) = &self.unit_cost {
            if *cost < BigDecimal::from(0) {
                return Err(FuelError::Validation(format!(
                    "Transaction '{}' has a negative unit cost: {}",
                    self.id, cost
                )));
            }
        }

        let is_adjustment = self.transaction_type == TransactionType::Adjustment;
        if is_adjustment != self.adjustment_direction.is_some() {
            return Err(FuelError::Validation(format!(
                "Transaction '{}': adjustment direction must be set exactly for adjustments",
                self.id
            )));
        }

        if self.is_transfer && self.reference_transaction_id.is_none() {
            return Err(FuelError::Validation(format!(
                "Transfer '{}' has no counterpart reference",
                self.id
            )));
        }

        if self.reference_transaction_id.as_deref() == Some(self.id.as_str()) {
            return Err(FuelError::Validation(format!(
                "Transaction '{}' references itself",
                self.id
            )));
        }

        Ok(())
    }
}

/// Inclusive calendar range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Widen the range so it covers `date`
    pub fn extend(&mut self, date: NaiveDate) {
        if date < self.start {
            self.start = date;
        }
        if date > self.end {
            self.end = date;
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// A warehouse within its plant.
///
/// Legacy warehouse numbers repeat across plants, so a number alone never
/// identifies a warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WarehouseKey {
    pub plant_id: String,
    pub warehouse_id: String,
}

impl WarehouseKey {
    pub fn new(plant_id: impl Into<String>, warehouse_id: impl Into<String>) -> Self {
        Self {
            plant_id: plant_id.into(),
            warehouse_id: warehouse_id.into(),
        }
    }

    pub fn holds(&self, transaction: &Transaction) -> bool {
        transaction.plant_id == self.plant_id && transaction.warehouse_id == self.warehouse_id
    }
}

impl fmt::Display for WarehouseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plant_id, self.warehouse_id)
    }
}

/// Outcome of comparing computed and reported final inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Within tolerance
    Ok,
    /// Beyond tolerance, needs review
    Warning,
    /// No final inventory was reported for the batch
    Unverified,
}

/// The reconciliation unit: every movement of one (plant, warehouse) pair in an import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantBatch {
    pub batch_id: String,
    pub plant_code: String,
    pub warehouse_number: String,
    pub product_type: ProductType,
    pub date_range: Option<DateRange>,
    pub total_rows: usize,
    pub entries_count: usize,
    pub consumptions_count: usize,
    pub adjustments_count: usize,
    pub unclassified_count: usize,
    pub initial_inventory: BigDecimal,
    pub total_litros_in: BigDecimal,
    pub total_litros_out: BigDecimal,
    pub final_inventory_computed: BigDecimal,
    pub final_inventory_provided: Option<BigDecimal>,
    pub discrepancy: Option<BigDecimal>,
    pub reconciliation_status: ReconciliationStatus,
    /// Distinct legacy asset codes seen in the batch
    pub unique_assets: Vec<String>,
    /// Legacy codes with no canonical asset
    pub unmapped_assets: Vec<String>,
    /// Consumptions that carry no asset code at all
    pub unassigned_consumptions: usize,
    /// Liters consumed per canonical asset; unmapped codes are left out
    pub asset_consumption: BTreeMap<String, BigDecimal>,
    pub transfer_litros_in: BigDecimal,
    pub transfer_litros_out: BigDecimal,
    pub meter_readings: Vec<MeterReading>,
}

impl PlantBatch {
    pub fn warehouse(&self) -> WarehouseKey {
        WarehouseKey::new(self.plant_code.as_str(), self.warehouse_number.as_str())
    }

    /// Consumption that was not relocated to another warehouse
    pub fn true_consumption(&self) -> BigDecimal {
        &self.total_litros_out - &self.transfer_litros_out
    }

    pub fn has_meter_errors(&self) -> bool {
        self.meter_readings.iter().any(|r| r.has_errors)
    }
}

/// Severity of a validation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// What a meter validation message is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeterIssue {
    HorometerRegression,
    KilometerRegression,
    ImplausibleHourRate,
    ImplausibleKmRate,
    SameDayReading,
}

impl MeterIssue {
    pub fn severity(&self) -> Severity {
        match self {
            MeterIssue::HorometerRegression | MeterIssue::KilometerRegression => Severity::Error,
            MeterIssue::ImplausibleHourRate
            | MeterIssue::ImplausibleKmRate
            | MeterIssue::SameDayReading => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMessage {
    pub issue: MeterIssue,
    pub severity: Severity,
    pub message: String,
}

/// Derived meter progression for one consumption of one asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    /// Canonical asset id
    pub asset_code: String,
    pub reading_date: NaiveDate,
    pub horometer: Option<BigDecimal>,
    pub kilometer: Option<BigDecimal>,
    pub horometer_delta: Option<BigDecimal>,
    pub kilometer_delta: Option<BigDecimal>,
    pub fuel_consumed: BigDecimal,
    pub daily_hours_avg: Option<BigDecimal>,
    pub daily_km_avg: Option<BigDecimal>,
    /// Liters per engine hour; absent when the hour delta is not positive
    pub fuel_efficiency_per_hour: Option<BigDecimal>,
    pub validation_messages: Vec<ValidationMessage>,
    pub has_warnings: bool,
    pub has_errors: bool,
    pub original_row_number: Option<usize>,
}

/// Record of a confirmed transfer link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferLink {
    pub consumption_id: String,
    pub entry_id: String,
    pub preserve_price: bool,
    /// Entry cost before the link
    pub previous_entry_unit_cost: Option<BigDecimal>,
    /// Entry cost after the link
    pub entry_unit_cost: Option<BigDecimal>,
    pub linked_at: NaiveDateTime,
}

/// Row-scoped failure to read a legacy cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("row {row_number}: invalid {field} '{value}': {reason}")]
pub struct ParseError {
    pub row_number: usize,
    pub field: String,
    pub value: String,
    pub reason: String,
}

/// Consumption whose asset code has no canonical mapping yet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("row {row_number}: asset code '{asset_code}' has no canonical mapping")]
pub struct MappingPendingError {
    pub row_number: usize,
    pub transaction_id: String,
    pub asset_code: String,
}

/// Meter validation finding, non-fatal to the batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub row_number: Option<usize>,
    pub asset_code: String,
    pub issue: MeterIssue,
    pub severity: Severity,
    pub message: String,
}

/// Computed and provided final inventory disagree beyond tolerance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDiscrepancy {
    pub batch_id: String,
    pub plant_code: String,
    pub warehouse_number: String,
    pub computed: BigDecimal,
    pub provided: BigDecimal,
    pub discrepancy: BigDecimal,
    pub tolerance: BigDecimal,
}

/// Everything a batch run reports instead of aborting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchDiagnostic {
    Parse(ParseError),
    Unclassified { row_number: usize, reason: String },
    MappingPending(MappingPendingError),
    Validation(ValidationWarning),
    Discrepancy(ReconciliationDiscrepancy),
}

impl BatchDiagnostic {
    /// Source row the diagnostic points at, when it is row-scoped
    pub fn row_number(&self) -> Option<usize> {
        match self {
            BatchDiagnostic::Parse(e) => Some(e.row_number),
            BatchDiagnostic::Unclassified { row_number, .. } => Some(*row_number),
            BatchDiagnostic::MappingPending(e) => Some(e.row_number),
            BatchDiagnostic::Validation(w) => w.row_number,
            BatchDiagnostic::Discrepancy(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        match self {
            BatchDiagnostic::Parse(_) => true,
            BatchDiagnostic::Validation(w) => w.severity == Severity::Error,
            _ => false,
        }
    }
}

/// Why a transfer link was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    EntryAlreadyLinked,
    ConsumptionAlreadyLinked,
    SelfReference,
    SameType,
    UnexpectedType,
    ProductMismatch,
    SameWarehouse,
    MissingSourceCost,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConflictReason::EntryAlreadyLinked => "entry is already linked",
            ConflictReason::ConsumptionAlreadyLinked => "consumption is already linked",
            ConflictReason::SelfReference => "a transaction cannot be linked to itself",
            ConflictReason::SameType => "both sides have the same type",
            ConflictReason::UnexpectedType => "pair must be a consumption and an entry",
            ConflictReason::ProductMismatch => "products differ",
            ConflictReason::SameWarehouse => "both sides are in the same warehouse",
            ConflictReason::MissingSourceCost => "consumption has no unit cost to preserve",
        };
        f.write_str(text)
    }
}

/// Errors that can occur in the fuel ledger
#[derive(Debug, thiserror::Error)]
pub enum FuelError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    MappingPending(#[from] MappingPendingError),
    #[error("Transfer link conflict ({reason}): consumption '{consumption_id}', entry '{entry_id}'")]
    TransferLinkConflict {
        reason: ConflictReason,
        consumption_id: String,
        entry_id: String,
    },
    #[error("No transfer candidate for consumption '{consumption_id}' in warehouse '{warehouse}'")]
    NoTransferCandidate {
        consumption_id: String,
        warehouse: WarehouseKey,
    },
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Batch not found: {0}")]
    BatchNotFound(String),
    #[error("Warehouse not found: {0}")]
    WarehouseNotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FuelError {
    /// Persistence failures leave no partial state and may be retried by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, FuelError::Persistence(_))
    }

    pub(crate) fn conflict(
        reason: ConflictReason,
        consumption_id: &str,
        entry_id: &str,
    ) -> Self {
        FuelError::TransferLinkConflict {
            reason,
            consumption_id: consumption_id.to_string(),
            entry_id: entry_id.to_string(),
        }
    }
}

/// Result type for fuel ledger operations
pub type FuelResult<T> = Result<T, FuelError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_adjustment_direction_drives_flow() {
        let mut adj = Transaction::new(
            TransactionType::Adjustment,
            "P1".to_string(),
            "W1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(40),
            date(1),
        );
        assert!(adj.is_inflow());
        assert_eq!(adj.signed_quantity(), BigDecimal::from(40));

        adj.adjustment_direction = Some(AdjustmentDirection::Decrease);
        assert!(adj.is_outflow());
        assert_eq!(adj.signed_quantity(), BigDecimal::from(-40));
    }

    #[test]
    fn test_transaction_validation() {
        let mut txn = Transaction::new(
            TransactionType::Consumption,
            "P1".to_string(),
            "W1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(10),
            date(1),
        );
        assert!(txn.validate().is_ok());

        txn.adjustment_direction = Some(AdjustmentDirection::Decrease);
        assert!(txn.validate().is_err());
        txn.adjustment_direction = None;

        txn.is_transfer = true;
        assert!(txn.validate().is_err());

        txn.reference_transaction_id = Some(txn.id.clone());
        assert!(txn.validate().is_err());

        txn.reference_transaction_id = Some("other".to_string());
        assert!(txn.validate().is_ok());
    }

    #[test]
    fn test_date_range_extend() {
        let mut range = DateRange::single(date(10));
        range.extend(date(3));
        range.extend(date(20));
        assert_eq!(range.start, date(3));
        assert_eq!(range.end, date(20));
        assert!(range.contains(date(10)));
        assert!(!range.contains(date(21)));
    }

    #[test]
    fn test_warehouse_numbers_repeat_across_plants() {
        let txn = Transaction::new(
            TransactionType::Entry,
            "P02".to_string(),
            "1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(10),
            date(1),
        );
        assert!(WarehouseKey::new("P02", "1").holds(&txn));
        assert!(!WarehouseKey::new("P01", "1").holds(&txn));
        assert_eq!(txn.warehouse().to_string(), "P02/1");
    }

    #[test]
    fn test_product_aliases() {
        assert_eq!(ProductType::parse(" Diesel "), Some(ProductType::Diesel));
        assert_eq!(ProductType::parse("AdBlue"), Some(ProductType::Urea));
        assert_eq!(ProductType::parse("gasoline"), None);
    }

    #[test]
    fn test_only_persistence_errors_are_retryable() {
        assert!(FuelError::Persistence("timeout".to_string()).is_retryable());
        assert!(!FuelError::conflict(ConflictReason::SameType, "a", "b").is_retryable());
    }
}
