//! Validation utilities

use crate::traits::*;
use crate::types::*;
use bigdecimal::BigDecimal;

/// Validate that a quantity is positive
pub fn validate_positive_quantity(quantity: &BigDecimal) -> FuelResult<()> {
    if *quantity <= BigDecimal::from(0) {
        Err(FuelError::Validation(
            "Quantity must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Validate a plant or warehouse identifier
pub fn validate_location_id(kind: &str, id: &str) -> FuelResult<()> {
    if id.trim().is_empty() {
        return Err(FuelError::Validation(format!("{} ID cannot be empty", kind)));
    }

    if id.len() > 50 {
        return Err(FuelError::Validation(format!(
            "{} ID cannot exceed 50 characters",
            kind
        )));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(FuelError::Validation(format!(
            "{} ID can only contain alphanumeric characters, dashes, and underscores",
            kind
        )));
    }

    Ok(())
}

/// Validate a legacy equipment code
pub fn validate_asset_code(code: &str) -> FuelResult<()> {
    if code.trim().is_empty() {
        return Err(FuelError::Validation(
            "Asset code cannot be empty".to_string(),
        ));
    }

    if code.len() > 100 {
        return Err(FuelError::Validation(
            "Asset code cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Stricter transaction validator for hand-entered movements
pub struct StrictTransactionValidator;

impl TransactionValidator for StrictTransactionValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> FuelResult<()> {
        transaction.validate()?;

        validate_location_id("Plant", &transaction.plant_id)?;
        validate_location_id("Warehouse", &transaction.warehouse_id)?;
        validate_positive_quantity(&transaction.quantity_liters)?;

        if let Some(code) = &transaction.asset_code {
            validate_asset_code(code)?;
        }

        if transaction.transaction_type == TransactionType::Entry
            && (transaction.horometer.is_some() || transaction.kilometer.is_some())
        {
            return Err(FuelError::Validation(format!(
                "Entry '{}' cannot carry meter readings",
                transaction.id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn consumption(plant: &str, liters: i64) -> Transaction {
        Transaction::new(
            TransactionType::Consumption,
            plant.to_string(),
            "1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(liters),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        )
    }

    #[test]
    fn test_location_ids() {
        assert!(validate_location_id("Plant", "P-01").is_ok());
        assert!(validate_location_id("Plant", " ").is_err());
        assert!(validate_location_id("Plant", "P 01").is_err());
        assert!(validate_location_id("Plant", &"P".repeat(51)).is_err());
    }

    #[test]
    fn test_strict_validator() {
        let validator = StrictTransactionValidator;
        assert!(validator.validate_transaction(&consumption("P01", 50)).is_ok());
        assert!(validator.validate_transaction(&consumption("P01", 0)).is_err());
        assert!(validator.validate_transaction(&consumption("", 50)).is_err());

        let mut blank_asset = consumption("P01", 50);
        blank_asset.asset_code = Some("  ".to_string());
        assert!(validator.validate_transaction(&blank_asset).is_err());
    }
}
