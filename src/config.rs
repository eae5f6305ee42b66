//! Request-scoped configuration for import, reconciliation and transfer matching
//!
//! Every section defaults sensibly, so an empty TOML document is a valid
//! configuration. Configuration is handed to each stage explicitly.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::types::{FuelError, FuelResult};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FuelConfig {
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// How legacy cells are read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// `chrono` formats tried in order
    pub date_formats: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            date_formats: vec![
                "%Y-%m-%d".to_string(),
                "%d/%m/%Y".to_string(),
                "%d-%m-%Y".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconciliationConfig {
    /// Largest absolute discrepancy, in liters, still reported as ok
    pub tolerance_liters: BigDecimal,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            tolerance_liters: BigDecimal::from(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Engine hours per calendar day above which a delta is implausible
    pub max_hours_per_day: BigDecimal,
    /// Kilometers per calendar day above which a delta is implausible
    pub max_km_per_day: BigDecimal,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            max_hours_per_day: BigDecimal::from(24),
            max_km_per_day: BigDecimal::from(1500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Relative quantity tolerance, in percent of the consumption
    pub quantity_tolerance_percent: BigDecimal,
    /// Floor of the quantity tolerance, in liters
    pub min_tolerance_liters: BigDecimal,
    /// Days on either side of the consumption date
    pub window_days: i64,
    /// Window for the inspection-only fallback search
    pub fallback_window_days: i64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            quantity_tolerance_percent: BigDecimal::from(5),
            min_tolerance_liters: BigDecimal::from(10),
            window_days: 7,
            fallback_window_days: 30,
        }
    }
}

impl FuelConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> FuelResult<Self> {
        let config: FuelConfig =
            toml::from_str(text).map_err(|e| FuelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> FuelResult<Self> {
        let path = path.as_ref();
        debug!("Loading fuel ledger configuration from {}", path.display());
        let text = std::fs::read_to_string(path)
            .map_err(|e| FuelError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> FuelResult<()> {
        let zero = BigDecimal::from(0);

        if self.import.date_formats.is_empty() {
            return Err(FuelError::Config(
                "import.date_formats cannot be empty".to_string(),
            ));
        }
        if self.reconciliation.tolerance_liters < zero {
            return Err(FuelError::Config(
                "reconciliation.tolerance_liters cannot be negative".to_string(),
            ));
        }
        if self.meter.max_hours_per_day <= zero || self.meter.max_km_per_day <= zero {
            return Err(FuelError::Config(
                "meter rate limits must be positive".to_string(),
            ));
        }
        if self.transfer.quantity_tolerance_percent < zero
            || self.transfer.min_tolerance_liters < zero
        {
            return Err(FuelError::Config(
                "transfer tolerances cannot be negative".to_string(),
            ));
        }
        if self.transfer.window_days <= 0 {
            return Err(FuelError::Config(
                "transfer.window_days must be positive".to_string(),
            ));
        }
        if self.transfer.fallback_window_days < self.transfer.window_days {
            return Err(FuelError::Config(
                "transfer.fallback_window_days must cover transfer.window_days".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = FuelConfig::from_toml_str("").unwrap();
        assert_eq!(config, FuelConfig::default());
        assert_eq!(config.reconciliation.tolerance_liters, BigDecimal::from(2));
        assert_eq!(config.transfer.window_days, 7);
    }

    #[test]
    fn test_partial_sections() {
        let config = FuelConfig::from_toml_str(
            r#"
            [reconciliation]
            tolerance_liters = "0.5"

            [transfer]
            window_days = 3
            "#,
        )
        .unwrap();

        assert_eq!(
            config.reconciliation.tolerance_liters,
            "0.5".parse::<BigDecimal>().unwrap()
        );
        assert_eq!(config.transfer.window_days, 3);
        assert_eq!(config.transfer.fallback_window_days, 30);
        assert_eq!(config.meter, MeterConfig::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let negative = FuelConfig::from_toml_str(
            r#"
            [reconciliation]
            tolerance_liters = "-1"
            "#,
        );
        assert!(matches!(negative, Err(FuelError::Config(_))));

        let narrow_fallback = FuelConfig::from_toml_str(
            r#"
            [transfer]
            window_days = 10
            fallback_window_days = 5
            "#,
        );
        assert!(narrow_fallback.is_err());

        assert!(FuelConfig::from_toml_str("transfer = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[meter]\nmax_hours_per_day = \"20\"").unwrap();

        let config = FuelConfig::load(file.path()).unwrap();
        assert_eq!(config.meter.max_hours_per_day, BigDecimal::from(20));
        assert!(FuelConfig::load("/nonexistent/fuel.toml").is_err());
    }
}
