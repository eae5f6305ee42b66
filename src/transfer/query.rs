//! The single parameterized candidate query behind every transfer search

use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::TransferConfig;
use crate::traits::TransactionFilter;
use crate::types::*;

/// Which warehouses a search looks at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseScope {
    /// Only this destination warehouse
    Warehouse(WarehouseKey),
    /// Any warehouse of any plant
    Any,
}

/// Accepts quantities within `max(percent% of target, min_liters)` of the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityTolerance {
    pub target: BigDecimal,
    pub percent: BigDecimal,
    pub min_liters: BigDecimal,
}

impl QuantityTolerance {
    /// Largest accepted absolute difference, in liters
    pub fn allowance(&self) -> BigDecimal {
        let relative = &self.target * &self.percent / BigDecimal::from(100);
        if relative > self.min_liters {
            relative
        } else {
            self.min_liters.clone()
        }
    }

    pub fn accepts(&self, quantity: &BigDecimal) -> bool {
        (quantity - &self.target).abs() <= self.allowance()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateQuery {
    pub product_type: ProductType,
    pub scope: WarehouseScope,
    /// The consumption's own warehouse, never a transfer destination
    pub source: WarehouseKey,
    pub center_date: NaiveDate,
    /// Days accepted on either side of `center_date`
    pub window_days: i64,
    /// `None` disables quantity filtering
    pub quantity: Option<QuantityTolerance>,
    pub exclude_linked: bool,
}

impl CandidateQuery {
    /// Tight search whose results may be linked automatically
    pub fn strict(consumption: &Transaction, to: &WarehouseKey, config: &TransferConfig) -> Self {
        Self {
            product_type: consumption.product_type,
            scope: WarehouseScope::Warehouse(to.clone()),
            source: consumption.warehouse(),
            center_date: consumption.transaction_date,
            window_days: config.window_days,
            quantity: Some(QuantityTolerance {
                target: consumption.quantity_liters.clone(),
                percent: config.quantity_tolerance_percent.clone(),
                min_liters: config.min_tolerance_liters.clone(),
            }),
            exclude_linked: true,
        }
    }

    /// Wide search for human inspection: longer window, no quantity filter
    pub fn fallback(
        consumption: &Transaction,
        to: Option<&WarehouseKey>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            product_type: consumption.product_type,
            scope: to.map_or(WarehouseScope::Any, |key| WarehouseScope::Warehouse(key.clone())),
            source: consumption.warehouse(),
            center_date: consumption.transaction_date,
            window_days: config.fallback_window_days,
            quantity: None,
            exclude_linked: true,
        }
    }

    pub fn date_window(&self) -> (NaiveDate, NaiveDate) {
        let span = Duration::days(self.window_days);
        (self.center_date - span, self.center_date + span)
    }

    /// The part of the query the storage layer can evaluate
    pub fn storage_filter(&self) -> TransactionFilter {
        let (start, end) = self.date_window();
        let (plant_id, warehouse_id) = match &self.scope {
            WarehouseScope::Warehouse(key) => {
                (Some(key.plant_id.clone()), Some(key.warehouse_id.clone()))
            }
            WarehouseScope::Any => (None, None),
        };
        TransactionFilter {
            product_type: Some(self.product_type),
            plant_id,
            warehouse_id,
            start_date: Some(start),
            end_date: Some(end),
            transaction_type: Some(TransactionType::Entry),
            is_transfer: if self.exclude_linked { Some(false) } else { None },
            batch_id: None,
        }
    }

    /// Full check of one entry against the query
    pub fn accepts(&self, entry: &Transaction) -> bool {
        if !self.storage_filter().matches(entry) || self.source.holds(entry) {
            return false;
        }
        self.quantity
            .as_ref()
            .is_none_or(|tolerance| tolerance.accepts(&entry.quantity_liters))
    }
}
