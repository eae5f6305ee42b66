//! Computed vs. reported final inventory

use bigdecimal::BigDecimal;
use tracing::{debug, warn};

use crate::config::ReconciliationConfig;
use crate::types::*;

/// Compares a batch's computed final inventory with the one reported by the legacy log.
///
/// Only the batch summary fields `discrepancy` and `reconciliation_status`
/// are written; recorded quantities are never adjusted to close a gap.
#[derive(Debug, Clone)]
pub struct InventoryReconciler {
    tolerance: BigDecimal,
}

impl Default for InventoryReconciler {
    fn default() -> Self {
        Self::new(&ReconciliationConfig::default())
    }
}

impl InventoryReconciler {
    pub fn new(config: &ReconciliationConfig) -> Self {
        Self {
            tolerance: config.tolerance_liters.clone(),
        }
    }

    pub fn tolerance(&self) -> &BigDecimal {
        &self.tolerance
    }

    /// Status for a given discrepancy
    pub fn classify(&self, discrepancy: &BigDecimal) -> ReconciliationStatus {
        if discrepancy.abs() <= self.tolerance {
            ReconciliationStatus::Ok
        } else {
            ReconciliationStatus::Warning
        }
    }

    /// Reconcile one batch, returning the advisory discrepancy when it is out of tolerance
    pub fn reconcile(&self, batch: &mut PlantBatch) -> Option<ReconciliationDiscrepancy> {
        let Some(provided) = batch.final_inventory_provided.clone() else {
            batch.discrepancy = None;
            batch.reconciliation_status = ReconciliationStatus::Unverified;
            debug!("Batch {} has no reported final inventory", batch.batch_id);
            return None;
        };

        let discrepancy = &batch.final_inventory_computed - &provided;
        let status = self.classify(&discrepancy);
        batch.discrepancy = Some(discrepancy.clone());
        batch.reconciliation_status = status;

        match status {
            ReconciliationStatus::Warning => {
                warn!(
                    "Batch {} (plant {}, warehouse {}): computed {} L vs reported {} L, off by {} L",
                    batch.batch_id,
                    batch.plant_code,
                    batch.warehouse_number,
                    batch.final_inventory_computed,
                    provided,
                    discrepancy
                );
                Some(ReconciliationDiscrepancy {
                    batch_id: batch.batch_id.clone(),
                    plant_code: batch.plant_code.clone(),
                    warehouse_number: batch.warehouse_number.clone(),
                    computed: batch.final_inventory_computed.clone(),
                    provided,
                    discrepancy,
                    tolerance: self.tolerance.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::BatchAggregator;

    fn batch(computed: i64, provided: Option<&str>) -> PlantBatch {
        let mut batch = BatchAggregator::empty_batch("P01", "1", ProductType::Diesel);
        batch.initial_inventory = BigDecimal::from(computed);
        batch.final_inventory_computed = BigDecimal::from(computed);
        batch.final_inventory_provided = provided.map(|p| p.parse().unwrap());
        batch
    }

    #[test]
    fn test_discrepancy_beyond_tolerance() {
        let mut b = batch(1170, Some("1160"));
        let finding = InventoryReconciler::default().reconcile(&mut b).unwrap();

        assert_eq!(b.discrepancy, Some(BigDecimal::from(10)));
        assert_eq!(b.reconciliation_status, ReconciliationStatus::Warning);
        assert_eq!(finding.discrepancy, BigDecimal::from(10));
        assert_eq!(finding.tolerance, BigDecimal::from(2));
        // quantities untouched
        assert_eq!(b.final_inventory_computed, BigDecimal::from(1170));
        assert_eq!(b.final_inventory_provided, Some(BigDecimal::from(1160)));
    }

    #[test]
    fn test_rounding_gap_within_tolerance() {
        let mut b = batch(500, Some("501.75"));
        assert!(InventoryReconciler::default().reconcile(&mut b).is_none());
        assert_eq!(b.reconciliation_status, ReconciliationStatus::Ok);
        assert_eq!(b.discrepancy, Some("-1.75".parse().unwrap()));

        let mut edge = batch(500, Some("498"));
        InventoryReconciler::default().reconcile(&mut edge);
        assert_eq!(edge.reconciliation_status, ReconciliationStatus::Ok);
    }

    #[test]
    fn test_configurable_tolerance() {
        let strict = InventoryReconciler::new(&ReconciliationConfig {
            tolerance_liters: "0.5".parse().unwrap(),
        });
        let mut b = batch(500, Some("501"));
        assert!(strict.reconcile(&mut b).is_some());
    }

    #[test]
    fn test_missing_report_is_unverified() {
        let mut b = batch(500, None);
        assert!(InventoryReconciler::default().reconcile(&mut b).is_none());
        assert_eq!(b.reconciliation_status, ReconciliationStatus::Unverified);
        assert_eq!(b.discrepancy, None);
    }
}
