//! Legacy equipment code resolution

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use crate::import::aggregator::StagedBatch;
use crate::traits::AssetDirectory;
use crate::types::*;

/// Result of a mapping request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub legacy_code: String,
    pub canonical_asset_id: String,
    /// False when the code was already mapped and nothing changed
    pub created: bool,
}

/// Maps legacy equipment codes to canonical asset ids
#[derive(Clone, Default)]
pub struct AssetResolver {
    mappings: HashMap<String, String>,
    directory: Option<Arc<dyn AssetDirectory>>,
}

impl std::fmt::Debug for AssetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetResolver")
            .field("mappings", &self.mappings)
            .field("has_directory", &self.directory.is_some())
            .finish()
    }
}

/// Codes are compared trimmed and upper-cased
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

impl AssetResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resolver that falls back to the asset registry
    pub fn with_directory(directory: Arc<dyn AssetDirectory>) -> Self {
        Self {
            mappings: HashMap::new(),
            directory: Some(directory),
        }
    }

    /// Number of explicit mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Record `legacy_code → canonical_asset_id`.
    ///
    /// Idempotent: an already-mapped code keeps its existing mapping, which
    /// is returned with `created == false`.
    pub fn resolve(&mut self, legacy_code: &str, canonical_asset_id: &str) -> FuelResult<Resolution> {
        let code = normalize_code(legacy_code);
        if code.is_empty() {
            return Err(FuelError::Validation(
                "Legacy asset code cannot be empty".to_string(),
            ));
        }
        if canonical_asset_id.trim().is_empty() {
            return Err(FuelError::Validation(format!(
                "Canonical asset id for '{}' cannot be empty",
                code
            )));
        }

        if let Some(existing) = self.mappings.get(&code) {
            debug!("Asset code {} already mapped to {}", code, existing);
            return Ok(Resolution {
                legacy_code: code,
                canonical_asset_id: existing.clone(),
                created: false,
            });
        }

        let canonical = canonical_asset_id.trim().to_string();
        self.mappings.insert(code.clone(), canonical.clone());
        info!("Mapped asset code {} to {}", code, canonical);

        Ok(Resolution {
            legacy_code: code,
            canonical_asset_id: canonical,
            created: true,
        })
    }

    /// Canonical id for a legacy code, if one is known
    pub fn lookup(&self, legacy_code: &str) -> Option<String> {
        let code = normalize_code(legacy_code);
        if let Some(canonical) = self.mappings.get(&code) {
            return Some(canonical.clone());
        }
        self.directory
            .as_ref()
            .and_then(|directory| directory.find_asset(&code))
            .map(|asset| asset.asset_id)
    }

    /// Fill in the mapping-dependent fields of a staged batch.
    ///
    /// Returns one pending error per consumption whose code is unresolved.
    /// Those consumptions still count toward batch totals.
    pub fn apply(&self, staged: &mut StagedBatch) -> Vec<MappingPendingError> {
        let (unmapped, asset_consumption, pending) = self.resolve_transactions(&staged.transactions);
        staged.batch.unmapped_assets = unmapped;
        staged.batch.asset_consumption = asset_consumption;

        if !pending.is_empty() {
            info!(
                "Batch {}: {} consumptions waiting on asset mappings ({})",
                staged.batch.batch_id,
                pending.len(),
                staged.batch.unmapped_assets.join(", ")
            );
        }
        pending
    }

    /// Same as [`apply`](Self::apply) for a persisted batch summary
    pub fn apply_to_batch(
        &self,
        batch: &mut PlantBatch,
        transactions: &[Transaction],
    ) -> Vec<MappingPendingError> {
        let (unmapped, asset_consumption, pending) = self.resolve_transactions(transactions);
        batch.unmapped_assets = unmapped;
        batch.asset_consumption = asset_consumption;
        pending
    }

    /// Consumptions whose asset resolves, paired with the canonical id
    pub fn resolved_consumptions<'a>(
        &self,
        transactions: &'a [Transaction],
    ) -> Vec<(String, &'a Transaction)> {
        transactions
            .iter()
            .filter(|t| t.transaction_type == TransactionType::Consumption)
            .filter_map(|t| {
                let code = t.asset_code.as_deref()?;
                self.lookup(code).map(|canonical| (canonical, t))
            })
            .collect()
    }

    fn resolve_transactions(
        &self,
        transactions: &[Transaction],
    ) -> (
        Vec<String>,
        BTreeMap<String, BigDecimal>,
        Vec<MappingPendingError>,
    ) {
        // Keyed by normalized code, keeping the first spelling seen
        let mut unmapped: BTreeMap<String, String> = BTreeMap::new();
        let mut asset_consumption: BTreeMap<String, BigDecimal> = BTreeMap::new();
        let mut pending = Vec::new();

        for txn in transactions {
            let Some(code) = txn.asset_code.as_deref() else {
                continue;
            };
            match self.lookup(code) {
                Some(canonical) => {
                    if txn.transaction_type == TransactionType::Consumption {
                        *asset_consumption
                            .entry(canonical)
                            .or_insert_with(|| BigDecimal::from(0)) += &txn.quantity_liters;
                    }
                }
                None => {
                    unmapped
                        .entry(normalize_code(code))
                        .or_insert_with(|| code.to_string());
                    if txn.transaction_type == TransactionType::Consumption {
                        pending.push(MappingPendingError {
                            row_number: txn.source_row_number.unwrap_or_default(),
                            transaction_id: txn.id.clone(),
                            asset_code: code.to_string(),
                        });
                    }
                }
            }
        }

        (unmapped.into_values().collect(), asset_consumption, pending)
    }
}
