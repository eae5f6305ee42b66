//! Main ledger orchestrator driving the import → map → process flow

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FuelConfig;
use crate::import::resolver::normalize_code;
use crate::import::{
    AssetResolver, BatchAggregator, ImportContext, LegacyRow, Resolution, RowParser, StagedBatch,
    UnclassifiedRow,
};
use crate::ledger::costing::{value_warehouse, CostLayer, FifoValuation};
use crate::ledger::TransactionManager;
use crate::reconciliation::{InventoryReconciler, MeterReadingValidator};
use crate::traits::*;
use crate::transfer::{MatchState, TransferCandidate, TransferLinkRequest, TransferMatcher};
use crate::types::*;

/// An import that has been parsed, grouped and mapped but not persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StagedImport {
    pub context: ImportContext,
    pub batches: Vec<StagedBatch>,
    /// Unclassified rows naming no plant or warehouse
    pub orphans: Vec<UnclassifiedRow>,
    pub parse_errors: Vec<ParseError>,
    /// Consumptions still waiting on an asset mapping
    pub pending: Vec<MappingPendingError>,
}

impl StagedImport {
    /// Distinct legacy codes that still need a mapping, one spelling per code
    pub fn pending_codes(&self) -> Vec<String> {
        let mut codes: BTreeMap<String, String> = BTreeMap::new();
        for code in self.batches.iter().flat_map(|b| b.batch.unmapped_assets.iter()) {
            codes
                .entry(normalize_code(code))
                .or_insert_with(|| code.clone());
        }
        codes.into_values().collect()
    }

    /// Diagnostics known before processing, in row order
    pub fn diagnostics(&self) -> Vec<BatchDiagnostic> {
        let mut diagnostics: Vec<BatchDiagnostic> = self
            .parse_errors
            .iter()
            .cloned()
            .map(BatchDiagnostic::Parse)
            .collect();
        diagnostics.extend(
            self.batches
                .iter()
                .flat_map(|b| b.unclassified.iter())
                .chain(self.orphans.iter())
                .map(|row| BatchDiagnostic::Unclassified {
                    row_number: row.row_number,
                    reason: row.reason.clone(),
                }),
        );
        diagnostics.extend(self.pending.iter().cloned().map(BatchDiagnostic::MappingPending));
        diagnostics.sort_by_key(|d| d.row_number());
        diagnostics
    }
}

/// Outcome of committing a staged import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub batches: Vec<PlantBatch>,
    pub transactions_recorded: usize,
    pub diagnostics: Vec<BatchDiagnostic>,
}

impl ImportReport {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(BatchDiagnostic::is_error)
    }

    /// Batch for a (plant, warehouse) pair
    pub fn batch(&self, plant_code: &str, warehouse_number: &str) -> Option<&PlantBatch> {
        self.batches
            .iter()
            .find(|b| b.plant_code == plant_code && b.warehouse_number == warehouse_number)
    }

    pub fn discrepancies(&self) -> impl Iterator<Item = &ReconciliationDiscrepancy> {
        self.diagnostics.iter().filter_map(|d| match d {
            BatchDiagnostic::Discrepancy(found) => Some(found),
            _ => None,
        })
    }
}

/// Main fuel ledger that orchestrates import, reconciliation and transfer linking
pub struct FuelLedger<S: TransactionStorage> {
    storage: S,
    config: FuelConfig,
    parser: RowParser,
    aggregator: BatchAggregator,
    resolver: AssetResolver,
    meters: MeterReadingValidator,
    reconciler: InventoryReconciler,
    transaction_manager: TransactionManager<S>,
    matcher: TransferMatcher<S>,
    warehouses: Option<Arc<dyn WarehouseDirectory>>,
}

impl<S: TransactionStorage + Clone> FuelLedger<S> {
    /// Create a new ledger with the given storage backend and configuration
    pub fn new(storage: S, config: FuelConfig) -> FuelResult<Self> {
        config.validate()?;
        Ok(Self {
            parser: RowParser::new(&config.import),
            aggregator: BatchAggregator::new(),
            resolver: AssetResolver::new(),
            meters: MeterReadingValidator::new(&config.meter),
            reconciler: InventoryReconciler::new(&config.reconciliation),
            transaction_manager: TransactionManager::new(storage.clone()),
            matcher: TransferMatcher::new(storage.clone(), config.transfer.clone()),
            warehouses: None,
            storage,
            config,
        })
    }

    /// Create a new ledger with a custom transaction validator
    pub fn with_validator(
        storage: S,
        config: FuelConfig,
        validator: Box<dyn TransactionValidator>,
    ) -> FuelResult<Self> {
        let mut ledger = Self::new(storage, config)?;
        ledger.transaction_manager =
            TransactionManager::with_validator(ledger.storage.clone(), validator);
        Ok(ledger)
    }

    /// Resolve codes the explicit mappings miss through the asset registry
    pub fn with_asset_directory(mut self, directory: Arc<dyn AssetDirectory>) -> Self {
        self.resolver = AssetResolver::with_directory(directory);
        self
    }

    /// Check warehouses referenced by transfers and valuations
    pub fn with_warehouse_directory(mut self, directory: Arc<dyn WarehouseDirectory>) -> Self {
        self.matcher = TransferMatcher::new(self.storage.clone(), self.config.transfer.clone())
            .with_directory(directory.clone());
        self.warehouses = Some(directory);
        self
    }

    pub fn config(&self) -> &FuelConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn resolver(&self) -> &AssetResolver {
        &self.resolver
    }

    pub fn transactions(&mut self) -> &mut TransactionManager<S> {
        &mut self.transaction_manager
    }

    // Import operations
    /// Parse, group and map legacy rows without persisting anything
    pub fn stage(&self, rows: &[LegacyRow], context: &ImportContext) -> StagedImport {
        let outcome = self.parser.parse_rows(rows, context);
        let aggregation = self.aggregator.aggregate(outcome.rows, context);

        let mut staged = StagedImport {
            context: context.clone(),
            batches: aggregation.batches,
            orphans: aggregation.orphans,
            parse_errors: outcome.errors,
            pending: Vec::new(),
        };
        self.apply_mappings(&mut staged);

        info!(
            "Staged {} rows into {} batches: {} parse errors, {} unmapped codes",
            rows.len(),
            staged.batches.len(),
            staged.parse_errors.len(),
            staged.pending_codes().len()
        );
        staged
    }

    /// Map a legacy code and re-derive the staged batches
    pub fn resolve_mapping(
        &mut self,
        staged: &mut StagedImport,
        legacy_code: &str,
        canonical_asset_id: &str,
    ) -> FuelResult<Resolution> {
        let resolution = self.resolver.resolve(legacy_code, canonical_asset_id)?;
        self.apply_mappings(staged);
        Ok(resolution)
    }

    fn apply_mappings(&self, staged: &mut StagedImport) {
        staged.pending = staged
            .batches
            .iter_mut()
            .flat_map(|batch| self.resolver.apply(batch))
            .collect();
    }

    /// Validate meters, reconcile and persist a staged import.
    ///
    /// Transactions are appended in one write before any batch summary is
    /// saved. A failed append persists nothing, and a commit that failed while
    /// saving summaries can be retried with the same staged import.
    pub async fn commit(&mut self, staged: StagedImport) -> FuelResult<ImportReport> {
        let mut diagnostics = staged.diagnostics();
        let StagedImport { batches, .. } = staged;

        let mut summaries = Vec::with_capacity(batches.len());
        let mut transactions = Vec::new();
        for StagedBatch {
            mut batch,
            transactions: batch_transactions,
            ..
        } in batches
        {
            diagnostics.extend(self.process_batch(&mut batch, &batch_transactions));
            summaries.push(batch);
            transactions.extend(batch_transactions);
        }

        self.transaction_manager
            .record_transactions(&transactions)
            .await?;
        for batch in &summaries {
            self.storage.save_batch(batch).await?;
        }

        info!(
            "Committed {} transactions in {} batches with {} diagnostics",
            transactions.len(),
            summaries.len(),
            diagnostics.len()
        );

        Ok(ImportReport {
            batches: summaries,
            transactions_recorded: transactions.len(),
            diagnostics,
        })
    }

    /// Stage and commit in one call, with no manual mapping step
    pub async fn import(
        &mut self,
        rows: &[LegacyRow],
        context: &ImportContext,
    ) -> FuelResult<ImportReport> {
        let staged = self.stage(rows, context);
        self.commit(staged).await
    }

    /// Meter validation and reconciliation for one batch
    fn process_batch(
        &self,
        batch: &mut PlantBatch,
        transactions: &[Transaction],
    ) -> Vec<BatchDiagnostic> {
        let consumptions = self.resolver.resolved_consumptions(transactions);
        let validation = self.meters.validate(&consumptions);
        batch.meter_readings = validation.readings;

        let mut diagnostics: Vec<BatchDiagnostic> = validation
            .warnings
            .into_iter()
            .map(BatchDiagnostic::Validation)
            .collect();
        if let Some(discrepancy) = self.reconciler.reconcile(batch) {
            diagnostics.push(BatchDiagnostic::Discrepancy(discrepancy));
        }

        debug!(
            "Batch {} (plant {}, warehouse {}): status {:?}, {} diagnostics",
            batch.batch_id,
            batch.plant_code,
            batch.warehouse_number,
            batch.reconciliation_status,
            diagnostics.len()
        );
        diagnostics
    }

    // Batch operations
    /// Get a batch summary by ID
    pub async fn get_batch(&self, batch_id: &str) -> FuelResult<Option<PlantBatch>> {
        self.storage.get_batch(batch_id).await
    }

    /// List all batch summaries
    pub async fn list_batches(&self) -> FuelResult<Vec<PlantBatch>> {
        self.storage.list_batches().await
    }

    /// Re-derive a persisted batch from the transactions committed with it.
    ///
    /// Transactions from other imports never count, even when they share the
    /// warehouse and dates.
    pub async fn refresh_batch(&mut self, batch_id: &str) -> FuelResult<PlantBatch> {
        let previous = self
            .storage
            .get_batch(batch_id)
            .await?
            .ok_or_else(|| FuelError::BatchNotFound(batch_id.to_string()))?;

        let mut transactions = self
            .storage
            .query_transactions(&TransactionFilter::batch(batch_id))
            .await?;
        transactions.sort_by(|a, b| {
            (a.transaction_date, a.source_row_number)
                .cmp(&(b.transaction_date, b.source_row_number))
        });

        let mut batch = self.aggregator.refresh(&previous, &transactions);
        self.resolver.apply_to_batch(&mut batch, &transactions);
        self.process_batch(&mut batch, &transactions);
        self.storage.update_batch(&batch).await?;
        Ok(batch)
    }

    // Transfer operations
    /// Strict candidate search for a suspected transfer-out
    pub async fn search_transfer_candidates(
        &self,
        consumption_id: &str,
        to: &WarehouseKey,
        preserve_price: bool,
    ) -> FuelResult<MatchState> {
        self.matcher.search(consumption_id, to, preserve_price).await
    }

    /// Wide search for manual review
    pub async fn search_transfer_fallback(
        &self,
        consumption_id: &str,
        to: Option<&WarehouseKey>,
    ) -> FuelResult<Vec<TransferCandidate>> {
        self.matcher.search_fallback(consumption_id, to).await
    }

    /// Link a transfer pair, then refresh the batches on both sides.
    ///
    /// A failed refresh does not undo the link; it is logged and the batch
    /// can be refreshed again with [`refresh_batch`](Self::refresh_batch).
    pub async fn link_transfer(
        &mut self,
        request: &TransferLinkRequest,
    ) -> FuelResult<TransferLink> {
        let link = self.matcher.link(request).await?;

        for batch_id in self.batches_touching(&link).await? {
            if let Err(error) = self.refresh_batch(&batch_id).await {
                warn!("Batch {} not refreshed after transfer link: {}", batch_id, error);
            }
        }
        Ok(link)
    }

    /// Batches the two sides of a link were committed with
    async fn batches_touching(&self, link: &TransferLink) -> FuelResult<Vec<String>> {
        let mut batch_ids = Vec::with_capacity(2);
        for id in [&link.consumption_id, &link.entry_id] {
            if let Some(batch_id) = self
                .storage
                .get_transaction(id)
                .await?
                .and_then(|t| t.batch_id)
            {
                if !batch_ids.contains(&batch_id) {
                    batch_ids.push(batch_id);
                }
            }
        }
        Ok(batch_ids)
    }

    // Costing operations
    /// FIFO valuation of a warehouse's stock of one product.
    ///
    /// The opening balance of the warehouse's earliest batch is the oldest,
    /// uncosted layer.
    pub async fn warehouse_valuation(
        &self,
        warehouse: &WarehouseKey,
        product_type: ProductType,
        as_of: Option<NaiveDate>,
    ) -> FuelResult<FifoValuation> {
        if let Some(directory) = &self.warehouses {
            if !directory.warehouse_exists(warehouse) {
                return Err(FuelError::WarehouseNotFound(warehouse.to_string()));
            }
        }

        let opening = self
            .storage
            .list_batches()
            .await?
            .into_iter()
            .filter(|b| b.product_type == product_type && &b.warehouse() == warehouse)
            .filter_map(|b| b.date_range.map(|range| (range.start, b)))
            .min_by_key(|(start, _)| *start)
            .and_then(|(_, batch)| CostLayer::opening(&batch));

        let transactions = self
            .transaction_manager
            .get_warehouse_transactions(warehouse, Some(product_type), None, as_of)
            .await?;
        Ok(value_warehouse(
            warehouse,
            product_type,
            opening,
            &transactions,
            as_of,
        ))
    }
}
