//! Retroactive matching of inter-warehouse transfers
//!
//! A suspected transfer-out consumption moves through
//! `Unmatched → CandidatesFound → Linked`. Searching never writes; only
//! [`TransferMatcher::confirm`] and [`TransferMatcher::link`] mutate, and they
//! do so through a single atomic [`TransactionStorage::link_transfer`] call.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::TransferConfig;
use crate::traits::{TransactionStorage, WarehouseDirectory};
use crate::transfer::query::CandidateQuery;
use crate::types::*;

/// A possible destination entry for a consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCandidate {
    pub consumption_transaction_id: String,
    pub entry_transaction_id: String,
    pub to_warehouse: WarehouseKey,
    pub preserve_price: bool,
    pub entry_date: NaiveDate,
    pub entry_quantity: BigDecimal,
    /// Absolute liters between the two sides
    pub quantity_difference: BigDecimal,
    /// Entry date minus consumption date
    pub day_offset: i64,
}

/// Where a consumption stands in the matching flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MatchState {
    Unmatched,
    /// Ranked best first; the first candidate is the default selection
    CandidatesFound { candidates: Vec<TransferCandidate> },
    Linked {
        consumption_id: String,
        entry_id: String,
    },
}

impl MatchState {
    /// The candidate a confirmation would use by default
    pub fn selected(&self) -> Option<&TransferCandidate> {
        match self {
            MatchState::CandidatesFound { candidates } => candidates.first(),
            _ => None,
        }
    }
}

/// What to link a consumption to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkTarget {
    /// A specific entry, typically chosen by a reviewer
    Entry(String),
    /// The best strict candidate in this warehouse
    Warehouse(WarehouseKey),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLinkRequest {
    pub consumption_id: String,
    pub target: LinkTarget,
    pub preserve_price: bool,
}

/// Finds and links consumption/entry pairs that are the same physical movement
pub struct TransferMatcher<S: TransactionStorage> {
    storage: S,
    config: TransferConfig,
    warehouses: Option<Arc<dyn WarehouseDirectory>>,
}

impl<S: TransactionStorage> TransferMatcher<S> {
    pub fn new(storage: S, config: TransferConfig) -> Self {
        Self {
            storage,
            config,
            warehouses: None,
        }
    }

    /// Validate destination warehouses against a directory
    pub fn with_directory(mut self, warehouses: Arc<dyn WarehouseDirectory>) -> Self {
        self.warehouses = Some(warehouses);
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Strict search for entries in warehouse `to` matching the consumption.
    ///
    /// The consumption's own warehouse never yields candidates. Read-only and
    /// safe to repeat.
    pub async fn search(
        &self,
        consumption_id: &str,
        to: &WarehouseKey,
        preserve_price: bool,
    ) -> FuelResult<MatchState> {
        let consumption = self.load(consumption_id).await?;
        if consumption.is_transfer {
            if let Some(entry_id) = &consumption.reference_transaction_id {
                return Ok(MatchState::Linked {
                    consumption_id: consumption.id.clone(),
                    entry_id: entry_id.clone(),
                });
            }
        }
        expect_type(&consumption, TransactionType::Consumption)?;
        self.check_warehouse(to)?;

        let query = CandidateQuery::strict(&consumption, to, &self.config);
        let candidates = self.run_query(&consumption, &query, preserve_price).await?;

        debug!(
            "Transfer search for {} in warehouse {}: {} candidates",
            consumption.id,
            to,
            candidates.len()
        );

        if candidates.is_empty() {
            Ok(MatchState::Unmatched)
        } else {
            Ok(MatchState::CandidatesFound { candidates })
        }
    }

    /// Wide search for human inspection; these results are never linked automatically
    pub async fn search_fallback(
        &self,
        consumption_id: &str,
        to: Option<&WarehouseKey>,
    ) -> FuelResult<Vec<TransferCandidate>> {
        let consumption = self.load(consumption_id).await?;
        expect_type(&consumption, TransactionType::Consumption)?;
        if let Some(warehouse) = to {
            self.check_warehouse(warehouse)?;
        }

        let query = CandidateQuery::fallback(&consumption, to, &self.config);
        self.run_query(&consumption, &query, false).await
    }

    /// Run any candidate query and rank the results most recent first
    pub async fn run_query(
        &self,
        consumption: &Transaction,
        query: &CandidateQuery,
        preserve_price: bool,
    ) -> FuelResult<Vec<TransferCandidate>> {
        let entries = self
            .storage
            .query_transactions(&query.storage_filter())
            .await?;

        let mut candidates: Vec<TransferCandidate> = entries
            .into_iter()
            .filter(|entry| query.accepts(entry) && entry.id != consumption.id)
            .map(|entry| TransferCandidate {
                consumption_transaction_id: consumption.id.clone(),
                quantity_difference: (&entry.quantity_liters - &consumption.quantity_liters).abs(),
                day_offset: (entry.transaction_date - consumption.transaction_date).num_days(),
                to_warehouse: entry.warehouse(),
                entry_transaction_id: entry.id,
                preserve_price,
                entry_date: entry.transaction_date,
                entry_quantity: entry.quantity_liters,
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.entry_date
                .cmp(&a.entry_date)
                .then_with(|| a.quantity_difference.cmp(&b.quantity_difference))
                .then_with(|| a.entry_transaction_id.cmp(&b.entry_transaction_id))
        });

        Ok(candidates)
    }

    /// Link the selected candidate
    pub async fn confirm(&mut self, candidate: &TransferCandidate) -> FuelResult<TransferLink> {
        self.link_pair(
            &candidate.consumption_transaction_id,
            &candidate.entry_transaction_id,
            candidate.preserve_price,
        )
        .await
    }

    /// Handle a transfer-link request end to end
    pub async fn link(&mut self, request: &TransferLinkRequest) -> FuelResult<TransferLink> {
        match &request.target {
            LinkTarget::Entry(entry_id) => {
                self.link_pair(&request.consumption_id, entry_id, request.preserve_price)
                    .await
            }
            LinkTarget::Warehouse(warehouse) => {
                let state = self
                    .search(&request.consumption_id, warehouse, request.preserve_price)
                    .await?;
                let no_candidate = || FuelError::NoTransferCandidate {
                    consumption_id: request.consumption_id.clone(),
                    warehouse: warehouse.clone(),
                };
                match state {
                    MatchState::CandidatesFound { candidates } => {
                        let selected = self
                            .first_linkable(
                                &request.consumption_id,
                                &candidates,
                                request.preserve_price,
                            )
                            .await?;
                        if candidates.len() > 1 {
                            info!(
                                "{} candidates for {}, selecting entry {}",
                                candidates.len(),
                                request.consumption_id,
                                selected.entry_transaction_id
                            );
                        }
                        self.confirm(selected).await
                    }
                    MatchState::Unmatched => Err(no_candidate()),
                    MatchState::Linked { entry_id, .. } => Err(FuelError::conflict(
                        ConflictReason::ConsumptionAlreadyLinked,
                        &request.consumption_id,
                        &entry_id,
                    )),
                }
            }
        }
    }

    /// First candidate, in rank order, that passes every link rule.
    ///
    /// When none does, the first candidate's rejection is returned.
    async fn first_linkable<'c>(
        &self,
        consumption_id: &str,
        candidates: &'c [TransferCandidate],
        preserve_price: bool,
    ) -> FuelResult<&'c TransferCandidate> {
        let consumption = self.load(consumption_id).await?;
        let mut rejection = None;
        for candidate in candidates {
            let entry = self.load(&candidate.entry_transaction_id).await?;
            match check_pair(&consumption, &entry, preserve_price) {
                Ok(()) => return Ok(candidate),
                Err(error) => {
                    debug!("Skipping candidate {}: {}", entry.id, error);
                    rejection.get_or_insert(error);
                }
            }
        }
        Err(rejection.unwrap_or_else(|| FuelError::NoTransferCandidate {
            consumption_id: consumption.id.clone(),
            warehouse: consumption.warehouse(),
        }))
    }

    async fn link_pair(
        &mut self,
        consumption_id: &str,
        entry_id: &str,
        preserve_price: bool,
    ) -> FuelResult<TransferLink> {
        if consumption_id == entry_id {
            return Err(FuelError::conflict(
                ConflictReason::SelfReference,
                consumption_id,
                entry_id,
            ));
        }

        let consumption = self.load(consumption_id).await?;
        let entry = self.load(entry_id).await?;

        if let Err(error) = check_pair(&consumption, &entry, preserve_price) {
            warn!("Rejected transfer link: {}", error);
            return Err(error);
        }

        let link = TransferLink {
            consumption_id: consumption.id.clone(),
            entry_id: entry.id.clone(),
            preserve_price,
            previous_entry_unit_cost: entry.unit_cost.clone(),
            entry_unit_cost: if preserve_price {
                consumption.unit_cost.clone()
            } else {
                entry.unit_cost.clone()
            },
            linked_at: chrono::Utc::now().naive_utc(),
        };

        self.storage.link_transfer(&link).await?;

        info!(
            "Linked transfer {} (warehouse {}) -> {} (warehouse {}), {} L{}",
            consumption.id,
            consumption.warehouse(),
            entry.id,
            entry.warehouse(),
            consumption.quantity_liters,
            if preserve_price { ", source cost preserved" } else { "" }
        );

        Ok(link)
    }

    async fn load(&self, transaction_id: &str) -> FuelResult<Transaction> {
        self.storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| FuelError::TransactionNotFound(transaction_id.to_string()))
    }

    fn check_warehouse(&self, warehouse: &WarehouseKey) -> FuelResult<()> {
        match &self.warehouses {
            Some(directory) if !directory.warehouse_exists(warehouse) => {
                Err(FuelError::WarehouseNotFound(warehouse.to_string()))
            }
            _ => Ok(()),
        }
    }
}

fn expect_type(transaction: &Transaction, expected: TransactionType) -> FuelResult<()> {
    if transaction.transaction_type == expected {
        Ok(())
    } else {
        Err(FuelError::Validation(format!(
            "Transaction '{}' is a {}, expected a {}",
            transaction.id, transaction.transaction_type, expected
        )))
    }
}

/// Every rule a consumption/entry pair must satisfy before it can be linked
pub fn check_pair(
    consumption: &Transaction,
    entry: &Transaction,
    preserve_price: bool,
) -> FuelResult<()> {
    let conflict = |reason| Err(FuelError::conflict(reason, &consumption.id, &entry.id));

    if consumption.id == entry.id {
        return conflict(ConflictReason::SelfReference);
    }
    if consumption.transaction_type == entry.transaction_type {
        return conflict(ConflictReason::SameType);
    }
    if consumption.transaction_type != TransactionType::Consumption
        || entry.transaction_type != TransactionType::Entry
    {
        return conflict(ConflictReason::UnexpectedType);
    }
    if consumption.is_transfer {
        return conflict(ConflictReason::ConsumptionAlreadyLinked);
    }
    if entry.is_transfer {
        return conflict(ConflictReason::EntryAlreadyLinked);
    }
    if consumption.product_type != entry.product_type {
        return conflict(ConflictReason::ProductMismatch);
    }
    if consumption.warehouse() == entry.warehouse() {
        return conflict(ConflictReason::SameWarehouse);
    }
    if preserve_price && consumption.unit_cost.is_none() {
        return conflict(ConflictReason::MissingSourceCost);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::transaction::TransactionBuilder;
    use crate::traits::TransactionStorage;
    use crate::utils::directory::MemoryDirectory;
    use crate::utils::memory_storage::MemoryStorage;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 9, d).unwrap()
    }

    fn dec(value: &str) -> BigDecimal {
        value.parse().unwrap()
    }

    fn to(plant: &str, warehouse: &str) -> WarehouseKey {
        WarehouseKey::new(plant, warehouse)
    }

    async fn seed(storage: &mut MemoryStorage, transactions: &[Transaction]) {
        storage.append_transactions(transactions).await.unwrap();
    }

    fn consumption(liters: i64, d: u32) -> Transaction {
        TransactionBuilder::consumption("P01", "1", ProductType::Diesel, liters, day(d))
            .unit_cost(dec("22.50"))
            .build()
            .unwrap()
    }

    fn entry(warehouse: &str, liters: i64, d: u32) -> Transaction {
        TransactionBuilder::entry("P02", warehouse, ProductType::Diesel, liters, day(d))
            .unit_cost(dec("21.00"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_search_applies_tolerance_and_window() {
        let mut storage = MemoryStorage::new();
        let source = consumption(500, 10);
        let close = entry("2", 487, 13);
        let too_small = entry("2", 400, 13);
        let too_late = entry("2", 500, 20);
        seed(
            &mut storage,
            &[source.clone(), close.clone(), too_small, too_late],
        )
        .await;

        let matcher = TransferMatcher::new(storage, TransferConfig::default());
        let state = matcher.search(&source.id, &to("P02", "2"), false).await.unwrap();

        let selected = state.selected().unwrap();
        assert_eq!(selected.entry_transaction_id, close.id);
        assert_eq!(selected.quantity_difference, BigDecimal::from(13));
        assert_eq!(selected.day_offset, 3);
        match state {
            MatchState::CandidatesFound { candidates } => assert_eq!(candidates.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_most_recent_candidate_first() {
        let mut storage = MemoryStorage::new();
        let source = consumption(300, 10);
        let earlier = entry("2", 300, 8);
        let later = entry("2", 295, 12);
        seed(&mut storage, &[source.clone(), earlier.clone(), later.clone()]).await;

        let matcher = TransferMatcher::new(storage, TransferConfig::default());
        let state = matcher.search(&source.id, &to("P02", "2"), true).await.unwrap();
        let MatchState::CandidatesFound { candidates } = state else {
            panic!("expected candidates");
        };
        assert_eq!(candidates[0].entry_transaction_id, later.id);
        assert_eq!(candidates[1].entry_transaction_id, earlier.id);
        assert!(candidates.iter().all(|c| c.preserve_price));
    }

    #[tokio::test]
    async fn test_same_warehouse_number_in_another_plant() {
        let mut storage = MemoryStorage::new();
        let source = consumption(500, 10);
        let other_plant = entry("1", 495, 11);
        let mut back_home = entry("1", 500, 12);
        back_home.plant_id = "P01".to_string();
        seed(
            &mut storage,
            &[source.clone(), other_plant.clone(), back_home.clone()],
        )
        .await;

        let mut matcher = TransferMatcher::new(storage.clone(), TransferConfig::default());
        let state = matcher.search(&source.id, &to("P02", "1"), false).await.unwrap();
        let MatchState::CandidatesFound { candidates } = state else {
            panic!("expected candidates");
        };
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].entry_transaction_id, other_plant.id);
        assert_eq!(candidates[0].to_warehouse, to("P02", "1"));

        let own = matcher.search(&source.id, &to("P01", "1"), false).await.unwrap();
        assert_eq!(own, MatchState::Unmatched);

        let link = matcher
            .link(&TransferLinkRequest {
                consumption_id: source.id.clone(),
                target: LinkTarget::Warehouse(to("P02", "1")),
                preserve_price: false,
            })
            .await
            .unwrap();
        assert_eq!(link.entry_id, other_plant.id);
        let untouched = storage.get_transaction(&back_home.id).await.unwrap().unwrap();
        assert!(!untouched.is_transfer);
    }

    #[tokio::test]
    async fn test_link_by_warehouse_preserves_price() {
        let mut storage = MemoryStorage::new();
        let source = consumption(500, 10);
        let destination = entry("2", 487, 13);
        seed(&mut storage, &[source.clone(), destination.clone()]).await;

        let mut matcher = TransferMatcher::new(storage.clone(), TransferConfig::default());
        let link = matcher
            .link(&TransferLinkRequest {
                consumption_id: source.id.clone(),
                target: LinkTarget::Warehouse(to("P02", "2")),
                preserve_price: true,
            })
            .await
            .unwrap();

        assert_eq!(link.previous_entry_unit_cost, Some(dec("21.00")));
        assert_eq!(link.entry_unit_cost, Some(dec("22.50")));

        let stored_entry = storage.get_transaction(&destination.id).await.unwrap().unwrap();
        let stored_source = storage.get_transaction(&source.id).await.unwrap().unwrap();
        assert!(stored_entry.is_transfer && stored_source.is_transfer);
        assert_eq!(stored_entry.reference_transaction_id, Some(source.id.clone()));
        assert_eq!(stored_source.reference_transaction_id, Some(destination.id.clone()));
        assert_eq!(stored_entry.unit_cost, Some(dec("22.50")));
        assert_eq!(stored_source.unit_cost, Some(dec("22.50")));

        let state = matcher.search(&source.id, &to("P02", "2"), false).await.unwrap();
        assert_eq!(
            state,
            MatchState::Linked {
                consumption_id: source.id.clone(),
                entry_id: destination.id.clone(),
            }
        );
    }

    #[tokio::test]
    async fn test_conflicts_leave_state_untouched() {
        let mut storage = MemoryStorage::new();
        let source = consumption(200, 10);
        let other_source = consumption(200, 11);
        let destination = entry("2", 200, 10);
        let mut same_side = entry("1", 200, 10);
        same_side.plant_id = "P01".to_string();
        seed(
            &mut storage,
            &[
                source.clone(),
                other_source.clone(),
                destination.clone(),
                same_side.clone(),
            ],
        )
        .await;

        let mut matcher = TransferMatcher::new(storage.clone(), TransferConfig::default());
        let pair = |c: &Transaction, e: &Transaction| TransferLinkRequest {
            consumption_id: c.id.clone(),
            target: LinkTarget::Entry(e.id.clone()),
            preserve_price: false,
        };

        let reason = |result: FuelResult<TransferLink>| match result {
            Err(FuelError::TransferLinkConflict { reason, .. }) => reason,
            other => panic!("expected a conflict, got {:?}", other),
        };

        assert_eq!(
            reason(matcher.link(&pair(&source, &source)).await),
            ConflictReason::SelfReference
        );
        assert_eq!(
            reason(matcher.link(&pair(&source, &other_source)).await),
            ConflictReason::SameType
        );
        assert_eq!(
            reason(matcher.link(&pair(&destination, &source)).await),
            ConflictReason::UnexpectedType
        );
        assert_eq!(
            reason(matcher.link(&pair(&source, &same_side)).await),
            ConflictReason::SameWarehouse
        );

        matcher.link(&pair(&source, &destination)).await.unwrap();
        assert_eq!(
            reason(matcher.link(&pair(&other_source, &destination)).await),
            ConflictReason::EntryAlreadyLinked
        );

        let untouched = storage.get_transaction(&other_source.id).await.unwrap().unwrap();
        assert_eq!(untouched, other_source);
        let untouched = storage.get_transaction(&same_side.id).await.unwrap().unwrap();
        assert_eq!(untouched, same_side);
    }

    #[tokio::test]
    async fn test_fallback_never_links() {
        let mut storage = MemoryStorage::new();
        let source = consumption(500, 10);
        let far = entry("4", 120, 30);
        seed(&mut storage, &[source.clone(), far.clone()]).await;

        let mut matcher = TransferMatcher::new(storage.clone(), TransferConfig::default());
        let inspected = matcher.search_fallback(&source.id, None).await.unwrap();
        assert_eq!(inspected.len(), 1);
        assert_eq!(inspected[0].entry_transaction_id, far.id);

        let stored = storage.get_transaction(&far.id).await.unwrap().unwrap();
        assert!(!stored.is_transfer);

        let result = matcher
            .link(&TransferLinkRequest {
                consumption_id: source.id.clone(),
                target: LinkTarget::Warehouse(to("P02", "4")),
                preserve_price: false,
            })
            .await;
        assert!(matches!(result, Err(FuelError::NoTransferCandidate { .. })));
    }

    #[tokio::test]
    async fn test_unknown_warehouse_and_missing_cost() {
        let mut storage = MemoryStorage::new();
        let mut source = consumption(100, 10);
        source.unit_cost = None;
        let destination = entry("2", 100, 10);
        seed(&mut storage, &[source.clone(), destination.clone()]).await;

        let directory = MemoryDirectory::new().with_warehouse("P02", "2");
        let mut matcher = TransferMatcher::new(storage, TransferConfig::default())
            .with_directory(Arc::new(directory));

        assert!(matches!(
            matcher.search(&source.id, &to("P02", "9"), false).await,
            Err(FuelError::WarehouseNotFound(_))
        ));

        let result = matcher
            .link(&TransferLinkRequest {
                consumption_id: source.id.clone(),
                target: LinkTarget::Entry(destination.id.clone()),
                preserve_price: true,
            })
            .await;
        assert!(matches!(
            result,
            Err(FuelError::TransferLinkConflict {
                reason: ConflictReason::MissingSourceCost,
                ..
            })
        ));
    }
}
