//! Grouping of parsed rows into per-warehouse batches

use bigdecimal::BigDecimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::import::parser::{BalanceRow, ImportContext, ParsedRow, UnclassifiedRow};
use crate::types::*;

/// A batch summary together with the rows it was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct StagedBatch {
    pub batch: PlantBatch,
    /// Movements ordered by date, then source row
    pub transactions: Vec<Transaction>,
    pub balance_rows: Vec<BalanceRow>,
    pub unclassified: Vec<UnclassifiedRow>,
}

/// Result of grouping one import
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub batches: Vec<StagedBatch>,
    /// Unclassified rows that name no plant or warehouse
    pub orphans: Vec<UnclassifiedRow>,
}

type BatchKey = (String, String, ProductType);

#[derive(Default)]
struct Group {
    transactions: Vec<Transaction>,
    openings: Vec<BalanceRow>,
    closings: Vec<BalanceRow>,
    unclassified: Vec<UnclassifiedRow>,
}

/// Groups movements by (plant, warehouse) and computes batch totals
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchAggregator;

impl BatchAggregator {
    pub fn new() -> Self {
        Self
    }

    /// A batch with no rows, zero inventory and a fresh id
    pub fn empty_batch(plant_code: &str, warehouse_number: &str, product_type: ProductType) -> PlantBatch {
        let zero = BigDecimal::from(0);
        PlantBatch {
            batch_id: uuid::Uuid::new_v4().to_string(),
            plant_code: plant_code.to_string(),
            warehouse_number: warehouse_number.to_string(),
            product_type,
            date_range: None,
            total_rows: 0,
            entries_count: 0,
            consumptions_count: 0,
            adjustments_count: 0,
            unclassified_count: 0,
            initial_inventory: zero.clone(),
            total_litros_in: zero.clone(),
            total_litros_out: zero.clone(),
            final_inventory_computed: zero.clone(),
            final_inventory_provided: None,
            discrepancy: None,
            reconciliation_status: ReconciliationStatus::Unverified,
            unique_assets: Vec::new(),
            unmapped_assets: Vec::new(),
            unassigned_consumptions: 0,
            asset_consumption: BTreeMap::new(),
            transfer_litros_in: zero.clone(),
            transfer_litros_out: zero,
            meter_readings: Vec::new(),
        }
    }

    /// Group parsed rows into staged batches, in (plant, warehouse) order
    pub fn aggregate(&self, rows: Vec<ParsedRow>, context: &ImportContext) -> Aggregation {
        let mut groups: BTreeMap<BatchKey, Group> = BTreeMap::new();
        let mut orphans = Vec::new();

        for row in rows {
            match row {
                ParsedRow::Movement(txn) => {
                    let key = (txn.plant_id.clone(), txn.warehouse_id.clone(), txn.product_type);
                    groups.entry(key).or_default().transactions.push(txn);
                }
                ParsedRow::Opening(balance) => {
                    groups.entry(balance_key(&balance)).or_default().openings.push(balance);
                }
                ParsedRow::Closing(balance) => {
                    groups.entry(balance_key(&balance)).or_default().closings.push(balance);
                }
                ParsedRow::Unclassified(row) => match unclassified_key(&row, context) {
                    Some(key) => groups.entry(key).or_default().unclassified.push(row),
                    None => orphans.push(row),
                },
            }
        }

        let batches: Vec<StagedBatch> = groups
            .into_iter()
            .map(|(key, group)| stage_group(key, group))
            .collect();

        info!(
            "Aggregated {} batches ({} orphan rows)",
            batches.len(),
            orphans.len()
        );

        Aggregation { batches, orphans }
    }

    /// Re-derive a persisted batch after its transactions changed.
    ///
    /// Opening and closing balances and unclassified counts cannot change
    /// after import, so they are carried over from `previous`.
    pub fn refresh(&self, previous: &PlantBatch, transactions: &[Transaction]) -> PlantBatch {
        let previous_movements =
            previous.entries_count + previous.consumptions_count + previous.adjustments_count;
        let mut batch = previous.clone();
        apply_movements(&mut batch, transactions);
        batch.total_rows = previous.total_rows - previous_movements + transactions.len();
        for txn in transactions {
            extend_range(&mut batch.date_range, txn.transaction_date);
        }
        debug!("Refreshed batch {}", batch.batch_id);
        batch
    }
}

fn balance_key(balance: &BalanceRow) -> BatchKey {
    (
        balance.plant_code.clone(),
        balance.warehouse_number.clone(),
        balance.product_type,
    )
}

fn unclassified_key(row: &UnclassifiedRow, context: &ImportContext) -> Option<BatchKey> {
    let text = |value: &Option<String>, fallback: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or(fallback.as_deref())
            .map(str::to_string)
    };
    let plant = text(&row.raw.plant_code, &context.default_plant)?;
    let warehouse = text(&row.raw.warehouse_number, &context.default_warehouse)?;
    let product = row
        .raw
        .product
        .as_deref()
        .and_then(ProductType::parse)
        .unwrap_or(context.product_type);
    Some((plant, warehouse, product))
}

fn stage_group((plant_code, warehouse_number, product_type): BatchKey, group: Group) -> StagedBatch {
    let Group {
        mut transactions,
        mut openings,
        mut closings,
        unclassified,
    } = group;

    transactions.sort_by(|a, b| {
        (a.transaction_date, a.source_row_number).cmp(&(b.transaction_date, b.source_row_number))
    });
    openings.sort_by_key(|b| (b.date, b.row_number));
    closings.sort_by_key(|b| (b.date, b.row_number));

    if openings.len() > 1 {
        warn!(
            "Plant {} warehouse {}: {} opening rows, using the earliest",
            plant_code,
            warehouse_number,
            openings.len()
        );
    }

    let mut date_range = None;
    for date in openings
        .iter()
        .chain(closings.iter())
        .map(|b| b.date)
        .chain(transactions.iter().map(|t| t.transaction_date))
    {
        extend_range(&mut date_range, date);
    }

    let mut batch = BatchAggregator::empty_batch(&plant_code, &warehouse_number, product_type);
    for txn in &mut transactions {
        txn.batch_id = Some(batch.batch_id.clone());
    }
    batch.date_range = date_range;
    batch.total_rows = transactions.len() + openings.len() + closings.len() + unclassified.len();
    batch.unclassified_count = unclassified.len();
    if let Some(opening) = openings.first() {
        batch.initial_inventory = opening.quantity_liters.clone();
    }
    batch.final_inventory_provided = closings.last().map(|b| b.quantity_liters.clone());
    apply_movements(&mut batch, &transactions);

    let mut balance_rows = openings;
    balance_rows.extend(closings);

    StagedBatch {
        batch,
        transactions,
        balance_rows,
        unclassified,
    }
}

fn extend_range(range: &mut Option<DateRange>, date: chrono::NaiveDate) {
    match range {
        Some(r) => r.extend(date),
        None => *range = Some(DateRange::single(date)),
    }
}

/// Recompute every movement-derived figure of the batch
fn apply_movements(batch: &mut PlantBatch, transactions: &[Transaction]) {
    let zero = BigDecimal::from(0);
    let mut total_in = zero.clone();
    let mut total_out = zero.clone();
    let mut transfer_in = zero.clone();
    let mut transfer_out = zero;
    let mut assets = BTreeSet::new();

    batch.entries_count = 0;
    batch.consumptions_count = 0;
    batch.adjustments_count = 0;
    batch.unassigned_consumptions = 0;

    for txn in transactions {
        match txn.transaction_type {
            TransactionType::Entry => batch.entries_count += 1,
            TransactionType::Consumption => {
                batch.consumptions_count += 1;
                if txn.asset_code.is_none() {
                    batch.unassigned_consumptions += 1;
                }
            }
            TransactionType::Adjustment => batch.adjustments_count += 1,
        }

        if let Some(code) = &txn.asset_code {
            assets.insert(code.clone());
        }

        if txn.is_inflow() {
            total_in += &txn.quantity_liters;
            if txn.is_transfer {
                transfer_in += &txn.quantity_liters;
            }
        } else {
            total_out += &txn.quantity_liters;
            if txn.is_transfer {
                transfer_out += &txn.quantity_liters;
            }
        }
    }

    batch.final_inventory_computed = &batch.initial_inventory + &total_in - &total_out;
    batch.total_litros_in = total_in;
    batch.total_litros_out = total_out;
    batch.transfer_litros_in = transfer_in;
    batch.transfer_litros_out = transfer_out;
    batch.unique_assets = assets.into_iter().collect();
}
