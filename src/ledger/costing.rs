//! FIFO cost layers for warehouse valuation
//!
//! Inflows push layers, outflows draw from the oldest layer first. A layer
//! without a unit cost still holds liters; draws from it are reported as
//! uncosted rather than priced at zero.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::types::*;

/// Liters acquired together at one unit cost
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLayer {
    pub source_transaction_id: String,
    pub acquired_on: NaiveDate,
    pub quantity: BigDecimal,
    pub unit_cost: Option<BigDecimal>,
}

impl CostLayer {
    /// Opening stock of a batch as an uncosted layer, if there is any
    pub fn opening(batch: &PlantBatch) -> Option<Self> {
        let range = batch.date_range?;
        if batch.initial_inventory <= BigDecimal::from(0) {
            return None;
        }
        Some(Self {
            source_transaction_id: batch.batch_id.clone(),
            acquired_on: range.start,
            quantity: batch.initial_inventory.clone(),
            unit_cost: None,
        })
    }
}

/// Cost assigned to one outflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostedDraw {
    pub transaction_id: String,
    pub date: NaiveDate,
    pub quantity: BigDecimal,
    pub costed_liters: BigDecimal,
    pub cost: BigDecimal,
    /// Liters drawn from layers without cost or past empty stock
    pub uncosted_liters: BigDecimal,
}

impl CostedDraw {
    /// Average cost per costed liter
    pub fn average_unit_cost(&self) -> Option<BigDecimal> {
        if self.costed_liters > BigDecimal::from(0) {
            Some((&self.cost / &self.costed_liters).round(4))
        } else {
            None
        }
    }
}

/// Stock position of one warehouse and product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FifoValuation {
    pub warehouse: WarehouseKey,
    pub product_type: ProductType,
    pub as_of: Option<NaiveDate>,
    pub layers: Vec<CostLayer>,
    pub draws: Vec<CostedDraw>,
    pub on_hand: BigDecimal,
    pub inventory_value: BigDecimal,
    /// On-hand liters sitting in layers without cost
    pub uncosted_on_hand: BigDecimal,
}

/// Running FIFO state
#[derive(Debug, Clone, Default)]
pub struct FifoCosting {
    layers: VecDeque<CostLayer>,
}

impl FifoCosting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing layer, such as opening stock
    pub fn with_opening(layer: CostLayer) -> Self {
        Self {
            layers: VecDeque::from([layer]),
        }
    }

    /// Push an inflow as a new layer
    pub fn receive(&mut self, transaction: &Transaction) {
        if transaction.quantity_liters <= BigDecimal::from(0) {
            return;
        }
        self.layers.push_back(CostLayer {
            source_transaction_id: transaction.id.clone(),
            acquired_on: transaction.transaction_date,
            quantity: transaction.quantity_liters.clone(),
            unit_cost: transaction.unit_cost.clone(),
        });
    }

    /// Draw an outflow from the oldest layers
    pub fn draw(&mut self, transaction: &Transaction) -> CostedDraw {
        let zero = BigDecimal::from(0);
        let mut remaining = transaction.quantity_liters.clone();
        let mut costed_liters = zero.clone();
        let mut cost = zero.clone();
        let mut uncosted_liters = zero.clone();

        while remaining > zero {
            let Some(layer) = self.layers.front_mut() else {
                break;
            };
            let take = if layer.quantity < remaining {
                layer.quantity.clone()
            } else {
                remaining.clone()
            };

            match &layer.unit_cost {
                Some(unit_cost) => {
                    cost += &take * unit_cost;
                    costed_liters += &take;
                }
                None => uncosted_liters += &take,
            }

            layer.quantity -= &take;
            remaining -= &take;
            if layer.quantity <= zero {
                self.layers.pop_front();
            }
        }

        // Drawing past empty stock
        if remaining > zero {
            uncosted_liters += &remaining;
        }

        CostedDraw {
            transaction_id: transaction.id.clone(),
            date: transaction.transaction_date,
            quantity: transaction.quantity_liters.clone(),
            costed_liters,
            cost,
            uncosted_liters,
        }
    }

    /// Apply a transaction by its effect on stock
    pub fn apply(&mut self, transaction: &Transaction) -> Option<CostedDraw> {
        if transaction.is_inflow() {
            self.receive(transaction);
            None
        } else {
            Some(self.draw(transaction))
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = &CostLayer> {
        self.layers.iter()
    }

    pub fn on_hand(&self) -> BigDecimal {
        self.layers
            .iter()
            .fold(BigDecimal::from(0), |acc, layer| acc + &layer.quantity)
    }

    /// Value of costed on-hand liters
    pub fn inventory_value(&self) -> BigDecimal {
        self.layers
            .iter()
            .filter_map(|layer| layer.unit_cost.as_ref().map(|c| c * &layer.quantity))
            .fold(BigDecimal::from(0), |acc, value| acc + value)
    }

    pub fn uncosted_on_hand(&self) -> BigDecimal {
        self.layers
            .iter()
            .filter(|layer| layer.unit_cost.is_none())
            .fold(BigDecimal::from(0), |acc, layer| acc + &layer.quantity)
    }
}

/// Value a warehouse's transactions of one product up to `as_of`.
///
/// `opening` is the oldest layer, ahead of every transaction. Transactions are
/// replayed in (date, source row) order; other warehouses and products in the
/// input are ignored.
pub fn value_warehouse(
    warehouse: &WarehouseKey,
    product_type: ProductType,
    opening: Option<CostLayer>,
    transactions: &[Transaction],
    as_of: Option<NaiveDate>,
) -> FifoValuation {
    let mut relevant: Vec<&Transaction> = transactions
        .iter()
        .filter(|t| warehouse.holds(t) && t.product_type == product_type)
        .filter(|t| as_of.is_none_or(|date| t.transaction_date <= date))
        .collect();
    relevant.sort_by(|a, b| {
        a.transaction_date
            .cmp(&b.transaction_date)
            .then_with(|| a.source_row_number.cmp(&b.source_row_number))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });

    let opening = opening.filter(|layer| as_of.is_none_or(|date| layer.acquired_on <= date));
    let mut fifo = match opening {
        Some(layer) => FifoCosting::with_opening(layer),
        None => FifoCosting::new(),
    };
    let draws = relevant
        .into_iter()
        .filter_map(|transaction| fifo.apply(transaction))
        .collect();

    FifoValuation {
        warehouse: warehouse.clone(),
        product_type,
        as_of,
        on_hand: fifo.on_hand(),
        inventory_value: fifo.inventory_value(),
        uncosted_on_hand: fifo.uncosted_on_hand(),
        layers: fifo.layers().cloned().collect(),
        draws,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn txn(kind: TransactionType, liters: i64, cost: Option<&str>, d: u32) -> Transaction {
        let mut t = Transaction::new(
            kind,
            "P01".to_string(),
            "1".to_string(),
            ProductType::Diesel,
            BigDecimal::from(liters),
            day(d),
        );
        t.unit_cost = cost.map(|c| c.parse().unwrap());
        t
    }

    fn home() -> WarehouseKey {
        WarehouseKey::new("P01", "1")
    }

    fn opening_batch(liters: i64, d: u32) -> PlantBatch {
        let mut batch =
            crate::import::BatchAggregator::empty_batch("P01", "1", ProductType::Diesel);
        batch.initial_inventory = BigDecimal::from(liters);
        batch.date_range = Some(DateRange::single(day(d)));
        batch
    }

    #[test]
    fn test_draws_oldest_layer_first() {
        let transactions = vec![
            txn(TransactionType::Entry, 100, Some("20"), 1),
            txn(TransactionType::Entry, 50, Some("22"), 2),
            txn(TransactionType::Consumption, 120, None, 3),
        ];

        let valuation = value_warehouse(&home(), ProductType::Diesel, None, &transactions, None);
        let draw = &valuation.draws[0];
        assert_eq!(draw.cost, BigDecimal::from(2440));
        assert_eq!(draw.costed_liters, BigDecimal::from(120));
        assert_eq!(draw.uncosted_liters, BigDecimal::from(0));
        assert_eq!(valuation.on_hand, BigDecimal::from(30));
        assert_eq!(valuation.inventory_value, BigDecimal::from(660));
        assert_eq!(valuation.layers.len(), 1);
    }

    #[test]
    fn test_uncosted_layers_and_overdraw() {
        let mut fifo = FifoCosting::new();
        fifo.receive(&txn(TransactionType::Entry, 40, None, 1));
        fifo.receive(&txn(TransactionType::Entry, 30, Some("21.5"), 2));

        let draw = fifo.draw(&txn(TransactionType::Consumption, 100, None, 3));
        assert_eq!(draw.uncosted_liters, BigDecimal::from(70));
        assert_eq!(draw.costed_liters, BigDecimal::from(30));
        assert_eq!(draw.cost, "645.0".parse::<BigDecimal>().unwrap());
        assert_eq!(draw.average_unit_cost(), Some("21.5".parse().unwrap()));
        assert_eq!(fifo.on_hand(), BigDecimal::from(0));
    }

    #[test]
    fn test_as_of_and_adjustments() {
        let mut decrease = txn(TransactionType::Adjustment, 10, None, 2);
        decrease.adjustment_direction = Some(AdjustmentDirection::Decrease);
        let transactions = vec![
            txn(TransactionType::Entry, 100, Some("20"), 1),
            decrease,
            txn(TransactionType::Entry, 100, Some("25"), 9),
        ];

        let valuation = value_warehouse(&home(), ProductType::Diesel, None, &transactions, Some(day(5)));
        assert_eq!(valuation.on_hand, BigDecimal::from(90));
        assert_eq!(valuation.inventory_value, BigDecimal::from(1800));
        assert_eq!(valuation.draws.len(), 1);
    }

    #[test]
    fn test_opening_stock_is_drawn_first() {
        let transactions = vec![
            txn(TransactionType::Entry, 300, Some("22.5"), 2),
            txn(TransactionType::Consumption, 200, None, 3),
        ];
        let opening = CostLayer::opening(&opening_batch(1000, 1));

        let valuation =
            value_warehouse(&home(), ProductType::Diesel, opening, &transactions, None);
        let draw = &valuation.draws[0];
        assert_eq!(draw.uncosted_liters, BigDecimal::from(200));
        assert_eq!(draw.cost, BigDecimal::from(0));
        assert_eq!(valuation.on_hand, BigDecimal::from(1100));
        assert_eq!(valuation.uncosted_on_hand, BigDecimal::from(800));
        assert_eq!(valuation.inventory_value, "6750.0".parse::<BigDecimal>().unwrap());
    }

    #[test]
    fn test_other_plants_and_empty_openings_are_ignored() {
        let mut elsewhere = txn(TransactionType::Entry, 500, Some("20"), 1);
        elsewhere.plant_id = "P02".to_string();
        let transactions = vec![elsewhere, txn(TransactionType::Entry, 100, Some("20"), 2)];

        assert!(CostLayer::opening(&opening_batch(0, 1)).is_none());
        let valuation = value_warehouse(
            &home(),
            ProductType::Diesel,
            CostLayer::opening(&opening_batch(50, 5)),
            &transactions,
            Some(day(3)),
        );
        assert_eq!(valuation.on_hand, BigDecimal::from(100));
        assert_eq!(valuation.layers.len(), 1);
    }
}
