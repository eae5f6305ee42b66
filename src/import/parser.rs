//! Classification of decoded legacy rows into typed movements

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::ImportConfig;
use crate::types::*;

/// A decoded legacy log row; every cell is the text the decoder produced
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyRow {
    pub row_number: usize,
    pub date: Option<String>,
    pub plant_code: Option<String>,
    pub warehouse_number: Option<String>,
    pub product: Option<String>,
    pub asset_code: Option<String>,
    pub quantity_in: Option<String>,
    pub quantity_out: Option<String>,
    /// Signed stock correction
    pub adjustment: Option<String>,
    pub opening_inventory: Option<String>,
    pub closing_inventory: Option<String>,
    pub unit_cost: Option<String>,
    pub horometer: Option<String>,
    pub kilometer: Option<String>,
}

/// Request-scoped choices made by whoever drives the import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportContext {
    /// Product assumed when a row leaves the product cell empty
    pub product_type: ProductType,
    pub default_plant: Option<String>,
    pub default_warehouse: Option<String>,
}

impl ImportContext {
    pub fn new(product_type: ProductType) -> Self {
        Self {
            product_type,
            default_plant: None,
            default_warehouse: None,
        }
    }

    pub fn with_location(mut self, plant: &str, warehouse: &str) -> Self {
        self.default_plant = Some(plant.to_string());
        self.default_warehouse = Some(warehouse.to_string());
        self
    }
}

/// What a row is, judged only by which quantity cells are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowKind {
    Entry,
    Consumption,
    Adjustment,
    OpeningBalance,
    ClosingBalance,
    Unclassified,
}

/// Opening or closing stock reported by the legacy log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRow {
    pub row_number: usize,
    pub plant_code: String,
    pub warehouse_number: String,
    pub product_type: ProductType,
    pub date: NaiveDate,
    pub quantity_liters: BigDecimal,
}

/// A row that could not be classified, kept verbatim for review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnclassifiedRow {
    pub row_number: usize,
    pub reason: String,
    pub raw: LegacyRow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedRow {
    Movement(Transaction),
    Opening(BalanceRow),
    Closing(BalanceRow),
    Unclassified(UnclassifiedRow),
}

impl ParsedRow {
    pub fn row_number(&self) -> Option<usize> {
        match self {
            ParsedRow::Movement(t) => t.source_row_number,
            ParsedRow::Opening(b) | ParsedRow::Closing(b) => Some(b.row_number),
            ParsedRow::Unclassified(u) => Some(u.row_number),
        }
    }
}

/// Parsed rows plus the row-scoped failures met along the way
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParseOutcome {
    pub rows: Vec<ParsedRow>,
    pub errors: Vec<ParseError>,
}

/// Cell text with surrounding whitespace removed; blank cells count as empty
fn cell(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Read a legacy number, accepting thousands separators and decimal commas.
///
/// A lone comma or dot separator followed by groups of exactly three digits is
/// a thousands separator (`1,234` is 1234); otherwise a lone comma is a
/// decimal comma (`12,5` is 12.5).
pub fn parse_decimal(raw: &str) -> Option<BigDecimal> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return None;
    }

    let repeated_dot = compact.find('.') != compact.rfind('.');
    let normalized = match (compact.rfind(','), compact.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => compact.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => compact.replace(',', ""),
        (Some(_), None) if thousands_groups(&compact, ',') => compact.replace(',', ""),
        (Some(_), None) => compact.replace(',', "."),
        (None, Some(_)) if repeated_dot && thousands_groups(&compact, '.') => {
            compact.replace('.', "")
        }
        _ => compact,
    };

    BigDecimal::from_str(&normalized).ok()
}

/// Whether `separator` only splits a short leading group from groups of three digits
fn thousands_groups(number: &str, separator: char) -> bool {
    let digits = |group: &str| !group.is_empty() && group.chars().all(|c| c.is_ascii_digit());
    let unsigned = number.trim_start_matches(['-', '+']);
    let mut groups = unsigned.split(separator);
    let lead = groups.next().unwrap_or_default();
    digits(lead)
        && lead.len() <= 3
        && lead != "0"
        && groups.all(|group| group.len() == 3 && digits(group))
}

/// Decide the row kind from the populated quantity cells
pub fn classify(row: &LegacyRow) -> RowKind {
    let populated = quantity_cells(row);
    match populated.as_slice() {
        ["quantity_in"] => RowKind::Entry,
        ["quantity_out"] => RowKind::Consumption,
        ["adjustment"] => RowKind::Adjustment,
        ["opening_inventory"] => RowKind::OpeningBalance,
        ["closing_inventory"] => RowKind::ClosingBalance,
        _ => RowKind::Unclassified,
    }
}

fn quantity_cells(row: &LegacyRow) -> Vec<&'static str> {
    [
        ("quantity_in", &row.quantity_in),
        ("quantity_out", &row.quantity_out),
        ("adjustment", &row.adjustment),
        ("opening_inventory", &row.opening_inventory),
        ("closing_inventory", &row.closing_inventory),
    ]
    .into_iter()
    .filter(|(_, value)| cell(value).is_some())
    .map(|(name, _)| name)
    .collect()
}

/// Turns decoded rows into typed movements and balance rows
#[derive(Debug, Clone)]
pub struct RowParser {
    date_formats: Vec<String>,
}

impl Default for RowParser {
    fn default() -> Self {
        Self::new(&ImportConfig::default())
    }
}

impl RowParser {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            date_formats: config.date_formats.clone(),
        }
    }

    /// Parse every row; a failing row never stops the others
    pub fn parse_rows(&self, rows: &[LegacyRow], context: &ImportContext) -> ParseOutcome {
        let mut outcome = ParseOutcome::default();

        for row in rows {
            match self.parse_row(row, context) {
                Ok(parsed) => outcome.rows.push(parsed),
                Err(error) => {
                    debug!("Skipping row {}: {}", row.row_number, error);
                    outcome.errors.push(error);
                }
            }
        }

        info!(
            "Parsed {} legacy rows: {} accepted, {} row errors",
            rows.len(),
            outcome.rows.len(),
            outcome.errors.len()
        );

        outcome
    }

    /// Parse a single row
    pub fn parse_row(
        &self,
        row: &LegacyRow,
        context: &ImportContext,
    ) -> Result<ParsedRow, ParseError> {
        let kind = classify(row);
        if kind == RowKind::Unclassified {
            return Ok(ParsedRow::Unclassified(unclassified(row)));
        }

        let plant_code = required_text(row, "plant_code", &row.plant_code, &context.default_plant)?;
        let warehouse_number = required_text(
            row,
            "warehouse_number",
            &row.warehouse_number,
            &context.default_warehouse,
        )?;
        let date = self.parse_date(row)?;
        let product_type = match cell(&row.product) {
            None => context.product_type,
            Some(label) => ProductType::parse(label)
                .ok_or_else(|| row_error(row, "product", label, "unknown product"))?,
        };

        let balance = |quantity_liters| BalanceRow {
            row_number: row.row_number,
            plant_code: plant_code.clone(),
            warehouse_number: warehouse_number.clone(),
            product_type,
            date,
            quantity_liters,
        };

        let (transaction_type, quantity, direction) = match kind {
            RowKind::OpeningBalance => {
                let quantity = decimal_cell(row, "opening_inventory", &row.opening_inventory)?;
                return Ok(ParsedRow::Opening(balance(quantity)));
            }
            RowKind::ClosingBalance => {
                let quantity = decimal_cell(row, "closing_inventory", &row.closing_inventory)?;
                return Ok(ParsedRow::Closing(balance(quantity)));
            }
            RowKind::Entry => (
                TransactionType::Entry,
                non_negative_cell(row, "quantity_in", &row.quantity_in)?,
                None,
            ),
            RowKind::Consumption => (
                TransactionType::Consumption,
                non_negative_cell(row, "quantity_out", &row.quantity_out)?,
                None,
            ),
            RowKind::Adjustment => {
                let signed = decimal_cell(row, "adjustment", &row.adjustment)?;
                let direction = if signed < BigDecimal::from(0) {
                    AdjustmentDirection::Decrease
                } else {
                    AdjustmentDirection::Increase
                };
                (TransactionType::Adjustment, signed.abs(), Some(direction))
            }
            RowKind::Unclassified => return Ok(ParsedRow::Unclassified(unclassified(row))),
        };

        let mut transaction = Transaction::new(
            transaction_type,
            plant_code,
            warehouse_number,
            product_type,
            quantity,
            date,
        );
        transaction.adjustment_direction = direction;
        transaction.asset_code = cell(&row.asset_code).map(str::to_string);
        transaction.unit_cost = optional_non_negative(row, "unit_cost", &row.unit_cost)?;
        transaction.horometer = optional_non_negative(row, "horometer", &row.horometer)?;
        transaction.kilometer = optional_non_negative(row, "kilometer", &row.kilometer)?;
        transaction.source_row_number = Some(row.row_number);

        Ok(ParsedRow::Movement(transaction))
    }

    fn parse_date(&self, row: &LegacyRow) -> Result<NaiveDate, ParseError> {
        let raw = cell(&row.date).ok_or_else(|| row_error(row, "date", "", "missing"))?;
        // Decoders often render spreadsheet dates with a midnight time part
        let day_part = raw.split(['T', ' ']).next().unwrap_or(raw);

        self.date_formats
            .iter()
            .find_map(|format| {
                NaiveDate::parse_from_str(raw, format)
                    .or_else(|_| NaiveDate::parse_from_str(day_part, format))
                    .ok()
            })
            .ok_or_else(|| row_error(row, "date", raw, "unrecognized date format"))
    }
}

fn unclassified(row: &LegacyRow) -> UnclassifiedRow {
    let populated = quantity_cells(row);
    let reason = if populated.is_empty() {
        "no quantity column populated".to_string()
    } else {
        format!("ambiguous quantity columns: {}", populated.join(", "))
    };
    debug!("Row {} unclassified: {}", row.row_number, reason);
    UnclassifiedRow {
        row_number: row.row_number,
        reason,
        raw: row.clone(),
    }
}

fn row_error(row: &LegacyRow, field: &str, value: &str, reason: &str) -> ParseError {
    ParseError {
        row_number: row.row_number,
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn required_text(
    row: &LegacyRow,
    field: &str,
    value: &Option<String>,
    fallback: &Option<String>,
) -> Result<String, ParseError> {
    cell(value)
        .or_else(|| cell(fallback))
        .map(str::to_string)
        .ok_or_else(|| row_error(row, field, "", "missing"))
}

fn decimal_cell(
    row: &LegacyRow,
    field: &str,
    value: &Option<String>,
) -> Result<BigDecimal, ParseError> {
    let raw = cell(value).ok_or_else(|| row_error(row, field, "", "missing"))?;
    parse_decimal(raw).ok_or_else(|| row_error(row, field, raw, "not a number"))
}

fn non_negative_cell(
    row: &LegacyRow,
    field: &str,
    value: &Option<String>,
) -> Result<BigDecimal, ParseError> {
    let number = decimal_cell(row, field, value)?;
    if number < BigDecimal::from(0) {
        let raw = cell(value).unwrap_or_default();
        return Err(row_error(row, field, raw, "must not be negative"));
    }
    Ok(number)
}

fn optional_non_negative(
    row: &LegacyRow,
    field: &str,
    value: &Option<String>,
) -> Result<Option<BigDecimal>, ParseError> {
    match cell(value) {
        None => Ok(None),
        Some(_) => non_negative_cell(row, field, value).map(Some),
    }
}
