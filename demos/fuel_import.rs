//! Fuel import walkthrough: stage, map, commit, link a transfer and value stock

use bigdecimal::BigDecimal;
use fuel_ledger_core::utils::{MemoryDirectory, MemoryStorage};
use fuel_ledger_core::{
    BatchDiagnostic, FuelConfig, FuelLedger, ImportContext, LegacyRow, LinkTarget, MatchState,
    ProductType, TransactionFilter, TransactionStorage, TransactionType, TransferLinkRequest,
    WarehouseKey,
};
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cell(value: &str) -> Option<String> {
    Some(value.to_string())
}

fn legacy_log() -> Vec<LegacyRow> {
    let base = |row_number: usize, date: &str, plant: &str, warehouse: &str| LegacyRow {
        row_number,
        date: cell(date),
        plant_code: cell(plant),
        warehouse_number: cell(warehouse),
        ..Default::default()
    };

    vec![
        LegacyRow {
            opening_inventory: cell("1000"),
            ..base(2, "01/05/2024", "P01", "1")
        },
        LegacyRow {
            quantity_in: cell("300"),
            unit_cost: cell("22,50"),
            ..base(3, "02/05/2024", "P01", "1")
        },
        LegacyRow {
            quantity_out: cell("200"),
            asset_code: cell("EXC-01"),
            horometer: cell("1,204.5"),
            unit_cost: cell("22,50"),
            ..base(4, "03/05/2024", "P01", "1")
        },
        LegacyRow {
            quantity_in: cell("150"),
            unit_cost: cell("22,80"),
            ..base(5, "05/05/2024", "P01", "1")
        },
        LegacyRow {
            quantity_out: cell("80"),
            asset_code: cell("UNIT-77"),
            horometer: cell("530"),
            unit_cost: cell("22,50"),
            ..base(6, "06/05/2024", "P01", "1")
        },
        LegacyRow {
            closing_inventory: cell("1160"),
            ..base(7, "07/05/2024", "P01", "1")
        },
        LegacyRow {
            quantity_in: cell("196"),
            unit_cost: cell("21,00"),
            ..base(8, "08/05/2024", "P02", "2")
        },
        LegacyRow {
            quantity_in: cell("10"),
            quantity_out: cell("10"),
            ..base(9, "08/05/2024", "P02", "2")
        },
    ]
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fuel_ledger_core=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    println!("Fuel Ledger Core - Import Walkthrough\n");

    let storage = MemoryStorage::new();
    let directory = Arc::new(
        MemoryDirectory::new()
            .with_asset("asset-exc-01", "EXC-01", Some("Excavator 01"))
            .with_warehouse("P01", "1")
            .with_warehouse("P02", "2"),
    );
    let mut ledger = FuelLedger::new(storage.clone(), FuelConfig::default())?
        .with_asset_directory(directory.clone())
        .with_warehouse_directory(directory);

    // 1. Stage the legacy log
    let context = ImportContext::new(ProductType::Diesel);
    let mut staged = ledger.stage(&legacy_log(), &context);
    println!("Staged {} batches", staged.batches.len());
    for code in staged.pending_codes() {
        println!("  pending mapping: {}", code);
    }

    // 2. Map the unknown equipment code, then commit
    let resolution = ledger.resolve_mapping(&mut staged, "UNIT-77", "asset-loader-77")?;
    println!(
        "Mapped {} -> {}\n",
        resolution.legacy_code, resolution.canonical_asset_id
    );
    let report = ledger.commit(staged).await?;

    for batch in &report.batches {
        println!(
            "Plant {} / warehouse {}: in {} L, out {} L, computed {} L, status {:?}",
            batch.plant_code,
            batch.warehouse_number,
            batch.total_litros_in,
            batch.total_litros_out,
            batch.final_inventory_computed,
            batch.reconciliation_status
        );
    }
    for diagnostic in &report.diagnostics {
        match diagnostic {
            BatchDiagnostic::Discrepancy(d) => println!(
                "  discrepancy of {} L in batch {} (tolerance {} L)",
                d.discrepancy, d.batch_id, d.tolerance
            ),
            other => println!("  row {:?}: {:?}", other.row_number(), other),
        }
    }
    println!();

    // 3. The 200 L dispensed on 3 May actually went to warehouse 2 of plant P02
    let destination = WarehouseKey::new("P02", "2");
    let source = storage
        .query_transactions(&TransactionFilter {
            plant_id: Some("P01".to_string()),
            warehouse_id: Some("1".to_string()),
            transaction_type: Some(TransactionType::Consumption),
            ..Default::default()
        })
        .await?
        .into_iter()
        .find(|t| t.quantity_liters == BigDecimal::from(200))
        .ok_or("consumption not found")?;

    match ledger
        .search_transfer_candidates(&source.id, &destination, true)
        .await?
    {
        MatchState::CandidatesFound { candidates } => {
            for candidate in &candidates {
                println!(
                    "Candidate entry {} on {}: {} L ({} L off, {} days)",
                    candidate.entry_transaction_id,
                    candidate.entry_date,
                    candidate.entry_quantity,
                    candidate.quantity_difference,
                    candidate.day_offset
                );
            }
        }
        other => println!("No strict candidates: {:?}", other),
    }

    let link = ledger
        .link_transfer(&TransferLinkRequest {
            consumption_id: source.id.clone(),
            target: LinkTarget::Warehouse(destination.clone()),
            preserve_price: true,
        })
        .await?;
    println!(
        "Linked; entry cost {:?} -> {:?}\n",
        link.previous_entry_unit_cost, link.entry_unit_cost
    );

    // 4. FIFO valuation of the receiving warehouse
    let valuation = ledger
        .warehouse_valuation(&destination, ProductType::Diesel, None)
        .await?;
    println!(
        "Warehouse {} holds {} L valued at {}",
        valuation.warehouse, valuation.on_hand, valuation.inventory_value
    );

    Ok(())
}
