//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct Tables {
    transactions: HashMap<String, Transaction>,
    batches: HashMap<String, PlantBatch>,
}

/// In-memory storage implementation for testing and development
///
/// Clones share the same tables. Every write takes a single lock, so
/// `append_transactions` and `link_transfer` are all-or-nothing.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
    failing_writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> FuelResult<()> {
        let mut tables = self.write()?;
        tables.transactions.clear();
        tables.batches.clear();
        Ok(())
    }

    /// Make the next `count` writes fail with a persistence error
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    pub fn transaction_count(&self) -> FuelResult<usize> {
        Ok(self.read()?.transactions.len())
    }

    fn read(&self) -> FuelResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| FuelError::Persistence("storage lock poisoned".to_string()))
    }

    fn write(&self) -> FuelResult<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| FuelError::Persistence("storage lock poisoned".to_string()))
    }

    fn check_injected_failure(&self) -> FuelResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(FuelError::Persistence("injected write failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionStorage for MemoryStorage {
    async fn append_transaction(&mut self, transaction: &Transaction) -> FuelResult<()> {
        self.append_transactions(std::slice::from_ref(transaction))
            .await
    }

    async fn append_transactions(&mut self, transactions: &[Transaction]) -> FuelResult<()> {
        let mut tables = self.write()?;
        self.check_injected_failure()?;

        if let Some(duplicate) = transactions.iter().find(|t| {
            tables
                .transactions
                .get(&t.id)
                .is_some_and(|existing| existing != *t)
        }) {
            return Err(FuelError::Persistence(format!(
                "Transaction '{}' already exists with different content",
                duplicate.id
            )));
        }

        for transaction in transactions {
            tables
                .transactions
                .insert(transaction.id.clone(), transaction.clone());
        }
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> FuelResult<Option<Transaction>> {
        Ok(self.read()?.transactions.get(transaction_id).cloned())
    }

    async fn query_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> FuelResult<Vec<Transaction>> {
        let tables = self.read()?;
        Ok(tables
            .transactions
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn link_transfer(&mut self, link: &TransferLink) -> FuelResult<()> {
        let mut tables = self.write()?;

        let consumption = tables
            .transactions
            .get(&link.consumption_id)
            .cloned()
            .ok_or_else(|| FuelError::TransactionNotFound(link.consumption_id.clone()))?;
        let entry = tables
            .transactions
            .get(&link.entry_id)
            .cloned()
            .ok_or_else(|| FuelError::TransactionNotFound(link.entry_id.clone()))?;

        // Re-checked under the lock so concurrent confirmations cannot both win
        if consumption.is_transfer {
            return Err(FuelError::conflict(
                ConflictReason::ConsumptionAlreadyLinked,
                &link.consumption_id,
                &link.entry_id,
            ));
        }
        if entry.is_transfer {
            return Err(FuelError::conflict(
                ConflictReason::EntryAlreadyLinked,
                &link.consumption_id,
                &link.entry_id,
            ));
        }

        self.check_injected_failure()?;

        let now = link.linked_at;
        let mut consumption = consumption;
        consumption.is_transfer = true;
        consumption.reference_transaction_id = Some(entry.id.clone());
        consumption.updated_at = now;

        let mut entry = entry;
        entry.is_transfer = true;
        entry.reference_transaction_id = Some(consumption.id.clone());
        entry.unit_cost = link.entry_unit_cost.clone();
        entry.updated_at = now;

        tables.transactions.insert(consumption.id.clone(), consumption);
        tables.transactions.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn save_batch(&mut self, batch: &PlantBatch) -> FuelResult<()> {
        let mut tables = self.write()?;
        self.check_injected_failure()?;
        tables
            .batches
            .insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }

    async fn update_batch(&mut self, batch: &PlantBatch) -> FuelResult<()> {
        let mut tables = self.write()?;
        if !tables.batches.contains_key(&batch.batch_id) {
            return Err(FuelError::BatchNotFound(batch.batch_id.clone()));
        }
        self.check_injected_failure()?;
        tables
            .batches
            .insert(batch.batch_id.clone(), batch.clone());
        Ok(())
    }

    async fn get_batch(&self, batch_id: &str) -> FuelResult<Option<PlantBatch>> {
        Ok(self.read()?.batches.get(batch_id).cloned())
    }

    async fn list_batches(&self) -> FuelResult<Vec<PlantBatch>> {
        let mut batches: Vec<PlantBatch> = self.read()?.batches.values().cloned().collect();
        batches.sort_by(|a, b| {
            (&a.plant_code, &a.warehouse_number, a.product_type).cmp(&(
                &b.plant_code,
                &b.warehouse_number,
                b.product_type,
            ))
        });
        Ok(batches)
    }
}
