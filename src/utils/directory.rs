//! In-memory asset and warehouse registries

use std::collections::{HashMap, HashSet};

use crate::import::resolver::normalize_code;
use crate::traits::{AssetDirectory, AssetRecord, WarehouseDirectory};
use crate::types::WarehouseKey;

/// Registry backed by plain maps, for tests and small deployments
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    /// Keyed by normalized asset code
    assets: HashMap<String, AssetRecord>,
    warehouses: HashSet<WarehouseKey>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a canonical asset
    pub fn with_asset(mut self, asset_id: &str, code: &str, name: Option<&str>) -> Self {
        self.assets.insert(
            normalize_code(code),
            AssetRecord {
                asset_id: asset_id.to_string(),
                code: code.to_string(),
                name: name.map(str::to_string),
            },
        );
        self
    }

    /// Register a warehouse under its plant
    pub fn with_warehouse(mut self, plant_id: &str, warehouse_id: &str) -> Self {
        self.warehouses
            .insert(WarehouseKey::new(plant_id, warehouse_id));
        self
    }
}

impl AssetDirectory for MemoryDirectory {
    fn find_asset(&self, code: &str) -> Option<AssetRecord> {
        self.assets.get(&normalize_code(code)).cloned()
    }
}

impl WarehouseDirectory for MemoryDirectory {
    fn warehouse_exists(&self, warehouse: &WarehouseKey) -> bool {
        self.warehouses.contains(warehouse)
    }
}
