//! Paired peripheral store persisted as a JSON manifest

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::peripheral::{PairedPeripheral, PixelId};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PairingStore {
    #[serde(default = "default_version")]
    pub version: String,
    /// Keyed by the pixel id in hex
    #[serde(default)]
    pub peripherals: BTreeMap<String, PairedPeripheral>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl PairingStore {
    pub fn new() -> Self {
        Self {
            version: default_version(),
            peripherals: BTreeMap::new(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        let store: PairingStore = serde_json::from_str(&content)?;
        Ok(store)
    }

    /// Load the store or create an empty one if the file doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        debug!(path = %path.display(), count = self.peripherals.len(), "Saved pairings");
        Ok(())
    }

    pub fn get(&self, pixel_id: PixelId) -> Option<&PairedPeripheral> {
        self.peripherals.get(&pixel_id.to_string())
    }

    /// Insert or replace the record for the peripheral's pixel id
    pub fn upsert(&mut self, peripheral: PairedPeripheral) {
        self.peripherals
            .insert(peripheral.pixel_id.to_string(), peripheral);
    }

    pub fn remove(&mut self, pixel_id: PixelId) -> Option<PairedPeripheral> {
        self.peripherals.remove(&pixel_id.to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PairedPeripheral> {
        self.peripherals.values()
    }

    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::DieType;
    use tempfile::TempDir;

    #[test]
    fn test_upsert_and_remove() {
        let mut store = PairingStore::new();
        let mut die = PairedPeripheral::new("sys-a", PixelId(0xa), DieType::D20);
        store.upsert(die.clone());
        die.profile_hash = Some(7);
        store.upsert(die);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(PixelId(0xa)).unwrap().profile_hash, Some(7));
        assert!(store.remove(PixelId(0xa)).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("pairings.json");

        let mut store = PairingStore::load_or_create(&path).unwrap();
        assert!(store.is_empty());
        store.upsert(PairedPeripheral::new("sys-b", PixelId(0xb), DieType::D6));
        store.save(&path).unwrap();

        let loaded = PairingStore::load_or_create(&path).unwrap();
        assert_eq!(loaded.get(PixelId(0xb)), store.get(PixelId(0xb)));
        assert_eq!(loaded.version, "1.0");
    }
}
