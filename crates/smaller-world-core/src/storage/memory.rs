//! In-memory store backed by BTreeMap tables.

use super::{Store, StoreError, TABLES};
use std::collections::BTreeMap;
use std::sync::RwLock;
use uuid::Uuid;

type Table = BTreeMap<Uuid, Vec<u8>>;

/// Volatile [`Store`] with deterministic iteration order.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<&'static str, Table>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let tables = TABLES.iter().map(|name| (*name, Table::new())).collect();
        Self {
            tables: RwLock::new(tables),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(table: &str) -> StoreError {
    StoreError::UnknownTable(table.to_owned())
}

impl Store for MemoryStore {
    fn get_raw(&self, table: &'static str, key: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        let table = tables.get(table).ok_or_else(|| unknown(table))?;
        Ok(table.get(&key).cloned())
    }

    fn put_raw(&self, table: &'static str, key: Uuid, value: Vec<u8>) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let table = tables.get_mut(table).ok_or_else(|| unknown(table))?;
        table.insert(key, value);
        Ok(())
    }

    fn delete_raw(&self, table: &'static str, key: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let table = tables.get_mut(table).ok_or_else(|| unknown(table))?;
        Ok(table.remove(&key).is_some())
    }

    fn scan_raw(&self, table: &'static str) -> Result<Vec<(Uuid, Vec<u8>)>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        let table = tables.get(table).ok_or_else(|| unknown(table))?;
        Ok(table.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn table_len(&self, table: &'static str) -> Result<u64, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        let table = tables.get(table).ok_or_else(|| unknown(table))?;
        Ok(table.len() as u64)
    }
}
