//! # redb backend
//!
//! One redb table per record type, `u128` keys (the record UUID) and
//! postcard-encoded values. Every write is its own ACID transaction.

use super::{Store, StoreError, TABLES};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use uuid::Uuid;

fn definition(name: &'static str) -> TableDefinition<'static, u128, &'static [u8]> {
    TableDefinition::new(name)
}

fn db_err(err: impl Into<redb::Error>) -> StoreError {
    StoreError::Database(err.into())
}

/// Disk-backed [`Store`].
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish()
    }
}

impl RedbStore {
    /// Create (or truncate-open) a database file and its tables.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(db_err)?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Open an existing database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::open(path.as_ref()).map_err(db_err)?;
        let store = Self { db };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(db_err)?;
        for name in TABLES {
            txn.open_table(definition(name)).map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn check(table: &'static str) -> Result<(), StoreError> {
        if TABLES.contains(&table) {
            Ok(())
        } else {
            Err(StoreError::UnknownTable(table.to_owned()))
        }
    }
}

impl Store for RedbStore {
    fn get_raw(&self, table: &'static str, key: Uuid) -> Result<Option<Vec<u8>>, StoreError> {
        Self::check(table)?;
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(definition(table)).map_err(db_err)?;
        let value = table.get(key.as_u128()).map_err(db_err)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put_raw(&self, table: &'static str, key: Uuid, value: Vec<u8>) -> Result<(), StoreError> {
        Self::check(table)?;
        let txn = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = txn.open_table(definition(table)).map_err(db_err)?;
            table
                .insert(key.as_u128(), value.as_slice())
                .map_err(db_err)?;
        }
        txn.commit().map_err(db_err)?;
        Ok(())
    }

    fn delete_raw(&self, table: &'static str, key: Uuid) -> Result<bool, StoreError> {
        Self::check(table)?;
        let txn = self.db.begin_write().map_err(db_err)?;
        let existed = {
            let mut table = txn.open_table(definition(table)).map_err(db_err)?;
            let removed = table.remove(key.as_u128()).map_err(db_err)?;
            removed.is_some()
        };
        txn.commit().map_err(db_err)?;
        Ok(existed)
    }

    fn scan_raw(&self, table: &'static str) -> Result<Vec<(Uuid, Vec<u8>)>, StoreError> {
        Self::check(table)?;
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(definition(table)).map_err(db_err)?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (key, value) = entry.map_err(db_err)?;
            rows.push((Uuid::from_u128(key.value()), value.value().to_vec()));
        }
        Ok(rows)
    }

    fn table_len(&self, table: &'static str) -> Result<u64, StoreError> {
        Self::check(table)?;
        let txn = self.db.begin_read().map_err(db_err)?;
        let table = txn.open_table(definition(table)).map_err(db_err)?;
        table.len().map_err(db_err)
    }
}
