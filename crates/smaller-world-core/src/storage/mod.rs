//! # Storage Module
//!
//! Record storage for smaller world.
//!
//! Every record type lives in its own table, keyed by its UUID and encoded
//! with postcard. Two backends implement [`Store`]:
//! - [`MemoryStore`]: BTreeMap tables, deterministic iteration, used in tests
//! - [`RedbStore`]: redb embedded database (ACID, crash safe, MVCC)
//!
//! Domain code goes through the typed [`StoreExt`] layer and never touches
//! raw bytes.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::error::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] postcard::Error),

    #[error("storage lock poisoned")]
    Poisoned,

    #[error("unknown table: {0}")]
    UnknownTable(String),
}

// =============================================================================
// RAW STORE
// =============================================================================

/// A table-per-record-type key/value store.
pub trait Store: Send + Sync {
    /// Read the encoded record stored under `key`.
    fn get_raw(&self, table: &'static str, key: Uuid) -> Result<Option<Vec<u8>>, StoreError>;

    /// Insert or replace the encoded record stored under `key`.
    fn put_raw(&self, table: &'static str, key: Uuid, value: Vec<u8>) -> Result<(), StoreError>;

    /// Remove a record. Returns whether it existed.
    fn delete_raw(&self, table: &'static str, key: Uuid) -> Result<bool, StoreError>;

    /// Every record in a table, in key order.
    fn scan_raw(&self, table: &'static str) -> Result<Vec<(Uuid, Vec<u8>)>, StoreError>;

    /// Number of records in a table.
    fn table_len(&self, table: &'static str) -> Result<u64, StoreError>;
}

/// A record type that can be persisted in a [`Store`].
pub trait Record: Serialize + DeserializeOwned {
    /// Table name.
    const TABLE: &'static str;

    /// Human readable kind, used in `NotFound` errors.
    const KIND: &'static str;

    type Id: Copy + Into<Uuid> + Display;

    fn id(&self) -> Self::Id;
}

/// Declare a [`Record`] impl for a model.
macro_rules! impl_record {
    ($ty:ty, $id:ty, $table:literal, $kind:literal) => {
        impl $crate::storage::Record for $ty {
            const TABLE: &'static str = $table;
            const KIND: &'static str = $kind;
            type Id = $id;

            fn id(&self) -> $id {
                self.id
            }
        }
    };
}

pub(crate) use impl_record;

/// Every table the application uses. Backends create them eagerly.
pub const TABLES: &[&str] = &[
    "users",
    "worlds",
    "sessions",
    "friends",
    "invitations",
    "join_requests",
    "posts",
    "post_views",
    "post_reply_receipts",
    "post_reactions",
    "post_stickers",
    "post_shares",
    "text_blasts",
    "notifications",
    "push_subscriptions",
    "push_registrations",
    "activities",
    "activity_coupons",
    "encouragements",
    "login_requests",
];

// =============================================================================
// TYPED LAYER
// =============================================================================

/// Typed access to a [`Store`].
pub trait StoreExt: Store {
    /// Load a record, if present.
    fn get<R: Record>(&self, id: R::Id) -> Result<Option<R>> {
        match self.get_raw(R::TABLE, id.into())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a record, failing with `NotFound` when absent.
    fn fetch<R: Record>(&self, id: R::Id) -> Result<R> {
        self.get(id)?.ok_or_else(|| Error::not_found(R::KIND, id))
    }

    /// Insert or replace a record.
    fn put<R: Record>(&self, record: &R) -> Result<()> {
        let bytes = postcard::to_allocvec(record).map_err(StoreError::from)?;
        self.put_raw(R::TABLE, record.id().into(), bytes)?;
        Ok(())
    }

    /// Delete a record. Returns whether it existed.
    fn delete<R: Record>(&self, id: R::Id) -> Result<bool> {
        Ok(self.delete_raw(R::TABLE, id.into())?)
    }

    /// Every record of a type.
    fn all<R: Record>(&self) -> Result<Vec<R>> {
        self.scan_raw(R::TABLE)?
            .iter()
            .map(|(_, bytes)| decode(bytes))
            .collect()
    }

    /// First record matching the predicate.
    fn find<R: Record>(&self, mut predicate: impl FnMut(&R) -> bool) -> Result<Option<R>> {
        for (_, bytes) in self.scan_raw(R::TABLE)? {
            let record: R = decode(&bytes)?;
            if predicate(&record) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// Every record matching the predicate.
    fn filter<R: Record>(&self, mut predicate: impl FnMut(&R) -> bool) -> Result<Vec<R>> {
        let mut records = Vec::new();
        for (_, bytes) in self.scan_raw(R::TABLE)? {
            let record: R = decode(&bytes)?;
            if predicate(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of records of a type.
    fn count<R: Record>(&self) -> Result<u64> {
        Ok(self.table_len(R::TABLE)?)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

fn decode<R: Record>(bytes: &[u8]) -> Result<R> {
    Ok(postcard::from_bytes(bytes).map_err(StoreError::from)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::LoginRequestId;
    use crate::model::LoginRequest;
    use chrono::{TimeZone, Utc};

    fn login_request(phone: &str) -> LoginRequest {
        LoginRequest {
            id: LoginRequestId::new(),
            phone_number: phone.to_owned(),
            login_code: "123456".to_owned(),
            completed_at: None,
            created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn exercise(store: &dyn Store) {
        let first = login_request("+15555550100");
        let second = login_request("+15555550101");
        store.put(&first).unwrap();
        store.put(&second).unwrap();

        let loaded: LoginRequest = store.fetch(first.id).unwrap();
        assert_eq!(loaded, first);
        assert_eq!(store.count::<LoginRequest>().unwrap(), 2);

        let found = store
            .find::<LoginRequest>(|r| r.phone_number == "+15555550101")
            .unwrap();
        assert_eq!(found.map(|r| r.id), Some(second.id));

        assert!(store.delete::<LoginRequest>(first.id).unwrap());
        assert!(!store.delete::<LoginRequest>(first.id).unwrap());
        assert!(store.get::<LoginRequest>(first.id).unwrap().is_none());
        assert!(matches!(
            store.fetch::<LoginRequest>(first.id),
            Err(Error::NotFound { .. })
        ));
        assert_eq!(store.all::<LoginRequest>().unwrap().len(), 1);
    }

    #[test]
    fn memory_store_roundtrip() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn redb_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbStore::create(dir.path().join("test.redb")).unwrap();
        exercise(&store);
    }

    #[test]
    fn redb_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.redb");
        let request = login_request("+15555550100");
        {
            let store = RedbStore::create(&path).unwrap();
            store.put(&request).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        let loaded: LoginRequest = store.fetch(request.id).unwrap();
        assert_eq!(loaded, request);
    }

    #[test]
    fn unknown_table_is_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.table_len("nope"),
            Err(StoreError::UnknownTable(_))
        ));
    }
}
