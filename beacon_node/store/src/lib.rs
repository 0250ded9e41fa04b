//! Storage seams for the operational core.
//!
//! The beacon node's long-term archives (blocks, states, blobs) are external collaborators;
//! this crate keeps only the narrow persistence the core requires: a column-addressed
//! key-value trait, an in-memory implementation, the SSZ `StoreItem` round-trip, and the
//! checkpoint-state datastore.

mod checkpoint_states;
mod memory_store;

pub use checkpoint_states::{CheckpointStateItem, CheckpointStateStore};
pub use memory_store::MemoryStore;

use std::sync::Arc;
use strum::{EnumIter, IntoStaticStr};

#[derive(Debug)]
pub enum Error {
    SszDecodeError(ssz::DecodeError),
    DBError { message: String },
}

impl From<ssz::DecodeError> for Error {
    fn from(e: ssz::DecodeError) -> Error {
        Error::SszDecodeError(e)
    }
}

/// The on-disk column a key lives in. Each variant maps to a stable 3-byte prefix so that
/// backends without native column families can share one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
pub enum DBColumn {
    /// Epoch-boundary states keyed by SSZ-serialized `Checkpoint`.
    #[strum(serialize = "cps")]
    BeaconCheckpointState,
    /// Operation-pool persistence, keyed by operation type.
    #[strum(serialize = "opo")]
    OpPool,
    /// Misc single-value metadata (custody context, schema versions).
    #[strum(serialize = "bma")]
    BeaconMeta,
}

impl DBColumn {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.as_str().as_bytes()
    }
}

/// An item that can be stored in and retrieved from the database.
pub trait StoreItem: Sized {
    fn db_column() -> DBColumn;

    fn as_store_bytes(&self) -> Vec<u8>;

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error>;
}

/// A column-addressed key-value store.
pub trait KeyValueStore: Sync + Send {
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error>;

    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error>;

    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error>;

    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error>;

    /// Iterate all keys of a column, in lexicographic order.
    fn iter_column_keys(&self, column: DBColumn) -> Result<Vec<Vec<u8>>, Error>;

    /// Fetch a `StoreItem` at `key`.
    fn get_item<I: StoreItem>(&self, key: &[u8]) -> Result<Option<I>, Error>
    where
        Self: Sized,
    {
        match self.get_bytes(I::db_column(), key)? {
            Some(bytes) => Ok(Some(I::from_store_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write a `StoreItem` at `key`.
    fn put_item<I: StoreItem>(&self, key: &[u8], item: &I) -> Result<(), Error>
    where
        Self: Sized,
    {
        self.put_bytes(I::db_column(), key, &item.as_store_bytes())
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        (**self).get_bytes(column, key)
    }

    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        (**self).put_bytes(column, key, value)
    }

    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error> {
        (**self).key_exists(column, key)
    }

    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error> {
        (**self).key_delete(column, key)
    }

    fn iter_column_keys(&self, column: DBColumn) -> Result<Vec<Vec<u8>>, Error> {
        (**self).iter_column_keys(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz_derive::{Decode, Encode};

    #[derive(Debug, PartialEq, Encode, Decode)]
    struct TestItem {
        value: u64,
    }

    impl StoreItem for TestItem {
        fn db_column() -> DBColumn {
            DBColumn::BeaconMeta
        }

        fn as_store_bytes(&self) -> Vec<u8> {
            use ssz::Encode;
            self.as_ssz_bytes()
        }

        fn from_store_bytes(bytes: &[u8]) -> Result<Self, Error> {
            use ssz::Decode;
            Self::from_ssz_bytes(bytes).map_err(Into::into)
        }
    }

    #[test]
    fn item_round_trip() {
        let store = MemoryStore::default();
        let item = TestItem { value: 42 };
        store.put_item(b"the_key", &item).unwrap();
        assert_eq!(store.get_item::<TestItem>(b"the_key").unwrap(), Some(item));
        assert_eq!(store.get_item::<TestItem>(b"other").unwrap(), None);
    }

    #[test]
    fn columns_do_not_collide() {
        let store = MemoryStore::default();
        store
            .put_bytes(DBColumn::OpPool, b"key", b"pool")
            .unwrap();
        store
            .put_bytes(DBColumn::BeaconMeta, b"key", b"meta")
            .unwrap();
        assert_eq!(
            store.get_bytes(DBColumn::OpPool, b"key").unwrap(),
            Some(b"pool".to_vec())
        );
        assert_eq!(
            store.get_bytes(DBColumn::BeaconMeta, b"key").unwrap(),
            Some(b"meta".to_vec())
        );
    }
}
