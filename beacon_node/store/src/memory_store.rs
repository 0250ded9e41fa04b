use crate::{DBColumn, Error, KeyValueStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A key-value store backed by a `BTreeMap`, used in tests and by ephemeral nodes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    db: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    fn get_key_for_col(column: DBColumn, key: &[u8]) -> Vec<u8> {
        let mut col_key = column.as_bytes().to_vec();
        col_key.extend_from_slice(key);
        col_key
    }

    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_bytes(&self, column: DBColumn, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Ok(self
            .db
            .read()
            .get(&Self::get_key_for_col(column, key))
            .cloned())
    }

    fn put_bytes(&self, column: DBColumn, key: &[u8], value: &[u8]) -> Result<(), Error> {
        self.db
            .write()
            .insert(Self::get_key_for_col(column, key), value.to_vec());
        Ok(())
    }

    fn key_exists(&self, column: DBColumn, key: &[u8]) -> Result<bool, Error> {
        Ok(self
            .db
            .read()
            .contains_key(&Self::get_key_for_col(column, key)))
    }

    fn key_delete(&self, column: DBColumn, key: &[u8]) -> Result<(), Error> {
        self.db.write().remove(&Self::get_key_for_col(column, key));
        Ok(())
    }

    fn iter_column_keys(&self, column: DBColumn) -> Result<Vec<Vec<u8>>, Error> {
        let prefix = column.as_bytes();
        Ok(self
            .db
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| key[prefix.len()..].to_vec())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_iterate_in_order_within_column() {
        let store = MemoryStore::default();
        store.put_bytes(DBColumn::OpPool, b"b", &[2]).unwrap();
        store.put_bytes(DBColumn::OpPool, b"a", &[1]).unwrap();
        store.put_bytes(DBColumn::BeaconMeta, b"zzz", &[9]).unwrap();

        let keys = store.iter_column_keys(DBColumn::OpPool).unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn delete_removes_key() {
        let store = MemoryStore::default();
        store.put_bytes(DBColumn::BeaconMeta, b"k", &[1]).unwrap();
        assert!(store.key_exists(DBColumn::BeaconMeta, b"k").unwrap());
        store.key_delete(DBColumn::BeaconMeta, b"k").unwrap();
        assert!(!store.key_exists(DBColumn::BeaconMeta, b"k").unwrap());
    }
}
