use crate::{DBColumn, Error, KeyValueStore};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use types::{Checkpoint, Epoch, Slot};

/// An epoch-boundary state snapshot, keyed in the database by its SSZ-serialized `Checkpoint`.
///
/// The state itself is opaque to the core (serialized upstream); this item carries the fields
/// the safety filter reads.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CheckpointStateItem {
    pub checkpoint: Checkpoint,
    pub state_slot: Slot,
    pub state_bytes: Vec<u8>,
}

/// The checkpoint-state datastore.
pub struct CheckpointStateStore<S> {
    store: S,
}

impl<S: KeyValueStore> CheckpointStateStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn put(&self, item: &CheckpointStateItem) -> Result<(), Error> {
        self.store.put_bytes(
            DBColumn::BeaconCheckpointState,
            &item.checkpoint.as_ssz_bytes(),
            &item.as_ssz_bytes(),
        )
    }

    pub fn get(&self, checkpoint: &Checkpoint) -> Result<Option<CheckpointStateItem>, Error> {
        Ok(self
            .store
            .get_bytes(DBColumn::BeaconCheckpointState, &checkpoint.as_ssz_bytes())?
            .map(|bytes| CheckpointStateItem::from_ssz_bytes(&bytes))
            .transpose()?)
    }

    pub fn delete(&self, checkpoint: &Checkpoint) -> Result<(), Error> {
        self.store.key_delete(
            DBColumn::BeaconCheckpointState,
            &checkpoint.as_ssz_bytes(),
        )
    }

    /// Returns the latest stored checkpoint state that is *safe* to bootstrap from:
    ///
    /// - the state sits exactly on its epoch boundary
    ///   (`state_slot % SLOTS_PER_EPOCH == 0` and `state_slot == epoch * SLOTS_PER_EPOCH`), and
    /// - its epoch has exactly one stored key (an epoch with both a current-root and a
    ///   previous-root state is ambiguous and skipped).
    pub fn read_latest_safe(
        &self,
        slots_per_epoch: u64,
    ) -> Result<Option<CheckpointStateItem>, Error> {
        let mut items = Vec::new();
        for key in self
            .store
            .iter_column_keys(DBColumn::BeaconCheckpointState)?
        {
            let Some(bytes) = self.store.get_bytes(DBColumn::BeaconCheckpointState, &key)? else {
                continue;
            };
            items.push(CheckpointStateItem::from_ssz_bytes(&bytes)?);
        }

        let epoch_of = |item: &CheckpointStateItem| item.checkpoint.epoch;
        let keys_for_epoch =
            |epoch: Epoch| items.iter().filter(|item| epoch_of(item) == epoch).count();

        Ok(items
            .iter()
            .filter(|item| {
                item.state_slot % slots_per_epoch == Slot::new(0)
                    && item.state_slot == epoch_of(item).start_slot(slots_per_epoch)
                    && keys_for_epoch(epoch_of(item)) == 1
            })
            .max_by_key(|item| epoch_of(item))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use types::{FixedBytesExtended, Hash256};

    fn item(epoch: u64, root: u64, state_slot: u64) -> CheckpointStateItem {
        CheckpointStateItem {
            checkpoint: Checkpoint {
                epoch: Epoch::new(epoch),
                root: Hash256::from_low_u64_be(root),
            },
            state_slot: Slot::new(state_slot),
            state_bytes: vec![0xde, 0xad],
        }
    }

    #[test]
    fn round_trip_by_checkpoint_key() {
        let store = CheckpointStateStore::new(MemoryStore::default());
        let item = item(3, 1, 96);
        store.put(&item).unwrap();
        assert_eq!(store.get(&item.checkpoint).unwrap(), Some(item.clone()));
        store.delete(&item.checkpoint).unwrap();
        assert_eq!(store.get(&item.checkpoint).unwrap(), None);
    }

    #[test]
    fn latest_safe_skips_misaligned_states() {
        let store = CheckpointStateStore::new(MemoryStore::default());
        store.put(&item(1, 1, 32)).unwrap();
        // Epoch 2 state not on its boundary slot.
        store.put(&item(2, 2, 65)).unwrap();

        let latest = store.read_latest_safe(32).unwrap().unwrap();
        assert_eq!(latest.checkpoint.epoch, Epoch::new(1));
    }

    #[test]
    fn latest_safe_skips_ambiguous_epochs() {
        let store = CheckpointStateStore::new(MemoryStore::default());
        store.put(&item(1, 1, 32)).unwrap();
        // Two states for epoch 2 (current-root and previous-root).
        store.put(&item(2, 2, 64)).unwrap();
        store.put(&item(2, 3, 64)).unwrap();

        let latest = store.read_latest_safe(32).unwrap().unwrap();
        assert_eq!(latest.checkpoint.epoch, Epoch::new(1));
    }

    #[test]
    fn latest_safe_picks_newest_qualifying_epoch() {
        let store = CheckpointStateStore::new(MemoryStore::default());
        store.put(&item(1, 1, 32)).unwrap();
        store.put(&item(5, 2, 160)).unwrap();
        let latest = store.read_latest_safe(32).unwrap().unwrap();
        assert_eq!(latest.checkpoint.epoch, Epoch::new(5));
    }

    #[test]
    fn empty_store_yields_none() {
        let store = CheckpointStateStore::new(MemoryStore::default());
        assert_eq!(store.read_latest_safe(32).unwrap(), None);
    }
}
