use crate::attestation_group::PoolAttestation;
use crate::attestation_pool::AttestationPool;
use bls::AggregateSignature;
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use ssz_types::BitList;
use std::marker::PhantomData;
use std::sync::Arc;
use store::{DBColumn, Error as StoreError, StoreItem};
use types::{AttestationData, EthSpec, ForkName, Hash256, Slot};

/// The fixed key the attestation pool persists under within `DBColumn::OpPool`.
pub const ATTESTATION_POOL_DB_KEY: &[u8] = b"attestation";

/// One retained aggregate in its persisted form.
#[derive(Debug, Clone, Encode, Decode)]
pub struct PersistedAttestation {
    pub slot: Slot,
    pub data_root: Hash256,
    pub committee_index: u64,
    pub data: AttestationData,
    pub committee: Vec<u64>,
    pub aggregation_bits: Vec<u8>,
    pub signature: AggregateSignature,
}

/// The attestation pool's shutdown snapshot: every retained aggregate, flattened.
///
/// Stored as an opaque blob keyed by operation type; restored via
/// [`PersistedOperationPool::into_pool`].
#[derive(Debug, Clone, Default, Encode, Decode)]
pub struct PersistedOperationPool<E: EthSpec> {
    pub attestations: Vec<PersistedAttestation>,
    #[ssz(skip_serializing, skip_deserializing)]
    _phantom: PhantomData<E>,
}

impl<E: EthSpec> PersistedOperationPool<E> {
    pub fn from_pool(pool: &AttestationPool<E>) -> Self {
        let attestations = pool
            .iter_groups()
            .flat_map(|(slot, data_root, committee_index, group)| {
                let data = *group.data();
                let committee = group.committee().as_ref().clone();
                group.attestations().map(move |attestation| PersistedAttestation {
                    slot,
                    data_root,
                    committee_index,
                    data,
                    committee: committee.clone(),
                    aggregation_bits: attestation.aggregation_bits.clone().into_bytes().to_vec(),
                    signature: attestation.signature.clone(),
                })
            })
            .collect();
        Self {
            attestations,
            _phantom: PhantomData,
        }
    }

    /// Rebuild the pool, re-running the group insertion so invariants hold even for blobs
    /// written by older versions.
    pub fn into_pool(self, fork_name: ForkName) -> AttestationPool<E> {
        let mut pool = AttestationPool::default();
        for persisted in self.attestations {
            let Ok(aggregation_bits) =
                BitList::<E::MaxValidatorsPerSlot>::from_bytes(persisted.aggregation_bits.into())
            else {
                continue;
            };
            let attestation = PoolAttestation {
                true_bits_count: aggregation_bits.num_set_bits(),
                aggregation_bits,
                signature: persisted.signature,
            };
            pool.add_restored(
                persisted.slot,
                persisted.data_root,
                persisted.committee_index,
                persisted.data,
                Arc::new(persisted.committee),
                attestation,
                fork_name,
            );
        }
        pool
    }
}

impl<E: EthSpec> StoreItem for PersistedOperationPool<E> {
    fn db_column() -> DBColumn {
        DBColumn::OpPool
    }

    fn as_store_bytes(&self) -> Vec<u8> {
        self.as_ssz_bytes()
    }

    fn from_store_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        Self::from_ssz_bytes(bytes).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation_group::InsertOutcome;
    use store::{KeyValueStore, MemoryStore};
    use tree_hash::TreeHash;
    use types::{Attestation, MainnetEthSpec};

    type E = MainnetEthSpec;

    fn pool_with_attestations() -> AttestationPool<E> {
        let mut pool = AttestationPool::default();
        let data = AttestationData {
            slot: Slot::new(10),
            index: 2,
            ..AttestationData::default()
        };
        let committee: Arc<Vec<u64>> = Arc::new(vec![5, 6, 7, 8]);
        for position in 0..2usize {
            let mut att =
                Attestation::<E>::empty_for_fork(ForkName::Electra, data, committee.len())
                    .unwrap();
            if let Attestation::Electra(inner) = &mut att {
                inner.aggregation_bits.set(position, true).unwrap();
            }
            let outcome = pool
                .add(
                    &att,
                    data.tree_hash_root(),
                    committee.clone(),
                    ForkName::Electra,
                )
                .unwrap();
            assert_ne!(outcome, InsertOutcome::Old);
        }
        pool
    }

    #[test]
    fn round_trip_preserves_aggregates() {
        let pool = pool_with_attestations();
        let persisted = PersistedOperationPool::from_pool(&pool);

        let store = MemoryStore::default();
        store
            .put_item(ATTESTATION_POOL_DB_KEY, &persisted)
            .unwrap();
        let restored: PersistedOperationPool<E> = store
            .get_item(ATTESTATION_POOL_DB_KEY)
            .unwrap()
            .expect("pool should be stored");

        let restored_pool = restored.into_pool(ForkName::Electra);
        assert_eq!(restored_pool.num_attestations(), pool.num_attestations());
    }
}
