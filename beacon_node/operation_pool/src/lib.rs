//! The aggregated attestation pool.
//!
//! Gossip-verified attestations land here, pre-aggregate per `AttestationData`, and are
//! drained by block production under two fork rules: scored single-committee packing
//! pre-Electra, and cross-committee on-chain aggregation from Electra.

mod attestation_group;
mod attestation_pool;
mod bit_union;
mod metrics;
mod persistence;
mod shuffling_check;

pub use attestation_group::{
    AttestationGroup, AttestationWithGain, InsertOutcome, PoolAttestation,
    RETAINED_ATTESTATIONS_PER_GROUP, RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA,
};
pub use attestation_pool::{AttestationPool, Error};
pub use bit_union::{BitsRelation, classify, classify_bytes, merge_in_place};
pub use persistence::{ATTESTATION_POOL_DB_KEY, PersistedAttestation, PersistedOperationPool};
pub use shuffling_check::{InvalidAttestationData, ShufflingCompatibilityCache};

use fork_choice::ForkChoice;
use parking_lot::RwLock;
use std::sync::Arc;
use types::{Attestation, BeaconState, ChainSpec, EthSpec, ForkName, Hash256, Slot};

/// The shared operation pool: a single-writer attestation pool behind a lock, plus its
/// persistence entry points.
#[derive(Default)]
pub struct OperationPool<E: EthSpec> {
    attestation_pool: RwLock<AttestationPool<E>>,
}

impl<E: EthSpec> OperationPool<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a verified (aggregate) attestation.
    pub fn insert_attestation(
        &self,
        attestation: &Attestation<E>,
        data_root: Hash256,
        committee_members: Arc<Vec<u64>>,
        fork_name: ForkName,
    ) -> Result<InsertOutcome, Error> {
        let outcome =
            self.attestation_pool
                .write()
                .add(attestation, data_root, committee_members, fork_name)?;
        metrics::set_gauge(
            &metrics::ATTESTATION_POOL_NUM_ATTESTATIONS,
            self.num_attestations() as i64,
        );
        Ok(outcome)
    }

    /// Total number of retained aggregates.
    pub fn num_attestations(&self) -> usize {
        self.attestation_pool.read().num_attestations()
    }

    pub fn lowest_permissible_slot(&self) -> Slot {
        self.attestation_pool.read().lowest_permissible_slot()
    }

    /// Drop expired slots per the fork's retention window.
    pub fn prune_attestations(&self, clock_slot: Slot, spec: &ChainSpec) {
        self.attestation_pool.write().prune(clock_slot, spec);
    }

    /// Pack the best attestations for a proposal at `state.slot`. Reads a point-in-time
    /// snapshot of the pool.
    pub fn get_attestations_for_block(
        &self,
        fork_choice: &ForkChoice,
        state: &BeaconState<E>,
        spec: &ChainSpec,
    ) -> Vec<Attestation<E>> {
        self.attestation_pool
            .read()
            .get_attestations_for_block(fork_choice, state, spec)
    }

    /// Snapshot the pool for persistence.
    pub fn to_persisted(&self) -> PersistedOperationPool<E> {
        PersistedOperationPool::from_pool(&self.attestation_pool.read())
    }

    /// Restore a pool from its persisted snapshot.
    pub fn from_persisted(persisted: PersistedOperationPool<E>, fork_name: ForkName) -> Self {
        Self {
            attestation_pool: RwLock::new(persisted.into_pool(fork_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_hash::TreeHash;
    use types::{
        AttestationData, Checkpoint, Epoch, FixedBytesExtended, MainnetEthSpec, ParticipationFlags,
        SignedBeaconBlock, Signature,
    };

    type E = MainnetEthSpec;

    fn spec_pre_electra() -> ChainSpec {
        let mut spec = ChainSpec::mainnet();
        spec.electra_fork_epoch = None;
        spec.fulu_fork_epoch = None;
        spec
    }

    fn spec_electra() -> ChainSpec {
        ChainSpec::mainnet()
    }

    /// A fork choice containing one block at slot `block_slot` which every attestation and the
    /// proposal state point at.
    fn single_block_fork_choice(block_slot: u64) -> (ForkChoice, Hash256) {
        let mut fc = ForkChoice::default();
        let mut block = types::BeaconBlock::<E>::empty();
        block.slot = Slot::new(block_slot);
        let block = SignedBeaconBlock::from_block(block, Signature::empty());
        let root = block.canonical_root();
        fc.on_block(&block).unwrap();
        (fc, root)
    }

    fn state_at(slot: u64, block_root: Hash256, num_validators: usize) -> BeaconState<E> {
        let mut state = BeaconState::new(Slot::new(slot), block_root);
        state.effective_balance_increments = vec![32; num_validators];
        state.previous_epoch_participation = vec![ParticipationFlags::default(); num_validators];
        state.current_epoch_participation = vec![ParticipationFlags::default(); num_validators];
        state
    }

    fn attestation_data(slot: u64, index: u64, block_root: Hash256) -> AttestationData {
        AttestationData {
            slot: Slot::new(slot),
            index,
            beacon_block_root: block_root,
            source: Checkpoint::default(),
            target: Checkpoint {
                epoch: Slot::new(slot).epoch(E::slots_per_epoch()),
                root: block_root,
            },
        }
    }

    fn single_bit_attestation(
        fork_name: ForkName,
        data: AttestationData,
        committee_len: usize,
        bit: usize,
    ) -> Attestation<E> {
        let mut att = Attestation::<E>::empty_for_fork(fork_name, data, committee_len).unwrap();
        match &mut att {
            Attestation::Base(inner) => inner.aggregation_bits.set(bit, true).unwrap(),
            Attestation::Electra(inner) => inner.aggregation_bits.set(bit, true).unwrap(),
        }
        att
    }

    /// Pre-Electra packing: four disjoint single-bit attestations pre-aggregate to one full
    /// member and pack as a single attestation scored `4 * balance / distance`.
    #[test]
    fn pre_electra_singles_aggregate_and_pack() {
        let spec = spec_pre_electra();
        let pool = OperationPool::<E>::new();
        let (fork_choice, block_root) = single_block_fork_choice(100);

        let data = attestation_data(100, 3, block_root);
        let data_root = data.tree_hash_root();
        let committee: Arc<Vec<u64>> = Arc::new(vec![0, 1, 2, 3]);

        for bit in 0..4usize {
            let att = single_bit_attestation(ForkName::Deneb, data, 4, bit);
            let outcome = pool
                .insert_attestation(&att, data_root, committee.clone(), ForkName::Deneb)
                .unwrap();
            if bit == 0 {
                assert_eq!(outcome, InsertOutcome::NewData);
            } else {
                assert_eq!(outcome, InsertOutcome::Aggregated);
            }
        }
        assert_eq!(pool.num_attestations(), 1);

        let state = state_at(101, block_root, 4);
        let packed = pool.get_attestations_for_block(&fork_choice, &state, &spec);
        assert_eq!(packed.len(), 1);
        assert_eq!(packed[0].num_set_aggregation_bits(), 4);
        assert_eq!(packed[0].data().slot, Slot::new(100));
    }

    /// Electra cross-committee consolidation: two committees, each with two mutually exclusive
    /// halves. Consolidation rows pair the i-th pick of each committee, spanning both in one
    /// attestation.
    #[test]
    fn electra_consolidation_spans_committees() {
        let spec = spec_electra();
        let pool = OperationPool::<E>::new();
        let (fork_choice, block_root) = single_block_fork_choice(100);

        let committees: [Arc<Vec<u64>>; 2] =
            [Arc::new(vec![0, 1, 2, 3]), Arc::new(vec![4, 5, 6, 7])];

        for (committee_index, committee) in committees.iter().enumerate() {
            let data = attestation_data(100, committee_index as u64, block_root);
            // `empty_for_fork` zeroes the data index for Electra; the data root groups both
            // committees together.
            let wire_data = AttestationData { index: 0, ..data };
            let data_root = wire_data.tree_hash_root();

            for bits in [[0usize, 1], [2, 3]] {
                let mut att =
                    Attestation::<E>::empty_for_fork(ForkName::Electra, data, committee.len())
                        .unwrap();
                if let Attestation::Electra(inner) = &mut att {
                    for bit in bits {
                        inner.aggregation_bits.set(bit, true).unwrap();
                    }
                }
                pool.insert_attestation(&att, data_root, committee.clone(), ForkName::Electra)
                    .unwrap();
            }
        }

        let state = state_at(101, block_root, 8);
        let packed = pool.get_attestations_for_block(&fork_choice, &state, &spec);

        // The two mutually exclusive halves of each committee merged on insert, so a single
        // consolidation covers all eight attesters across both committees.
        assert_eq!(packed.len(), 1);
        let attestation = &packed[0];
        assert_eq!(attestation.get_committee_indices(), vec![0, 1]);
        assert_eq!(attestation.aggregation_bits_len(), 8);
        assert_eq!(attestation.num_set_aggregation_bits(), 8);
    }

    /// Electra packing property: every returned attestation has at least one committee bit and
    /// aggregation bits sized to the concatenated committees.
    #[test]
    fn electra_packing_shape_invariants() {
        let spec = spec_electra();
        let pool = OperationPool::<E>::new();
        let (fork_choice, block_root) = single_block_fork_choice(100);

        let committee: Arc<Vec<u64>> = Arc::new(vec![0, 1, 2]);
        let data = attestation_data(100, 1, block_root);
        let wire_data = AttestationData { index: 0, ..data };
        let att = single_bit_attestation(ForkName::Electra, data, 3, 1);
        pool.insert_attestation(
            &att,
            wire_data.tree_hash_root(),
            committee.clone(),
            ForkName::Electra,
        )
        .unwrap();

        let state = state_at(101, block_root, 3);
        for attestation in pool.get_attestations_for_block(&fork_choice, &state, &spec) {
            assert!(!attestation.get_committee_indices().is_empty());
            assert_eq!(attestation.aggregation_bits_len(), committee.len());
        }
    }

    /// Attestations for slots below the pruned window return `Old` and leave the pool
    /// untouched.
    #[test]
    fn prune_rejects_old_slots() {
        let spec = spec_electra();
        let pool = OperationPool::<E>::new();
        let (_fork_choice, block_root) = single_block_fork_choice(100);

        // Clock at slot 100 (epoch 3): previous epoch starts at slot 64.
        pool.prune_attestations(Slot::new(100), &spec);
        assert_eq!(pool.lowest_permissible_slot(), Slot::new(64));

        let data = attestation_data(63, 0, block_root);
        let att = single_bit_attestation(ForkName::Electra, data, 4, 0);
        let outcome = pool
            .insert_attestation(
                &att,
                data.tree_hash_root(),
                Arc::new(vec![0, 1, 2, 3]),
                ForkName::Electra,
            )
            .unwrap();
        assert_eq!(outcome, InsertOutcome::Old);
        assert_eq!(pool.num_attestations(), 0);
    }

    /// Pool-level prune property: exactly the slots below the window are removed.
    #[test]
    fn prune_removes_only_expired_slots() {
        let spec = spec_electra();
        let pool = OperationPool::<E>::new();
        let (_fc, block_root) = single_block_fork_choice(10);
        let committee: Arc<Vec<u64>> = Arc::new(vec![0, 1, 2, 3]);

        for slot in [40u64, 63, 64, 90] {
            let data = attestation_data(slot, 0, block_root);
            let wire_data = AttestationData { index: 0, ..data };
            let att = single_bit_attestation(ForkName::Electra, data, 4, 0);
            pool.insert_attestation(
                &att,
                wire_data.tree_hash_root(),
                committee.clone(),
                ForkName::Electra,
            )
            .unwrap();
        }
        assert_eq!(pool.num_attestations(), 4);

        pool.prune_attestations(Slot::new(100), &spec);
        // Slots 40 and 63 precede the previous epoch's start (64).
        assert_eq!(pool.num_attestations(), 2);
    }

    /// An Electra attestation with zero committee bits is a fatal invariant break: rejected,
    /// state unchanged.
    #[test]
    fn electra_zero_committee_bits_is_fatal() {
        let pool = OperationPool::<E>::new();
        let (_fc, block_root) = single_block_fork_choice(10);
        let data = attestation_data(10, 0, block_root);

        let mut att =
            Attestation::<E>::empty_for_fork(ForkName::Electra, data, 4).unwrap();
        if let Attestation::Electra(inner) = &mut att {
            inner.committee_bits = Default::default();
        }

        let result = pool.insert_attestation(
            &att,
            data.tree_hash_root(),
            Arc::new(vec![0, 1, 2, 3]),
            ForkName::Electra,
        );
        assert_eq!(result, Err(Error::InvalidCommitteeBits { set_bits: 0 }));
        assert_eq!(pool.num_attestations(), 0);
    }
}
