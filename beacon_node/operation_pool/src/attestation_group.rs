use crate::bit_union::{BitsRelation, classify, merge_in_place};
use bls::AggregateSignature;
use ssz_types::BitList;
use std::sync::Arc;
use types::{AttestationData, EthSpec};

/// How many aggregates a group retains per `AttestationData`: the block packer rarely benefits
/// from more candidates than it can include for one data.
pub const RETAINED_ATTESTATIONS_PER_GROUP: usize = 3;
/// Electra groups retain more, since cross-committee consolidation draws the i-th best pick of
/// every committee.
pub const RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA: usize = 8;

/// Returned upon inserting an attestation into a group or the pool.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum InsertOutcome {
    /// The signers were already covered by a retained aggregate. No changes were made.
    AlreadyKnown,
    /// The signers were disjoint from a retained aggregate and were merged into it.
    Aggregated,
    /// The attestation brought new data and was retained on its own (any retained aggregates it
    /// covered were dropped).
    NewData,
    /// The attestation's slot is below the pool's lowest permissible slot.
    Old,
}

/// An aggregate held by a group, with its participation bits sized to the committee.
#[derive(Debug, Clone)]
pub struct PoolAttestation<E: EthSpec> {
    pub aggregation_bits: BitList<E::MaxValidatorsPerSlot>,
    pub signature: AggregateSignature,
    /// Cached `aggregation_bits.num_set_bits()`.
    pub true_bits_count: usize,
}

/// A group-level pick, annotated with the balance it newly covers.
#[derive(Debug, Clone)]
pub struct AttestationWithGain<E: EthSpec> {
    pub aggregation_bits: BitList<E::MaxValidatorsPerSlot>,
    pub signature: AggregateSignature,
    /// Sum of effective-balance increments of committee positions that this attestation covers
    /// and that were not yet seen when it was picked.
    pub new_seen_effective_balance: u64,
    pub new_seen_attesters: usize,
}

/// All attestations sharing one `AttestationData` for one committee, pre-aggregated on insert.
///
/// Invariant: no two retained members are in a subset/superset/equal relation; any superset
/// replaces its subsets at insertion time.
#[derive(Debug, Clone)]
pub struct AttestationGroup<E: EthSpec> {
    data: AttestationData,
    /// The committee roster: validator index at each committee position.
    committee: Arc<Vec<u64>>,
    attestations: Vec<PoolAttestation<E>>,
    retained_cap: usize,
}

impl<E: EthSpec> AttestationGroup<E> {
    pub fn new(data: AttestationData, committee: Arc<Vec<u64>>, retained_cap: usize) -> Self {
        Self {
            data,
            committee,
            attestations: Vec::with_capacity(retained_cap),
            retained_cap,
        }
    }

    pub fn data(&self) -> &AttestationData {
        &self.data
    }

    pub fn committee(&self) -> &Arc<Vec<u64>> {
        &self.committee
    }

    pub fn len(&self) -> usize {
        self.attestations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attestations.is_empty()
    }

    pub fn attestations(&self) -> impl Iterator<Item = &PoolAttestation<E>> {
        self.attestations.iter()
    }

    /// Insert an aggregate into the group, merging or collapsing retained members as required.
    pub fn insert(&mut self, attestation: PoolAttestation<E>) -> InsertOutcome {
        // A candidate covered by any retained member carries no new signers.
        if self.attestations.iter().any(|retained| {
            matches!(
                classify(&attestation.aggregation_bits, &retained.aggregation_bits),
                BitsRelation::Subset | BitsRelation::Equal
            )
        }) {
            return InsertOutcome::AlreadyKnown;
        }

        // Disjoint signers aggregate into the first exclusive partner. Retained members are
        // kept mutually non-nested by the superset collapse below, so merging into the first
        // match cannot create a nested pair.
        if let Some(retained) = self.attestations.iter_mut().find(|retained| {
            classify(&attestation.aggregation_bits, &retained.aggregation_bits)
                == BitsRelation::Exclusive
        }) {
            merge_in_place(&mut retained.aggregation_bits, &attestation.aggregation_bits);
            retained
                .signature
                .add_assign_aggregate(&attestation.signature);
            retained.true_bits_count += attestation.true_bits_count;
            return InsertOutcome::Aggregated;
        }

        // New data: drop any retained members the candidate covers, then retain it.
        self.attestations.retain(|retained| {
            classify(&attestation.aggregation_bits, &retained.aggregation_bits)
                != BitsRelation::Superset
        });
        self.attestations.push(attestation);

        if self.attestations.len() > self.retained_cap {
            // Stable sort: ties keep insertion order, so older aggregates win.
            self.attestations
                .sort_by(|a, b| b.true_bits_count.cmp(&a.true_bits_count));
            self.attestations.truncate(self.retained_cap);
        }

        InsertOutcome::NewData
    }

    /// Greedily pick up to `max` retained aggregates, each step taking the member covering the
    /// largest not-yet-seen effective balance. After each pick the not-seen set contracts to
    /// the positions the pick did not cover; stops when it empties or no pick has positive
    /// gain.
    pub fn get_attestations_for_block(
        &self,
        effective_balance_increments: &[u64],
        not_seen_committee_members: &mut Vec<bool>,
        max: usize,
    ) -> Vec<AttestationWithGain<E>> {
        let mut picks = Vec::new();

        while picks.len() < max && not_seen_committee_members.iter().any(|not_seen| *not_seen) {
            let mut best: Option<(usize, u64, usize)> = None;
            for (index, attestation) in self.attestations.iter().enumerate() {
                let (gain, new_attesters) =
                    self.gain_of(attestation, effective_balance_increments, not_seen_committee_members);
                if gain > 0 && best.is_none_or(|(_, best_gain, _)| gain > best_gain) {
                    best = Some((index, gain, new_attesters));
                }
            }

            let Some((index, gain, new_attesters)) = best else {
                break;
            };
            let picked = &self.attestations[index];
            for (position, not_seen) in not_seen_committee_members.iter_mut().enumerate() {
                if *not_seen && picked.aggregation_bits.get(position).unwrap_or(false) {
                    *not_seen = false;
                }
            }
            picks.push(AttestationWithGain {
                aggregation_bits: picked.aggregation_bits.clone(),
                signature: picked.signature.clone(),
                new_seen_effective_balance: gain,
                new_seen_attesters: new_attesters,
            });
        }

        picks
    }

    fn gain_of(
        &self,
        attestation: &PoolAttestation<E>,
        effective_balance_increments: &[u64],
        not_seen_committee_members: &[bool],
    ) -> (u64, usize) {
        let mut gain = 0u64;
        let mut new_attesters = 0usize;
        for (position, validator_index) in self.committee.iter().enumerate() {
            if not_seen_committee_members.get(position).copied().unwrap_or(false)
                && attestation.aggregation_bits.get(position).unwrap_or(false)
            {
                gain += effective_balance_increments
                    .get(*validator_index as usize)
                    .copied()
                    .unwrap_or(0);
                new_attesters += 1;
            }
        }
        (gain, new_attesters)
    }
}
