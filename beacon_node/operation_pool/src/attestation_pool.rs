use crate::attestation_group::{
    AttestationGroup, AttestationWithGain, InsertOutcome, PoolAttestation,
    RETAINED_ATTESTATIONS_PER_GROUP, RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA,
};
use crate::shuffling_check::{InvalidAttestationData, ShufflingCompatibilityCache};
use crate::metrics;
use bls::AggregateSignature;
use fork_choice::ForkChoice;
use ssz_types::{BitList, BitVector};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;
use types::consts::altair::{
    TIMELY_HEAD_WEIGHT, TIMELY_SOURCE_WEIGHT, TIMELY_TARGET_FLAG_INDEX, TIMELY_TARGET_WEIGHT,
    WEIGHT_DENOMINATOR,
};
use types::{
    Attestation, AttestationBase, AttestationData, AttestationElectra, BeaconState, ChainSpec,
    CommitteeIndex, EthSpec, ForkName, Hash256, Slot,
};

type AttestationDataRoot = Hash256;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    /// An Electra attestation whose `committee_bits` does not have exactly one bit set. This is
    /// a broken invariant upstream; the operation is rejected without touching state.
    InvalidCommitteeBits { set_bits: usize },
    /// The attestation's bitfield length does not match the committee it claims.
    InconsistentBitfieldLengths,
    SszTypes(ssz_types::Error),
    Bitfield(ssz::BitfieldError),
}

impl From<ssz_types::Error> for Error {
    fn from(e: ssz_types::Error) -> Self {
        Error::SszTypes(e)
    }
}

impl From<ssz::BitfieldError> for Error {
    fn from(e: ssz::BitfieldError) -> Self {
        Error::Bitfield(e)
    }
}

/// A pool of aggregated attestations, keyed `slot → data_root → committee_index`.
///
/// The separate keying by `data_root` is required because post-Electra the same slot hosts
/// multiple `AttestationData` values across committees that must consolidate independently.
#[derive(Debug, Default)]
pub struct AttestationPool<E: EthSpec> {
    lowest_permissible_slot: Slot,
    attestations: HashMap<
        Slot,
        HashMap<AttestationDataRoot, BTreeMap<CommitteeIndex, AttestationGroup<E>>>,
    >,
}

impl<E: EthSpec> AttestationPool<E> {
    pub fn lowest_permissible_slot(&self) -> Slot {
        self.lowest_permissible_slot
    }

    /// Total number of retained aggregates across all groups.
    pub fn num_attestations(&self) -> usize {
        self.attestations
            .values()
            .flat_map(|by_root| by_root.values())
            .flat_map(|by_committee| by_committee.values())
            .map(|group| group.len())
            .sum()
    }

    /// Iterate `(slot, data_root, committee_index, group)` over the whole pool.
    pub fn iter_groups(
        &self,
    ) -> impl Iterator<Item = (Slot, Hash256, CommitteeIndex, &AttestationGroup<E>)> {
        self.attestations.iter().flat_map(|(slot, by_root)| {
            by_root.iter().flat_map(move |(data_root, by_committee)| {
                by_committee
                    .iter()
                    .map(move |(committee_index, group)| {
                        (*slot, *data_root, *committee_index, group)
                    })
            })
        })
    }

    /// Insert a verified aggregate into the pool.
    ///
    /// `committee_members` is the roster of the attestation's committee (validator index per
    /// committee position), resolved by the caller from the shuffling.
    pub fn add(
        &mut self,
        attestation: &Attestation<E>,
        data_root: Hash256,
        committee_members: Arc<Vec<u64>>,
        fork_name: ForkName,
    ) -> Result<InsertOutcome, Error> {
        let slot = attestation.data().slot;
        if slot < self.lowest_permissible_slot {
            metrics::inc_counter(&metrics::ATTESTATION_POOL_INSERT_OLD);
            return Ok(InsertOutcome::Old);
        }

        let (committee_index, aggregation_bits) = match attestation {
            Attestation::Base(att) => (
                att.data.index,
                convert_bits::<E::MaxValidatorsPerCommittee, E::MaxValidatorsPerSlot>(
                    &att.aggregation_bits,
                )?,
            ),
            Attestation::Electra(att) => {
                let set_bits = att.committee_bits.num_set_bits();
                if set_bits != 1 {
                    return Err(Error::InvalidCommitteeBits { set_bits });
                }
                let committee_index = att
                    .committee_index()
                    .ok_or(Error::InvalidCommitteeBits { set_bits })?;
                (committee_index, att.aggregation_bits.clone())
            }
        };

        if aggregation_bits.len() != committee_members.len() {
            return Err(Error::InconsistentBitfieldLengths);
        }

        let retained_cap = if fork_name.electra_enabled() {
            RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA
        } else {
            RETAINED_ATTESTATIONS_PER_GROUP
        };

        let true_bits_count = aggregation_bits.num_set_bits();
        let pool_attestation = PoolAttestation {
            aggregation_bits,
            signature: match attestation {
                Attestation::Base(att) => att.signature.clone(),
                Attestation::Electra(att) => att.signature.clone(),
            },
            true_bits_count,
        };

        let group = self
            .attestations
            .entry(slot)
            .or_default()
            .entry(data_root)
            .or_default()
            .entry(committee_index)
            .or_insert_with(|| {
                AttestationGroup::new(*attestation.data(), committee_members, retained_cap)
            });

        let outcome = group.insert(pool_attestation);
        metrics::observe_insert_outcome(&outcome);
        Ok(outcome)
    }

    /// Re-insert an aggregate restored from the persisted pool, bypassing wire-format
    /// extraction.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn add_restored(
        &mut self,
        slot: Slot,
        data_root: Hash256,
        committee_index: CommitteeIndex,
        data: AttestationData,
        committee_members: Arc<Vec<u64>>,
        attestation: PoolAttestation<E>,
        fork_name: ForkName,
    ) {
        let retained_cap = if fork_name.electra_enabled() {
            RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA
        } else {
            RETAINED_ATTESTATIONS_PER_GROUP
        };
        self.attestations
            .entry(slot)
            .or_default()
            .entry(data_root)
            .or_default()
            .entry(committee_index)
            .or_insert_with(|| AttestationGroup::new(data, committee_members, retained_cap))
            .insert(attestation);
    }

    /// Drop slots outside the retention window and raise the lowest permissible slot.
    ///
    /// Post-Deneb every slot from the previous epoch's start through `clock_slot` is retained;
    /// pre-Deneb only the trailing `SLOTS_PER_EPOCH` slots are.
    pub fn prune(&mut self, clock_slot: Slot, spec: &ChainSpec) {
        let fork_name = spec.fork_name_at_slot::<E>(clock_slot);
        let lowest_permissible_slot = if fork_name.deneb_enabled() {
            clock_slot
                .epoch(E::slots_per_epoch())
                .saturating_sub(1u64)
                .start_slot(E::slots_per_epoch())
        } else {
            clock_slot.saturating_sub(E::slots_per_epoch())
        };

        self.attestations
            .retain(|slot, _| *slot >= lowest_permissible_slot);
        self.lowest_permissible_slot = lowest_permissible_slot;
    }

    /// Pack the best attestations for a block proposal at `state.slot`.
    pub fn get_attestations_for_block(
        &self,
        fork_choice: &ForkChoice,
        state: &BeaconState<E>,
        spec: &ChainSpec,
    ) -> Vec<Attestation<E>> {
        let _timer = metrics::start_timer(&metrics::ATTESTATION_POOL_PACKING_TIME);
        let fork_name = spec.fork_name_at_slot::<E>(state.slot);
        if fork_name.electra_enabled() {
            self.get_attestations_for_block_electra(fork_choice, state, spec)
        } else {
            self.get_attestations_for_block_base(fork_choice, state, spec, fork_name)
        }
    }

    fn get_attestations_for_block_base(
        &self,
        fork_choice: &ForkChoice,
        state: &BeaconState<E>,
        spec: &ChainSpec,
        fork_name: ForkName,
    ) -> Vec<Attestation<E>> {
        let mut shuffling_cache = ShufflingCompatibilityCache::default();
        let mut scored: Vec<(f64, Attestation<E>)> = Vec::new();

        // Upper bound for any single attestation's balance gain, for the slot-loop early exit.
        let total_balance_increments: u64 =
            state.effective_balance_increments.iter().sum();

        let mut slots = self.attestations.keys().copied().collect::<Vec<_>>();
        slots.sort_unstable_by(|a, b| b.cmp(a));

        let mut slots_scanned = 0usize;
        for slot in slots {
            if slot + spec.min_attestation_inclusion_delay > state.slot {
                continue;
            }
            // Pre-Deneb attestations expire after one epoch.
            if !fork_name.deneb_enabled() && state.slot > slot + E::slots_per_epoch() {
                continue;
            }
            let inclusion_distance = (state.slot - slot).as_u64();
            slots_scanned += 1;

            if slots_scanned > 2 && scored.len() >= spec.max_attestations {
                // The best conceivable score at this distance cannot displace the current
                // worst of the top set.
                let max_possible = total_balance_increments as f64 / inclusion_distance as f64;
                if max_possible < min_of_top(&scored, spec.max_attestations) {
                    break;
                }
            }

            let Some(by_root) = self.attestations.get(&slot) else {
                continue;
            };
            for by_committee in by_root.values() {
                for group in by_committee.values() {
                    if self
                        .validate_for_inclusion(
                            fork_choice,
                            state,
                            group.data(),
                            &mut shuffling_cache,
                        )
                        .is_err()
                    {
                        continue;
                    }

                    let mut not_seen = self.not_seen_committee_members(state, group);
                    let picks = group.get_attestations_for_block(
                        &state.effective_balance_increments,
                        &mut not_seen,
                        RETAINED_ATTESTATIONS_PER_GROUP,
                    );
                    for pick in picks {
                        let score =
                            pick.new_seen_effective_balance as f64 / inclusion_distance as f64;
                        if let Ok(attestation) = assemble_base::<E>(group.data(), &pick) {
                            scored.push((score, attestation));
                        }
                    }
                }
            }

            if scored.len() >= 2 * spec.max_attestations {
                break;
            }
        }

        scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(spec.max_attestations);
        scored.into_iter().map(|(_, att)| att).collect()
    }

    fn get_attestations_for_block_electra(
        &self,
        fork_choice: &ForkChoice,
        state: &BeaconState<E>,
        spec: &ChainSpec,
    ) -> Vec<Attestation<E>> {
        let mut shuffling_cache = ShufflingCompatibilityCache::default();
        let mut scored: Vec<(f64, Consolidation<E>)> = Vec::new();

        let mut slots = self.attestations.keys().copied().collect::<Vec<_>>();
        slots.sort_unstable_by(|a, b| b.cmp(a));

        for slot in slots {
            // Inclusion beyond the previous epoch is impossible post-Electra.
            if slot.epoch(E::slots_per_epoch()) < state.previous_epoch() {
                break;
            }
            if slot + spec.min_attestation_inclusion_delay > state.slot {
                continue;
            }
            let inclusion_distance = (state.slot - slot).as_u64();
            let weight = participation_weight(inclusion_distance, E::slots_per_epoch());

            let Some(by_root) = self.attestations.get(&slot) else {
                continue;
            };
            for by_committee in by_root.values() {
                let Some(first_group) = by_committee.values().next() else {
                    continue;
                };
                if self
                    .validate_for_inclusion(
                        fork_choice,
                        state,
                        first_group.data(),
                        &mut shuffling_cache,
                    )
                    .is_err()
                {
                    continue;
                }

                // The i-th consolidation row takes the i-th best pick of every committee:
                // a transpose of the per-committee top-k table.
                let mut rows: Vec<Consolidation<E>> = Vec::new();
                for (committee_index, group) in by_committee.iter() {
                    let mut not_seen = self.not_seen_committee_members(state, group);
                    let picks = group.get_attestations_for_block(
                        &state.effective_balance_increments,
                        &mut not_seen,
                        RETAINED_ATTESTATIONS_PER_GROUP_ELECTRA,
                    );
                    for (row, pick) in picks.into_iter().enumerate() {
                        if rows.len() <= row {
                            rows.push(Consolidation::new(*first_group.data()));
                        }
                        rows[row].push(*committee_index, group.committee().len(), pick);
                    }
                }

                for row in rows {
                    if row.by_committee.is_empty() {
                        continue;
                    }
                    let score = row.total_new_seen_effective_balance as f64 * weight;
                    scored.push((score, row));
                }
            }
        }

        scored.sort_by(|(a, _), (b, _)| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(spec.max_attestations_electra);
        scored
            .into_iter()
            .filter_map(|(_, consolidation)| {
                consolidation
                    .into_attestation()
                    .inspect_err(|e| debug!(error = ?e, "Dropping unassemblable consolidation"))
                    .ok()
            })
            .collect()
    }

    /// Inclusion-eligibility checks shared by both packing paths.
    fn validate_for_inclusion(
        &self,
        fork_choice: &ForkChoice,
        state: &BeaconState<E>,
        data: &AttestationData,
        shuffling_cache: &mut ShufflingCompatibilityCache,
    ) -> Result<(), InvalidAttestationData> {
        let target_epoch = data.target.epoch;
        let current_epoch = state.current_epoch();
        if target_epoch != current_epoch && target_epoch != state.previous_epoch() {
            return Err(InvalidAttestationData::InvalidTargetEpoch {
                target_epoch,
                current_epoch,
            });
        }

        if data.source != state.justified_checkpoint_for_target(target_epoch) {
            return Err(InvalidAttestationData::InvalidSourceCheckpoint);
        }

        shuffling_cache.check::<E>(
            fork_choice,
            data.beacon_block_root,
            target_epoch,
            state.latest_block_root,
        )
    }

    /// Committee positions whose validator has not yet earned the timely-target flag for the
    /// attestation's target epoch: inclusion of these positions still pays.
    fn not_seen_committee_members(
        &self,
        state: &BeaconState<E>,
        group: &AttestationGroup<E>,
    ) -> Vec<bool> {
        let target_epoch = group.data().target.epoch;
        group
            .committee()
            .iter()
            .map(|validator_index| {
                state
                    .participation_flags(*validator_index as usize, target_epoch)
                    .map(|flags| !flags.has_flag(TIMELY_TARGET_FLAG_INDEX).unwrap_or(false))
                    .unwrap_or(true)
            })
            .collect()
    }
}

/// One Electra consolidation row: at most one pick per committee for a shared
/// `AttestationData`.
struct Consolidation<E: EthSpec> {
    data: AttestationData,
    /// Ascending committee order, each with its committee length.
    by_committee: BTreeMap<CommitteeIndex, (usize, AttestationWithGain<E>)>,
    total_new_seen_effective_balance: u64,
    new_seen_attesters: usize,
}

impl<E: EthSpec> Consolidation<E> {
    fn new(data: AttestationData) -> Self {
        Self {
            data,
            by_committee: BTreeMap::new(),
            total_new_seen_effective_balance: 0,
            new_seen_attesters: 0,
        }
    }

    fn push(&mut self, committee_index: CommitteeIndex, committee_len: usize, pick: AttestationWithGain<E>) {
        self.total_new_seen_effective_balance += pick.new_seen_effective_balance;
        self.new_seen_attesters += pick.new_seen_attesters;
        self.by_committee
            .insert(committee_index, (committee_len, pick));
    }

    /// Assemble one Electra attestation spanning every member committee: `committee_bits` over
    /// the members and `aggregation_bits` concatenated in ascending committee order.
    fn into_attestation(self) -> Result<Attestation<E>, Error> {
        let total_len: usize = self.by_committee.values().map(|(len, _)| len).sum();
        let mut aggregation_bits: BitList<E::MaxValidatorsPerSlot> =
            BitList::with_capacity(total_len)?;
        let mut committee_bits: BitVector<E::MaxCommitteesPerSlot> = BitVector::default();
        let mut signature = AggregateSignature::infinity();

        let mut offset = 0usize;
        for (committee_index, (committee_len, pick)) in self.by_committee.iter() {
            committee_bits.set(*committee_index as usize, true)?;
            for position in 0..*committee_len {
                if pick.aggregation_bits.get(position).unwrap_or(false) {
                    aggregation_bits.set(offset + position, true)?;
                }
            }
            signature.add_assign_aggregate(&pick.signature);
            offset += committee_len;
        }

        Ok(Attestation::Electra(AttestationElectra {
            aggregation_bits,
            data: AttestationData {
                index: 0,
                ..self.data
            },
            signature,
            committee_bits,
        }))
    }
}

fn assemble_base<E: EthSpec>(
    data: &AttestationData,
    pick: &AttestationWithGain<E>,
) -> Result<Attestation<E>, Error> {
    Ok(Attestation::Base(AttestationBase {
        aggregation_bits: convert_bits::<E::MaxValidatorsPerSlot, E::MaxValidatorsPerCommittee>(
            &pick.aggregation_bits,
        )?,
        data: *data,
        signature: pick.signature.clone(),
    }))
}

/// Copy a bitlist between capacity bounds, preserving length and set bits.
fn convert_bits<M, N>(bits: &BitList<M>) -> Result<BitList<N>, Error>
where
    M: ssz_types::typenum::Unsigned + Clone,
    N: ssz_types::typenum::Unsigned + Clone,
{
    let mut out: BitList<N> = BitList::with_capacity(bits.len())?;
    for (index, bit) in bits.iter().enumerate() {
        if bit {
            out.set(index, true)?;
        }
    }
    Ok(out)
}

/// The altair participation weight an attestation included at `inclusion_distance` earns,
/// normalised to `[0, 1]`.
fn participation_weight(inclusion_distance: u64, slots_per_epoch: u64) -> f64 {
    let mut weight = 0u64;
    if inclusion_distance <= integer_sqrt(slots_per_epoch) {
        weight += TIMELY_SOURCE_WEIGHT;
    }
    if inclusion_distance <= slots_per_epoch {
        weight += TIMELY_TARGET_WEIGHT;
    }
    if inclusion_distance == 1 {
        weight += TIMELY_HEAD_WEIGHT;
    }
    weight as f64 / WEIGHT_DENOMINATOR as f64
}

fn integer_sqrt(n: u64) -> u64 {
    let mut x = n;
    let mut y = x.div_ceil(2);
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// The minimum score among the current best `k` entries.
fn min_of_top<T>(scored: &[(f64, T)], k: usize) -> f64 {
    let mut scores = scored.iter().map(|(score, _)| *score).collect::<Vec<_>>();
    scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    scores
        .get(k.saturating_sub(1))
        .copied()
        .unwrap_or(f64::INFINITY)
}
