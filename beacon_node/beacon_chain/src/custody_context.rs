use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use store::{DBColumn, Error as StoreError, StoreItem};
use tracing::debug;
use types::data_column_custody_group::{
    CustodyIndex, DataColumnCustodyGroupError, compute_columns_for_custody_group,
    get_custody_groups,
};
use types::{ChainSpec, ColumnIndex, Epoch, EthSpec, Slot};

/// A delay before making a custody-group-count change effective, so the node has time to
/// subscribe to the new subnets and column counts stay consistent within an epoch.
pub const CUSTODY_CHANGE_DA_EFFECTIVE_DELAY_SECONDS: u64 = 30;

/// Number of slots a validator registration stays live without being renewed.
const VALIDATOR_REGISTRATION_EXPIRY_SLOTS: u64 = 256;

type ValidatorsAndBalances = Vec<(usize, u64)>;

/// One registered validator's stake, with the slot at which the registration lapses.
#[derive(Debug, Clone, Copy)]
struct ValidatorStake {
    effective_balance: u64,
    expires_at: Slot,
}

/// Tracks attached-validator stake and the custody requirement it implies over time.
///
/// The requirement only ever rises: expiring registrations shrink the stake total, but a
/// requirement that was once advertised stays in force so peers can keep holding us to it.
#[derive(Default, Debug)]
struct ValidatorRegistrations {
    /// Live stake per validator index. Entries lapse `VALIDATOR_REGISTRATION_EXPIRY_SLOTS`
    /// after their last renewal.
    stakes: HashMap<usize, ValidatorStake>,
    /// Change points of the custody requirement, ascending by epoch. Only epochs where the
    /// requirement rose are recorded; the last entry is the requirement at head.
    requirement_history: Vec<EpochCustodyRequirement>,
}

impl ValidatorRegistrations {
    /// A supernode/semi-supernode override seeds the history as if matching stake had been
    /// registered at genesis.
    fn with_override(cgc_override: Option<u64>) -> Self {
        Self {
            stakes: HashMap::new(),
            requirement_history: cgc_override
                .map(|custody_group_count| {
                    vec![EpochCustodyRequirement {
                        epoch: Epoch::new(0),
                        custody_group_count,
                    }]
                })
                .unwrap_or_default(),
        }
    }

    /// The requirement in force at `epoch`: the most recent change point at or before it.
    fn requirement_at(&self, epoch: Epoch) -> Option<u64> {
        self.requirement_history
            .iter()
            .rev()
            .find(|entry| entry.epoch <= epoch)
            .map(|entry| entry.custody_group_count)
    }

    /// The requirement at head, i.e. the latest change point.
    fn head_requirement(&self) -> Option<u64> {
        self.requirement_history
            .last()
            .map(|entry| entry.custody_group_count)
    }

    /// Renew a batch of registrations, lapse stale ones, and re-derive the requirement from
    /// the live stake. Returns the `(effective_epoch, requirement)` of a raise, or `None`
    /// when the requirement did not grow.
    fn register_validators<E: EthSpec>(
        &mut self,
        validators_and_balance: ValidatorsAndBalances,
        current_slot: Slot,
        spec: &ChainSpec,
    ) -> Option<(Epoch, u64)> {
        let expires_at = current_slot + VALIDATOR_REGISTRATION_EXPIRY_SLOTS;
        for (validator_index, effective_balance) in validators_and_balance {
            self.stakes.insert(
                validator_index,
                ValidatorStake {
                    effective_balance,
                    expires_at,
                },
            );
        }
        self.stakes.retain(|_, stake| stake.expires_at > current_slot);

        // Stake converts to custody units, floored at the validator custody requirement and
        // capped by the number of custody groups.
        let total_stake: u64 = self
            .stakes
            .values()
            .map(|stake| stake.effective_balance)
            .sum();
        let requirement = (total_stake / spec.balance_per_additional_custody_group)
            .max(spec.validator_custody_requirement)
            .min(spec.number_of_custody_groups);

        debug!(total_stake, requirement, "Registered validators");

        if self
            .head_requirement()
            .is_some_and(|head| head >= requirement)
        {
            return None;
        }

        // The raise takes effect one epoch after the subscription delay has elapsed.
        let delay_slots =
            CUSTODY_CHANGE_DA_EFFECTIVE_DELAY_SECONDS.div_ceil(spec.seconds_per_slot);
        let effective_epoch = (current_slot + delay_slots).epoch(E::slots_per_epoch()) + 1;
        match self.requirement_history.last_mut() {
            // A raise landing on (or before) the pending change point folds into it, keeping
            // the history strictly ascending.
            Some(entry) if entry.epoch >= effective_epoch => {
                entry.custody_group_count = requirement;
            }
            _ => self.requirement_history.push(EpochCustodyRequirement {
                epoch: effective_epoch,
                custody_group_count: requirement,
            }),
        }
        Some((effective_epoch, requirement))
    }
}

/// The node's custody mode from CLI parameters, an override floor for the custody count.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum NodeCustodyType {
    /// Subscribes to all columns.
    Supernode,
    /// Subscribes to half the columns, enough to reconstruct the rest on demand.
    SemiSupernode,
    /// Minimal custody requirements.
    #[default]
    Fullnode,
}

impl NodeCustodyType {
    pub fn get_custody_count_override(&self, spec: &ChainSpec) -> Option<u64> {
        match self {
            Self::Fullnode => None,
            Self::SemiSupernode => Some(spec.number_of_custody_groups / 2),
            Self::Supernode => Some(spec.number_of_custody_groups),
        }
    }
}

/// Emitted when the custody group count grows, so networking can subscribe to new subnets.
#[derive(Debug, PartialEq)]
pub struct CustodyCountChanged {
    pub new_custody_group_count: u64,
    pub old_custody_group_count: u64,
    pub sampling_count: u64,
    pub effective_epoch: Epoch,
}

/// Everything the node needs to decide which custody groups and columns it is responsible
/// for: fixed per node id, growing monotonically with attached validator stake.
#[derive(Debug)]
pub struct CustodyContext<E: EthSpec> {
    /// The node id the custody-group walk is seeded with.
    raw_node_id: [u8; 32],
    /// The custody group count driven by attached validators, advertised to peers. Only ever
    /// raised (`fetch_max`), matching the requirement history's monotonicity.
    validator_custody_count: AtomicU64,
    validator_registrations: RwLock<ValidatorRegistrations>,
    _phantom_data: PhantomData<E>,
}

impl<E: EthSpec> CustodyContext<E> {
    pub fn new(raw_node_id: [u8; 32], node_custody_type: NodeCustodyType, spec: &ChainSpec) -> Self {
        let cgc_override = node_custody_type.get_custody_count_override(spec);
        Self {
            raw_node_id,
            validator_custody_count: AtomicU64::new(cgc_override.unwrap_or(0)),
            validator_registrations: RwLock::new(ValidatorRegistrations::with_override(
                cgc_override,
            )),
            _phantom_data: PhantomData,
        }
    }

    /// Restore the custody context from disk. A CLI override larger than the persisted head
    /// count cannot take effect without a resync; it is ignored with a warning.
    pub fn new_from_persisted_custody_context(
        ssz_context: CustodyContextSsz,
        raw_node_id: [u8; 32],
        node_custody_type: NodeCustodyType,
        spec: &ChainSpec,
    ) -> Self {
        let cgc_override = node_custody_type.get_custody_count_override(spec);
        if let Some(cgc_from_cli) = cgc_override
            && cgc_from_cli > ssz_context.validator_custody_at_head
        {
            tracing::warn!(
                current_custody_count = ssz_context.validator_custody_at_head,
                node_custody_type = ?node_custody_type,
                "Changing node type requires a resync and will have no effect",
            );
        }
        let mut requirement_history = ssz_context.epoch_validator_custody_requirements;
        requirement_history.sort_by_key(|entry| entry.epoch);
        CustodyContext {
            raw_node_id,
            validator_custody_count: AtomicU64::new(ssz_context.validator_custody_at_head),
            validator_registrations: RwLock::new(ValidatorRegistrations {
                stakes: HashMap::new(),
                requirement_history,
            }),
            _phantom_data: PhantomData,
        }
    }

    pub fn raw_node_id(&self) -> [u8; 32] {
        self.raw_node_id
    }

    /// Register validators; if the custody group count grows, returns the change so the
    /// network can extend its subscriptions. Once the count has reached
    /// `NUMBER_OF_CUSTODY_GROUPS` further updates are no-ops.
    pub fn register_validators(
        &self,
        validators_and_balance: ValidatorsAndBalances,
        current_slot: Slot,
        spec: &ChainSpec,
    ) -> Option<CustodyCountChanged> {
        let (effective_epoch, requirement) = self
            .validator_registrations
            .write()
            .register_validators::<E>(validators_and_balance, current_slot, spec)?;

        // `fetch_max` keeps the advertised count monotonic even against a stale history
        // restored from disk.
        let previous = self
            .validator_custody_count
            .fetch_max(requirement, Ordering::AcqRel);
        if requirement <= previous {
            return None;
        }

        debug!(
            old_cgc = previous,
            new_cgc = requirement,
            %effective_epoch,
            "Custody group count raised"
        );
        Some(CustodyCountChanged {
            new_custody_group_count: self.custody_group_count_at_head(spec),
            old_custody_group_count: previous,
            sampling_count: self.num_of_custody_groups_to_sample(effective_epoch, spec),
            effective_epoch,
        })
    }

    /// The custody group count at head, advertised in metadata and the ENR.
    ///
    /// Do not use for data-availability checks: the count varies over epochs, use
    /// [`Self::num_of_custody_groups_to_sample`].
    pub fn custody_group_count_at_head(&self, spec: &ChainSpec) -> u64 {
        // Zero means no stake has ever registered and no override is set: the protocol
        // minimum applies.
        Some(self.validator_custody_count.load(Ordering::Acquire))
            .filter(|count| *count > 0)
            .unwrap_or(spec.custody_requirement)
    }

    /// The custody group count that was active at `epoch`.
    pub fn custody_group_count_at_epoch(&self, epoch: Epoch, spec: &ChainSpec) -> u64 {
        self.validator_registrations
            .read()
            .requirement_at(epoch)
            .unwrap_or(spec.custody_requirement)
    }

    /// The number of custody groups this node must sample for a block at `epoch` to import:
    /// never below `SAMPLES_PER_SLOT`, so sampling is a superset of custody, and never above
    /// the number of custody groups.
    pub fn num_of_custody_groups_to_sample(&self, epoch: Epoch, spec: &ChainSpec) -> u64 {
        self.custody_group_count_at_epoch(epoch, spec)
            .max(spec.samples_per_slot)
            .min(spec.number_of_custody_groups)
    }

    /// The custody groups assigned to this node for its count at `epoch`.
    pub fn custody_groups_at_epoch(
        &self,
        epoch: Epoch,
        spec: &ChainSpec,
    ) -> Result<Vec<CustodyIndex>, DataColumnCustodyGroupError> {
        get_custody_groups(
            self.raw_node_id,
            self.custody_group_count_at_epoch(epoch, spec),
            spec,
        )
    }

    /// The columns this node custodies at `epoch`, ascending.
    pub fn custody_columns_at_epoch(
        &self,
        epoch: Epoch,
        spec: &ChainSpec,
    ) -> Result<Vec<ColumnIndex>, DataColumnCustodyGroupError> {
        let groups = self.custody_groups_at_epoch(epoch, spec)?;
        columns_for_groups(&groups, spec)
    }

    /// The columns this node must sample for availability at `epoch`, ascending. Always a
    /// superset of [`Self::custody_columns_at_epoch`].
    pub fn sampled_columns_at_epoch(
        &self,
        epoch: Epoch,
        spec: &ChainSpec,
    ) -> Result<Vec<ColumnIndex>, DataColumnCustodyGroupError> {
        let sampling_count = self.num_of_custody_groups_to_sample(epoch, spec);
        let groups = get_custody_groups(self.raw_node_id, sampling_count, spec)?;
        columns_for_groups(&groups, spec)
    }

    /// Snapshot for persistence across restarts.
    pub fn to_persisted(&self) -> CustodyContextSsz {
        CustodyContextSsz {
            validator_custody_at_head: self.validator_custody_count.load(Ordering::Acquire),
            epoch_validator_custody_requirements: self
                .validator_registrations
                .read()
                .requirement_history
                .clone(),
        }
    }
}

fn columns_for_groups(
    groups: &[CustodyIndex],
    spec: &ChainSpec,
) -> Result<Vec<ColumnIndex>, DataColumnCustodyGroupError> {
    let mut columns = Vec::new();
    for group in groups {
        columns.extend(compute_columns_for_custody_group(*group, spec)?);
    }
    columns.sort_unstable();
    Ok(columns)
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct EpochCustodyRequirement {
    pub epoch: Epoch,
    pub custody_group_count: u64,
}

/// The persisted form of [`CustodyContext`].
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct CustodyContextSsz {
    pub validator_custody_at_head: u64,
    pub epoch_validator_custody_requirements: Vec<EpochCustodyRequirement>,
}

impl StoreItem for CustodyContextSsz {
    fn db_column() -> DBColumn {
        DBColumn::BeaconMeta
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
    use store::{KeyValueStore, MemoryStore};
    use types::MainnetEthSpec;

    type E = MainnetEthSpec;

    fn context(node_custody_type: NodeCustodyType) -> (CustodyContext<E>, ChainSpec) {
        let spec = ChainSpec::mainnet();
        (
            CustodyContext::new([11u8; 32], node_custody_type, &spec),
            spec,
        )
    }

    #[test]
    fn fullnode_defaults_to_minimum_custody() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        assert_eq!(
            context.custody_group_count_at_head(&spec),
            spec.custody_requirement
        );
    }

    #[test]
    fn supernode_custodies_every_group() {
        let (context, spec) = context(NodeCustodyType::Supernode);
        assert_eq!(
            context.custody_group_count_at_head(&spec),
            spec.number_of_custody_groups
        );
        let columns = context
            .custody_columns_at_epoch(Epoch::new(0), &spec)
            .unwrap();
        assert_eq!(columns.len() as u64, spec.number_of_columns);
    }

    #[test]
    fn sampling_is_a_superset_of_custody() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let custody = context
            .custody_columns_at_epoch(Epoch::new(0), &spec)
            .unwrap();
        let sampled = context
            .sampled_columns_at_epoch(Epoch::new(0), &spec)
            .unwrap();
        assert!(custody.iter().all(|column| sampled.contains(column)));
        assert!(sampled.len() >= custody.len());
    }

    #[test]
    fn validator_stake_raises_custody_count() {
        let (context, spec) = context(NodeCustodyType::Fullnode);

        // 64 validators of 32 ETH each = 64 custody units.
        let validators = (0..64usize).map(|i| (i, 32_000_000_000)).collect();
        let changed = context
            .register_validators(validators, Slot::new(0), &spec)
            .expect("custody count should increase");

        assert_eq!(changed.old_custody_group_count, 0);
        assert_eq!(changed.new_custody_group_count, 64);
        assert!(changed.sampling_count >= 64);
        assert_eq!(context.custody_group_count_at_head(&spec), 64);

        // Registering the same validators again changes nothing.
        let validators = (0..64usize).map(|i| (i, 32_000_000_000)).collect();
        assert_eq!(
            context.register_validators(validators, Slot::new(1), &spec),
            None
        );
    }

    #[test]
    fn custody_count_saturates_at_group_count() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let validators = (0..1024usize).map(|i| (i, 32_000_000_000)).collect();
        let changed = context
            .register_validators(validators, Slot::new(0), &spec)
            .unwrap();
        assert_eq!(
            changed.new_custody_group_count,
            spec.number_of_custody_groups
        );

        // Saturated: further registrations are no-ops.
        let validators = (0..2048usize).map(|i| (i, 32_000_000_000)).collect();
        assert_eq!(
            context.register_validators(validators, Slot::new(1), &spec),
            None
        );
    }

    #[test]
    fn small_stake_keeps_validator_floor() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let changed = context
            .register_validators(vec![(0, 32_000_000_000)], Slot::new(0), &spec)
            .unwrap();
        // One unit of stake still pays the validator custody floor.
        assert_eq!(
            changed.new_custody_group_count,
            spec.validator_custody_requirement
        );
    }

    #[test]
    fn lapsed_registrations_do_not_lower_the_requirement() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let validators: ValidatorsAndBalances =
            (0..64usize).map(|i| (i, 32_000_000_000)).collect();
        context
            .register_validators(validators, Slot::new(0), &spec)
            .unwrap();

        // Far past the expiry window, a single renewing validator lapses the other 63; the
        // advertised requirement stays where it was.
        let later = Slot::new(VALIDATOR_REGISTRATION_EXPIRY_SLOTS * 4);
        assert_eq!(
            context.register_validators(vec![(0, 32_000_000_000)], later, &spec),
            None
        );
        assert_eq!(context.custody_group_count_at_head(&spec), 64);
    }

    #[test]
    fn requirement_history_is_epoch_addressable() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let validators = (0..64usize).map(|i| (i, 32_000_000_000)).collect();
        let changed = context
            .register_validators(validators, Slot::new(0), &spec)
            .unwrap();

        // Before the effective epoch the protocol minimum applies; from it, the raise.
        assert_eq!(
            context.custody_group_count_at_epoch(Epoch::new(0), &spec),
            spec.custody_requirement
        );
        assert_eq!(
            context.custody_group_count_at_epoch(changed.effective_epoch, &spec),
            64
        );
        assert_eq!(
            context.custody_group_count_at_epoch(changed.effective_epoch + 5, &spec),
            64
        );
    }

    #[test]
    fn persisted_round_trip_through_the_store() {
        let (context, spec) = context(NodeCustodyType::Fullnode);
        let validators = (0..64usize).map(|i| (i, 32_000_000_000)).collect();
        context
            .register_validators(validators, Slot::new(0), &spec)
            .unwrap();

        let store = MemoryStore::default();
        store
            .put_item(b"custody_context", &context.to_persisted())
            .unwrap();
        let persisted: CustodyContextSsz = store
            .get_item(b"custody_context")
            .unwrap()
            .expect("context should be stored");

        let restored = CustodyContext::<E>::new_from_persisted_custody_context(
            persisted,
            [11u8; 32],
            NodeCustodyType::Fullnode,
            &spec,
        );
        assert_eq!(restored.custody_group_count_at_head(&spec), 64);
    }
}
