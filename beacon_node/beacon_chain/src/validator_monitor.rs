//! Per-validator performance tracking for operators that register validators of interest.
//!
//! The monitor observes attestations as they arrive on gossip and as they are included in
//! blocks, and folds them into per-epoch summaries logged at epoch transitions.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use types::{AttestationData, Epoch, EthSpec, Slot};

/// The maximum number of epochs summaries are retained for a validator.
pub const SUMMARIES_RETAINED: usize = 3;

/// What the monitor saw of one validator in one epoch.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EpochSummary {
    /// The number of attestations seen on gossip.
    pub attestations: usize,
    /// The delay between the start of the attestation's slot and the first gossip observation.
    pub attestation_min_delay: Option<Duration>,
    /// The number of attestations included in blocks.
    pub attestation_block_inclusions: usize,
    /// The minimum inclusion distance over included attestations.
    pub attestation_min_block_inclusion_distance: Option<Slot>,
    /// The number of blocks proposed by this validator.
    pub blocks: usize,
}

impl EpochSummary {
    fn register_gossip_attestation(&mut self, delay: Duration) {
        self.attestations += 1;
        self.attestation_min_delay = Some(match self.attestation_min_delay {
            Some(existing) => existing.min(delay),
            None => delay,
        });
    }

    fn register_attestation_block_inclusion(&mut self, distance: Slot) {
        self.attestation_block_inclusions += 1;
        self.attestation_min_block_inclusion_distance =
            Some(match self.attestation_min_block_inclusion_distance {
                Some(existing) => existing.min(distance),
                None => distance,
            });
    }
}

#[derive(Debug, Default)]
struct MonitoredValidator {
    summaries: HashMap<Epoch, EpochSummary>,
}

impl MonitoredValidator {
    fn summary(&mut self, epoch: Epoch) -> &mut EpochSummary {
        self.summaries.entry(epoch).or_default()
    }

    fn prune(&mut self, current_epoch: Epoch) {
        if self.summaries.len() > SUMMARIES_RETAINED {
            self.summaries
                .retain(|epoch, _| *epoch + SUMMARIES_RETAINED as u64 > current_epoch);
        }
    }
}

/// Tracks attestation timing and block inclusion per registered validator.
pub struct ValidatorMonitor<E: EthSpec> {
    validators: RwLock<HashMap<u64, MonitoredValidator>>,
    _phantom: std::marker::PhantomData<E>,
}

impl<E: EthSpec> Default for ValidatorMonitor<E> {
    fn default() -> Self {
        Self {
            validators: RwLock::new(HashMap::new()),
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<E: EthSpec> ValidatorMonitor<E> {
    pub fn add_validator(&self, validator_index: u64) {
        self.validators
            .write()
            .entry(validator_index)
            .or_default();
        debug!(validator_index, "Started monitoring validator");
    }

    pub fn is_monitored(&self, validator_index: u64) -> bool {
        self.validators.read().contains_key(&validator_index)
    }

    pub fn num_validators(&self) -> usize {
        self.validators.read().len()
    }

    /// Record a monitored validator's attestation observed on gossip, `delay` after the start
    /// of its slot.
    pub fn register_gossip_attestation(
        &self,
        validator_index: u64,
        data: &AttestationData,
        delay: Duration,
    ) {
        if let Some(validator) = self.validators.write().get_mut(&validator_index) {
            validator
                .summary(data.target.epoch)
                .register_gossip_attestation(delay);
        }
    }

    /// Record a monitored validator's attestation included in a block at `inclusion_slot`.
    pub fn register_attestation_in_block(
        &self,
        validator_index: u64,
        data: &AttestationData,
        inclusion_slot: Slot,
    ) {
        let distance = inclusion_slot.saturating_sub(data.slot);
        if let Some(validator) = self.validators.write().get_mut(&validator_index) {
            validator
                .summary(data.target.epoch)
                .register_attestation_block_inclusion(distance);
        }
    }

    /// Record a block proposed by a monitored validator.
    pub fn register_block(&self, proposer_index: u64, slot: Slot) {
        if let Some(validator) = self.validators.write().get_mut(&proposer_index) {
            validator.summary(slot.epoch(E::slots_per_epoch())).blocks += 1;
        }
    }

    /// The summary of `validator_index` for `epoch`, if any activity was recorded.
    pub fn get_summary(&self, validator_index: u64, epoch: Epoch) -> Option<EpochSummary> {
        self.validators
            .read()
            .get(&validator_index)?
            .summaries
            .get(&epoch)
            .cloned()
    }

    /// Log the previous epoch's summaries and prune old ones. Invoked once per epoch
    /// transition by the chain processor.
    pub fn process_epoch_transition(&self, current_epoch: Epoch) {
        let previous_epoch = current_epoch.saturating_sub(1u64);
        let mut validators = self.validators.write();
        for (validator_index, validator) in validators.iter_mut() {
            if let Some(summary) = validator.summaries.get(&previous_epoch) {
                info!(
                    validator_index,
                    epoch = %previous_epoch,
                    attestations = summary.attestations,
                    attestation_min_delay = ?summary.attestation_min_delay,
                    block_inclusions = summary.attestation_block_inclusions,
                    min_inclusion_distance =
                        ?summary.attestation_min_block_inclusion_distance,
                    blocks = summary.blocks,
                    "Validator epoch summary"
                );
            }
            validator.prune(current_epoch);
        }
    }
}
