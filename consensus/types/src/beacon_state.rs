use crate::{Checkpoint, Epoch, EthSpec, Hash256, ParticipationFlags, Slot};
use std::marker::PhantomData;

#[derive(Debug, PartialEq, Clone)]
pub enum BeaconStateError {
    UnknownValidator(usize),
    ParticipationOutOfBounds(usize),
    EpochOutOfBounds,
    IncorrectStateVariant,
}

/// The slice of a beacon state the operational core reads when packing attestations: the chain
/// position, justification, per-validator balances and the participation registries.
///
/// The full `BeaconState` belongs to the state-transition function (an external collaborator);
/// the chain processor derives this view for the proposal slot and hands it to the pool.
#[derive(Debug, Clone, Default)]
pub struct BeaconState<E: EthSpec> {
    pub slot: Slot,
    /// The root of the latest block applied to this state (skip slots excluded).
    pub latest_block_root: Hash256,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    /// Effective balance of each validator, in `EFFECTIVE_BALANCE_INCREMENT` units.
    pub effective_balance_increments: Vec<u64>,
    pub previous_epoch_participation: Vec<ParticipationFlags>,
    pub current_epoch_participation: Vec<ParticipationFlags>,
    _phantom: PhantomData<E>,
}

impl<E: EthSpec> BeaconState<E> {
    pub fn new(slot: Slot, latest_block_root: Hash256) -> Self {
        Self {
            slot,
            latest_block_root,
            ..Self::default()
        }
    }

    /// The epoch corresponding to `self.slot`.
    pub fn current_epoch(&self) -> Epoch {
        self.slot.epoch(E::slots_per_epoch())
    }

    /// The epoch prior to `self.current_epoch()`, saturating at genesis.
    pub fn previous_epoch(&self) -> Epoch {
        let current_epoch = self.current_epoch();
        if current_epoch > Epoch::new(0) {
            current_epoch - 1
        } else {
            current_epoch
        }
    }

    /// The justified checkpoint an attestation sourcing `target_epoch` must match.
    pub fn justified_checkpoint_for_target(&self, target_epoch: Epoch) -> Checkpoint {
        if target_epoch == self.current_epoch() {
            self.current_justified_checkpoint
        } else {
            self.previous_justified_checkpoint
        }
    }

    /// The participation flags of `validator_index` for the epoch of `target_epoch`.
    pub fn participation_flags(
        &self,
        validator_index: usize,
        target_epoch: Epoch,
    ) -> Result<ParticipationFlags, BeaconStateError> {
        let registry = if target_epoch == self.current_epoch() {
            &self.current_epoch_participation
        } else if target_epoch == self.previous_epoch() {
            &self.previous_epoch_participation
        } else {
            return Err(BeaconStateError::EpochOutOfBounds);
        };
        registry
            .get(validator_index)
            .copied()
            .ok_or(BeaconStateError::ParticipationOutOfBounds(validator_index))
    }

    /// Effective balance of `validator_index` in increments.
    pub fn effective_balance_increment(
        &self,
        validator_index: usize,
    ) -> Result<u64, BeaconStateError> {
        self.effective_balance_increments
            .get(validator_index)
            .copied()
            .ok_or(BeaconStateError::UnknownValidator(validator_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MainnetEthSpec;
    use crate::consts::altair::TIMELY_TARGET_FLAG_INDEX;

    type E = MainnetEthSpec;

    #[test]
    fn epochs_derive_from_slot() {
        let state = BeaconState::<E>::new(Slot::new(65), Hash256::ZERO);
        assert_eq!(state.current_epoch(), Epoch::new(2));
        assert_eq!(state.previous_epoch(), Epoch::new(1));

        let genesis = BeaconState::<E>::new(Slot::new(0), Hash256::ZERO);
        assert_eq!(genesis.previous_epoch(), Epoch::new(0));
    }

    #[test]
    fn participation_lookup_respects_epoch() {
        let mut state = BeaconState::<E>::new(Slot::new(64), Hash256::ZERO);
        let mut flags = ParticipationFlags::default();
        flags.add_flag(TIMELY_TARGET_FLAG_INDEX).unwrap();
        state.current_epoch_participation = vec![flags];
        state.previous_epoch_participation = vec![ParticipationFlags::default()];

        assert!(
            state
                .participation_flags(0, Epoch::new(2))
                .unwrap()
                .has_flag(TIMELY_TARGET_FLAG_INDEX)
                .unwrap()
        );
        assert!(
            !state
                .participation_flags(0, Epoch::new(1))
                .unwrap()
                .has_flag(TIMELY_TARGET_FLAG_INDEX)
                .unwrap()
        );
        assert_eq!(
            state.participation_flags(0, Epoch::new(0)),
            Err(BeaconStateError::EpochOutOfBounds)
        );
    }
}
