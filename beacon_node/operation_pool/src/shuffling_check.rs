//! Shuffling-compatibility validation for block packing.
//!
//! An attestation computed under a different committee shuffling than the proposal state's
//! cannot be included: both sides must agree on the block root one slot before the target
//! epoch's previous epoch started (the shuffling decision root). Skip slots back-walk to the
//! most recent ancestor; the walk never crosses finality.

use fork_choice::{Error as ForkChoiceError, ForkChoice};
use std::collections::HashMap;
use types::{Epoch, EthSpec, Hash256, Slot};

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidAttestationData {
    InvalidTargetEpoch {
        target_epoch: Epoch,
        current_epoch: Epoch,
    },
    InvalidSourceCheckpoint,
    BlockNotInForkChoice(Hash256),
    CannotGetShufflingDependentRoot,
    IncorrectDependentRoot {
        attestation: Hash256,
        state: Hash256,
    },
}

/// Caches shuffling-compatibility verdicts by `(beacon_block_root, target_epoch)`.
///
/// The cache is valid for one packing pass: it is keyed against a single proposal state.
#[derive(Debug, Default)]
pub struct ShufflingCompatibilityCache {
    results: HashMap<(Hash256, Epoch), Result<(), InvalidAttestationData>>,
}

impl ShufflingCompatibilityCache {
    /// Require that `beacon_block_root`'s view of the shuffling for `target_epoch` matches the
    /// proposal state's view (rooted at `state_block_root`).
    pub fn check<E: EthSpec>(
        &mut self,
        fork_choice: &ForkChoice,
        beacon_block_root: Hash256,
        target_epoch: Epoch,
        state_block_root: Hash256,
    ) -> Result<(), InvalidAttestationData> {
        if let Some(result) = self.results.get(&(beacon_block_root, target_epoch)) {
            return result.clone();
        }
        let result = Self::check_uncached::<E>(
            fork_choice,
            beacon_block_root,
            target_epoch,
            state_block_root,
        );
        self.results
            .insert((beacon_block_root, target_epoch), result.clone());
        result
    }

    fn check_uncached<E: EthSpec>(
        fork_choice: &ForkChoice,
        beacon_block_root: Hash256,
        target_epoch: Epoch,
        state_block_root: Hash256,
    ) -> Result<(), InvalidAttestationData> {
        // The shuffling for epochs 0 and 1 is decided before the retained chain begins.
        if target_epoch < Epoch::new(2) {
            return Ok(());
        }
        let pivot_slot = (target_epoch - 1).start_slot(E::slots_per_epoch()) - Slot::new(1);

        if !fork_choice.contains_block(&beacon_block_root) {
            return Err(InvalidAttestationData::BlockNotInForkChoice(
                beacon_block_root,
            ));
        }

        let attestation_dependent = Self::dependent_root::<E>(
            fork_choice,
            beacon_block_root,
            pivot_slot,
        )?;
        let state_dependent =
            Self::dependent_root::<E>(fork_choice, state_block_root, pivot_slot)?;

        if attestation_dependent == state_dependent {
            Ok(())
        } else {
            Err(InvalidAttestationData::IncorrectDependentRoot {
                attestation: attestation_dependent,
                state: state_dependent,
            })
        }
    }

    fn dependent_root<E: EthSpec>(
        fork_choice: &ForkChoice,
        descendant_root: Hash256,
        pivot_slot: Slot,
    ) -> Result<Hash256, InvalidAttestationData> {
        // A pivot below finality or a hole in the DAG both mean the dependent root is
        // unresolvable; skip the candidate rather than guessing.
        fork_choice
            .ancestor_at_slot::<E>(descendant_root, pivot_slot)
            .map_err(|_: ForkChoiceError| InvalidAttestationData::CannotGetShufflingDependentRoot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use types::{BeaconBlock, FixedBytesExtended, MainnetEthSpec, SignedBeaconBlock};

    type E = MainnetEthSpec;

    fn make_block(slot: u64, parent_root: Hash256) -> SignedBeaconBlock<E> {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(slot);
        block.parent_root = parent_root;
        block.state_root = Hash256::from_low_u64_be(slot + 1000);
        SignedBeaconBlock::from_block(block, Signature::empty())
    }

    /// A linear chain crossing the epoch-2 pivot (slot 31 for target epoch 2).
    fn chain(slots: &[u64]) -> (ForkChoice, Vec<Hash256>) {
        let mut fc = ForkChoice::default();
        let mut roots = vec![];
        let mut parent = Hash256::zero();
        for slot in slots {
            let block = make_block(*slot, parent);
            let root = block.canonical_root();
            fc.on_block(&block).unwrap();
            roots.push(root);
            parent = root;
        }
        (fc, roots)
    }

    #[test]
    fn low_target_epochs_always_pass() {
        let (fc, roots) = chain(&[1, 2]);
        let mut cache = ShufflingCompatibilityCache::default();
        assert_eq!(
            cache.check::<E>(&fc, roots[0], Epoch::new(1), roots[1]),
            Ok(())
        );
    }

    #[test]
    fn same_chain_shares_dependent_root() {
        let (fc, roots) = chain(&[1, 31, 40, 70]);
        let mut cache = ShufflingCompatibilityCache::default();
        // Target epoch 2 → pivot slot 31; both sides back-walk to the slot-31 block.
        assert_eq!(
            cache.check::<E>(&fc, roots[2], Epoch::new(2), roots[3]),
            Ok(())
        );
    }

    #[test]
    fn forked_pivot_is_incompatible() {
        let (mut fc, roots) = chain(&[1, 31, 40]);
        // Fork off the slot-1 block with a different slot-31 pivot and a descendant.
        let fork_pivot = make_block(31, roots[0]);
        // Same slot as roots[1] but different content → different root.
        let mut alt = fork_pivot.clone();
        alt.message.state_root = Hash256::from_low_u64_be(777);
        fc.on_block(&alt).unwrap();
        let fork_head = make_block(45, alt.canonical_root());
        fc.on_block(&fork_head).unwrap();

        let mut cache = ShufflingCompatibilityCache::default();
        let result = cache.check::<E>(
            &fc,
            fork_head.canonical_root(),
            Epoch::new(2),
            roots[2],
        );
        assert!(matches!(
            result,
            Err(InvalidAttestationData::IncorrectDependentRoot { .. })
        ));
    }

    #[test]
    fn unknown_attestation_block_is_flagged() {
        let (fc, roots) = chain(&[1, 31, 40]);
        let mut cache = ShufflingCompatibilityCache::default();
        assert_eq!(
            cache.check::<E>(&fc, Hash256::from_low_u64_be(404), Epoch::new(2), roots[2]),
            Err(InvalidAttestationData::BlockNotInForkChoice(
                Hash256::from_low_u64_be(404)
            ))
        );
    }
}
