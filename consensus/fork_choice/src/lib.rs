//! A read-oriented view over the block DAG.
//!
//! The operational core consults fork choice for block presence, finalized/justified
//! checkpoints and dependent-root (ancestor-at-slot) queries. Head selection, attestation
//! weighting and payload status tracking belong to the chain processor and are not represented
//! here; the only mutation exposed is `on_block`, which the chain processor invokes after a
//! block import, plus finalization-driven pruning.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use types::{Checkpoint, Epoch, EthSpec, Hash256, SignedBeaconBlock, Slot};

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    UnknownBlock(Hash256),
    UnknownParent { block_root: Hash256, parent_root: Hash256 },
    SlotBelowFinalized { slot: Slot, finalized_slot: Slot },
    BlockBeforeParent { block_root: Hash256 },
}

/// A compact summary of a block known to fork choice.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoBlock {
    pub slot: Slot,
    pub root: Hash256,
    pub parent_root: Option<Hash256>,
    pub state_root: Hash256,
}

/// The block DAG with its finalization frontier.
#[derive(Debug, Default)]
pub struct ForkChoice {
    blocks: HashMap<Hash256, ProtoBlock>,
    finalized_checkpoint: Checkpoint,
    justified_checkpoint: Checkpoint,
}

/// The canonical shared handle: single writer (the chain processor), many readers.
pub type SharedForkChoice = Arc<RwLock<ForkChoice>>;

impl ForkChoice {
    pub fn new(finalized_checkpoint: Checkpoint, justified_checkpoint: Checkpoint) -> Self {
        Self {
            blocks: HashMap::new(),
            finalized_checkpoint,
            justified_checkpoint,
        }
    }

    /// Register an imported block. The parent must be known unless this is the anchor.
    pub fn on_block<E: EthSpec>(&mut self, block: &SignedBeaconBlock<E>) -> Result<(), Error> {
        let block_root = block.canonical_root();
        let parent_root = block.parent_root();

        if self.blocks.is_empty() {
            // Anchor block: its parent is outside the retained DAG.
            self.blocks.insert(
                block_root,
                ProtoBlock {
                    slot: block.slot(),
                    root: block_root,
                    parent_root: None,
                    state_root: block.state_root(),
                },
            );
            return Ok(());
        }

        let parent = self
            .blocks
            .get(&parent_root)
            .ok_or(Error::UnknownParent {
                block_root,
                parent_root,
            })?;
        if block.slot() <= parent.slot {
            return Err(Error::BlockBeforeParent { block_root });
        }

        self.blocks.insert(
            block_root,
            ProtoBlock {
                slot: block.slot(),
                root: block_root,
                parent_root: Some(parent_root),
                state_root: block.state_root(),
            },
        );
        Ok(())
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.blocks.contains_key(block_root)
    }

    pub fn get_block(&self, block_root: &Hash256) -> Option<ProtoBlock> {
        self.blocks.get(block_root).cloned()
    }

    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    pub fn finalized_slot<E: EthSpec>(&self) -> Slot {
        self.finalized_checkpoint
            .epoch
            .start_slot(E::slots_per_epoch())
    }

    /// Walk the chain of `descendant_root` back to `slot`, returning the root of the block at
    /// or before `slot` (skip slots resolve to their most recent ancestor).
    ///
    /// The walk refuses to cross the finalized slot: dependent roots older than finality are
    /// unresolvable from the retained DAG.
    pub fn ancestor_at_slot<E: EthSpec>(
        &self,
        descendant_root: Hash256,
        slot: Slot,
    ) -> Result<Hash256, Error> {
        let finalized_slot = self.finalized_slot::<E>();
        if slot < finalized_slot {
            return Err(Error::SlotBelowFinalized {
                slot,
                finalized_slot,
            });
        }

        let mut block = self
            .blocks
            .get(&descendant_root)
            .ok_or(Error::UnknownBlock(descendant_root))?;
        while block.slot > slot {
            let Some(parent_root) = block.parent_root else {
                // The anchor bounds the walk: everything at or before it resolves to it.
                return Ok(block.root);
            };
            block = self
                .blocks
                .get(&parent_root)
                .ok_or(Error::UnknownBlock(parent_root))?;
        }
        Ok(block.root)
    }

    /// Returns true if `descendant_root` has `ancestor_root` on its chain of parents.
    pub fn is_descendant(&self, ancestor_root: Hash256, descendant_root: Hash256) -> bool {
        let Some(ancestor) = self.blocks.get(&ancestor_root) else {
            return false;
        };
        let mut current = self.blocks.get(&descendant_root);
        while let Some(block) = current {
            if block.root == ancestor_root {
                return true;
            }
            if block.slot <= ancestor.slot {
                return false;
            }
            current = block
                .parent_root
                .and_then(|parent_root| self.blocks.get(&parent_root));
        }
        false
    }

    /// Advance finalization and drop blocks that are no longer descendants of the new
    /// finalized block.
    pub fn update_finalized<E: EthSpec>(&mut self, finalized_checkpoint: Checkpoint) {
        self.finalized_checkpoint = finalized_checkpoint;
        let finalized_root = finalized_checkpoint.root;
        let finalized_slot = self.finalized_slot::<E>();
        let retained = self
            .blocks
            .values()
            .filter(|block| {
                block.root == finalized_root
                    || (block.slot > finalized_slot
                        && self.is_descendant(finalized_root, block.root))
            })
            .map(|block| block.root)
            .collect::<std::collections::HashSet<_>>();
        self.blocks.retain(|root, _| retained.contains(root));
    }

    pub fn set_justified_checkpoint(&mut self, justified_checkpoint: Checkpoint) {
        self.justified_checkpoint = justified_checkpoint;
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::{BeaconBlock, FixedBytesExtended, MainnetEthSpec, Signature};

    type E = MainnetEthSpec;

    fn make_block(slot: u64, parent_root: Hash256) -> SignedBeaconBlock<E> {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(slot);
        block.parent_root = parent_root;
        block.state_root = Hash256::from_low_u64_be(slot);
        SignedBeaconBlock::from_block(block, Signature::empty())
    }

    /// Build a linear chain with slots `1, 2, 4, 5` (slot 3 skipped).
    fn chain() -> (ForkChoice, Vec<Hash256>) {
        let mut fc = ForkChoice::default();
        let mut roots = vec![];
        let mut parent = Hash256::zero();
        for slot in [1u64, 2, 4, 5] {
            let block = make_block(slot, parent);
            let root = block.canonical_root();
            fc.on_block(&block).unwrap();
            roots.push(root);
            parent = root;
        }
        (fc, roots)
    }

    #[test]
    fn ancestor_at_slot_handles_skip_slots() {
        let (fc, roots) = chain();
        let head = roots[3];
        assert_eq!(fc.ancestor_at_slot::<E>(head, Slot::new(5)).unwrap(), roots[3]);
        assert_eq!(fc.ancestor_at_slot::<E>(head, Slot::new(4)).unwrap(), roots[2]);
        // Slot 3 was skipped: resolves to the slot-2 block.
        assert_eq!(fc.ancestor_at_slot::<E>(head, Slot::new(3)).unwrap(), roots[1]);
        assert_eq!(fc.ancestor_at_slot::<E>(head, Slot::new(1)).unwrap(), roots[0]);
    }

    #[test]
    fn unknown_descendant_errors() {
        let (fc, _roots) = chain();
        assert_eq!(
            fc.ancestor_at_slot::<E>(Hash256::from_low_u64_be(999), Slot::new(1)),
            Err(Error::UnknownBlock(Hash256::from_low_u64_be(999)))
        );
    }

    #[test]
    fn unknown_parent_rejected() {
        let (mut fc, _) = chain();
        let orphan = make_block(9, Hash256::from_low_u64_be(12345));
        assert!(matches!(
            fc.on_block(&orphan),
            Err(Error::UnknownParent { .. })
        ));
    }

    #[test]
    fn descendant_relation() {
        let (fc, roots) = chain();
        assert!(fc.is_descendant(roots[0], roots[3]));
        assert!(fc.is_descendant(roots[3], roots[3]));
        assert!(!fc.is_descendant(roots[3], roots[0]));
    }

    #[test]
    fn finalization_prunes_non_descendants() {
        let (mut fc, roots) = chain();
        // Add a fork off roots[0] at slot 3.
        let fork_block = make_block(3, roots[0]);
        fc.on_block(&fork_block).unwrap();
        assert_eq!(fc.len(), 5);

        fc.update_finalized::<E>(Checkpoint {
            epoch: Epoch::new(0),
            root: roots[1],
        });
        assert!(fc.contains_block(&roots[1]));
        assert!(fc.contains_block(&roots[3]));
        assert!(!fc.contains_block(&fork_block.canonical_root()));
        // The pre-finalized ancestor is dropped.
        assert!(!fc.contains_block(&roots[0]));
    }
}
