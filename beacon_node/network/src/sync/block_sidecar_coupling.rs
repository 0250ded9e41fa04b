//! Matching downloaded block batches with their sidecar batches.
//!
//! Blocks and sidecars arrive as separate by-range responses sharing slot bounds; this module
//! joins them into `BlockInput`s, detecting the protocol violations (repeated indices, unpaired
//! sidecars, non-linear blocks) that warrant penalizing the serving peer.

use beacon_chain::{AvailableBlockData, BlockInput, BlockInputMeta, DataSource};
use pharos_network::PeerAction;
use std::collections::HashMap;
use std::sync::Arc;
use types::{
    BlobSidecar, ChainSpec, ColumnIndex, DataColumnSidecar, EthSpec, Hash256, SignedBeaconBlock,
    Slot,
};

/// Violations of block-batch structure. Any of these aborts the batch and reports the peer.
#[derive(Debug, PartialEq)]
pub enum BlockError {
    /// `block[i + 1].parent_root` does not match `hash(block[i])`.
    NonLinearParentRoots,
    /// Slots are not strictly increasing.
    NonLinearSlots,
    /// The batch contains a block at or before the finalized slot.
    WouldRevertFinalizedSlot,
}

/// Where the batch came from; head-sync responses match sidecars by header root, finalized
/// ranges by slot, and head-sync column shortfalls are tolerated without penalty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSyncKind {
    Finalized,
    Head,
}

/// A sidecar-coupling failure, with the score penalty it warrants.
#[derive(Debug)]
pub struct CouplingError {
    pub msg: String,
    pub peer_action: Option<PeerAction>,
}

impl CouplingError {
    fn penalize(msg: String) -> Self {
        Self {
            msg,
            peer_action: Some(PeerAction::LowToleranceError),
        }
    }
}

/// The result of matching a column batch: the joined inputs plus the columns the batch still
/// needs from a subsequent peer.
#[derive(Debug)]
pub struct ColumnMatchOutcome<E: EthSpec> {
    pub inputs: Vec<BlockInput<E>>,
    /// `Some` when at least one block is missing sampled columns.
    pub pending_columns: Option<Vec<ColumnIndex>>,
    /// The columns obtained so far per block, carried into the next attempt.
    pub obtained: HashMap<Hash256, Vec<Arc<DataColumnSidecar<E>>>>,
}

/// Require the structural invariants of a by-range block batch.
pub fn validate_block_sequence<E: EthSpec>(
    blocks: &[Arc<SignedBeaconBlock<E>>],
    finalized_slot: Slot,
) -> Result<(), BlockError> {
    for block in blocks {
        if block.slot() <= finalized_slot {
            return Err(BlockError::WouldRevertFinalizedSlot);
        }
    }
    for pair in blocks.windows(2) {
        if pair[1].slot() <= pair[0].slot() {
            return Err(BlockError::NonLinearSlots);
        }
        if pair[1].parent_root() != pair[0].canonical_root() {
            return Err(BlockError::NonLinearParentRoots);
        }
    }
    Ok(())
}

/// Join a blob batch onto its block batch. Both are ordered by slot; each block with
/// commitments consumes the consecutive run of blobs that pair with it.
pub fn match_blobs<E: EthSpec>(
    blocks: &[Arc<SignedBeaconBlock<E>>],
    blobs: Vec<Arc<BlobSidecar<E>>>,
    source: BatchSyncKind,
    spec: &ChainSpec,
) -> Result<Vec<BlockInput<E>>, CouplingError> {
    // There can't be more blobs than blocks commit to; sending any blob (empty included) for
    // a skipped slot is not permitted.
    let mut inputs = Vec::with_capacity(blocks.len());
    let mut blob_iter = blobs.into_iter().peekable();

    for block in blocks {
        let block_root = block.canonical_root();
        let max_blobs_per_block = spec.max_blobs_per_block(block.epoch()) as usize;
        let mut blobs_buffer = vec![None; max_blobs_per_block];

        while {
            blob_iter
                .peek()
                .map(|sidecar| match source {
                    // Head responses may span forks: pair by the exact header root.
                    BatchSyncKind::Head => sidecar.block_root() == block_root,
                    // Finalized ranges cannot fork: slot equality suffices.
                    BatchSyncKind::Finalized => sidecar.slot() == block.slot(),
                })
                .unwrap_or(false)
        } {
            let blob = blob_iter.next().expect("peeked element exists");
            let blob_index = blob.index as usize;
            let Some(blob_opt) = blobs_buffer.get_mut(blob_index) else {
                return Err(CouplingError::penalize(format!(
                    "invalid blob index {blob_index}"
                )));
            };
            if blob_opt.is_some() {
                return Err(CouplingError::penalize(format!(
                    "repeat blob index {blob_index}"
                )));
            }
            *blob_opt = Some(blob);
        }

        let blobs: Vec<_> = blobs_buffer.into_iter().flatten().collect();
        if blobs.len() != block.num_expected_blobs() {
            return Err(CouplingError::penalize(format!(
                "block {block_root:?} expected {} blobs, got {}",
                block.num_expected_blobs(),
                blobs.len(),
            )));
        }

        let fork_name = spec.fork_name_at_slot::<E>(block.slot());
        inputs.push(if blobs.is_empty() {
            BlockInput::pre_data(block.clone(), fork_name)
        } else {
            BlockInput::available(
                block.clone(),
                AvailableBlockData::Blobs {
                    blobs,
                    source: DataSource::Rpc,
                },
                fork_name,
                false,
            )
        });
    }

    // Accumulated sidecars that paired with no block are a protocol violation.
    if blob_iter.next().is_some() {
        return Err(CouplingError::penalize(
            "received blobs that don't pair with any block".to_string(),
        ));
    }

    Ok(inputs)
}

/// Join a column batch onto its block batch, merging columns obtained by previous attempts.
///
/// Every index in `requested` must appear for every block with data; a shortfall penalizes
/// the peer unless the batch is head-sync (where the peer may simply not have imported the
/// tip yet). Blocks holding some but not all `sampled` columns come back as `AwaitingData`,
/// with the union of missing columns in `pending_columns` so the next peer only downloads
/// those.
pub fn match_columns<E: EthSpec>(
    blocks: &[Arc<SignedBeaconBlock<E>>],
    columns: Vec<Arc<DataColumnSidecar<E>>>,
    requested: &[ColumnIndex],
    sampled: &[ColumnIndex],
    source: BatchSyncKind,
    prev_partial: HashMap<Hash256, Vec<Arc<DataColumnSidecar<E>>>>,
    spec: &ChainSpec,
) -> Result<ColumnMatchOutcome<E>, CouplingError> {
    // Group the new columns by block root and index, rejecting duplicates.
    let mut by_block: HashMap<Hash256, HashMap<ColumnIndex, Arc<DataColumnSidecar<E>>>> =
        HashMap::new();
    for (root, group) in prev_partial {
        let entry = by_block.entry(root).or_default();
        for column in group {
            entry.insert(column.index, column);
        }
    }
    for column in columns {
        let block_root = column.block_root();
        let index = column.index;
        if by_block
            .entry(block_root)
            .or_default()
            .insert(index, column)
            .is_some()
        {
            return Err(CouplingError::penalize(format!(
                "repeated column block_root {block_root:?} index {index}"
            )));
        }
    }

    let mut inputs = Vec::with_capacity(blocks.len());
    let mut missing_union: Vec<ColumnIndex> = vec![];
    let mut obtained: HashMap<Hash256, Vec<Arc<DataColumnSidecar<E>>>> = HashMap::new();

    for block in blocks {
        let block_root = block.canonical_root();
        let fork_name = spec.fork_name_at_slot::<E>(block.slot());
        if block.num_expected_blobs() == 0 {
            inputs.push(BlockInput::pre_data(block.clone(), fork_name));
            continue;
        }

        let block_columns = by_block.remove(&block_root).unwrap_or_default();

        // The serving peer promised every requested index for blocks with data.
        let shortfall = requested
            .iter()
            .filter(|index| !block_columns.contains_key(index))
            .collect::<Vec<_>>();
        if !shortfall.is_empty() && source == BatchSyncKind::Finalized {
            return Err(CouplingError::penalize(format!(
                "block {block_root:?} missing requested columns {shortfall:?}"
            )));
        }

        let mut block_columns = block_columns.into_values().collect::<Vec<_>>();
        block_columns.sort_unstable_by_key(|column| column.index);

        let missing = sampled
            .iter()
            .filter(|index| !block_columns.iter().any(|column| column.index == **index))
            .copied()
            .collect::<Vec<_>>();

        if missing.is_empty() {
            inputs.push(BlockInput::available(
                block.clone(),
                AvailableBlockData::Columns {
                    columns: block_columns.clone(),
                    bytes: None,
                    source: DataSource::Rpc,
                },
                fork_name,
                false,
            ));
        } else {
            for index in &missing {
                if !missing_union.contains(index) {
                    missing_union.push(*index);
                }
            }
            inputs.push(BlockInput::awaiting_data(
                BlockInputMeta {
                    block_root,
                    parent_root: Some(block.parent_root()),
                    slot: block.slot(),
                    fork_name,
                    da_out_of_range: false,
                },
                Some(block.clone()),
            ));
        }
        obtained.insert(block_root, block_columns);
    }

    // Columns for roots outside the block set are a violation.
    if !by_block.is_empty() {
        let remaining_roots = by_block.keys().collect::<Vec<_>>();
        return Err(CouplingError::penalize(format!(
            "not all columns consumed: {remaining_roots:?}"
        )));
    }

    missing_union.sort_unstable();
    Ok(ColumnMatchOutcome {
        inputs,
        pending_columns: (!missing_union.is_empty()).then_some(missing_union),
        obtained,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use kzg::{KzgCommitment, KzgProof};
    use types::{
        BeaconBlock, Blob, DataColumn, FixedBytesExtended, KzgProofs, MainnetEthSpec,
        VariableList,
    };

    type E = MainnetEthSpec;

    fn block_at(slot: u64, parent_root: Hash256, commitments: usize) -> Arc<SignedBeaconBlock<E>> {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(slot);
        block.parent_root = parent_root;
        block.body.blob_kzg_commitments =
            VariableList::new(vec![KzgCommitment::empty_for_testing(); commitments]).unwrap();
        Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()))
    }

    fn chain(commitments_per_block: usize) -> Vec<Arc<SignedBeaconBlock<E>>> {
        let mut blocks = vec![];
        let mut parent_root = Hash256::zero();
        for slot in 10..13u64 {
            let block = block_at(slot, parent_root, commitments_per_block);
            parent_root = block.canonical_root();
            blocks.push(block);
        }
        blocks
    }

    fn blob_for(block: &SignedBeaconBlock<E>, index: u64) -> Arc<BlobSidecar<E>> {
        let (header, proof) = block.signed_block_header_and_kzg_commitments_proof();
        Arc::new(
            BlobSidecar::new_with_existing_proof(
                index as usize,
                Blob::<E>::default(),
                block,
                header,
                &proof,
                KzgProof::empty(),
            )
            .unwrap(),
        )
    }

    fn column_for(block: &SignedBeaconBlock<E>, index: ColumnIndex) -> Arc<DataColumnSidecar<E>> {
        let (header, proof) = block.signed_block_header_and_kzg_commitments_proof();
        Arc::new(DataColumnSidecar {
            index,
            column: DataColumn::<E>::default(),
            kzg_commitments: block.message().body.blob_kzg_commitments.clone(),
            kzg_proofs: KzgProofs::<E>::default(),
            signed_block_header: header,
            kzg_commitments_inclusion_proof: proof,
        })
    }

    #[test]
    fn non_linear_parent_roots_abort_the_batch() {
        let mut blocks = chain(0);
        // Corrupt the middle link.
        blocks[1] = block_at(11, Hash256::from_low_u64_be(999), 0);
        assert_eq!(
            validate_block_sequence(&blocks, Slot::new(0)),
            Err(BlockError::NonLinearParentRoots)
        );
    }

    #[test]
    fn non_linear_slots_abort_the_batch() {
        let blocks = vec![
            block_at(10, Hash256::zero(), 0),
            block_at(10, Hash256::zero(), 0),
        ];
        assert_eq!(
            validate_block_sequence(&blocks, Slot::new(0)),
            Err(BlockError::NonLinearSlots)
        );
    }

    #[test]
    fn finalized_slot_is_a_hard_floor() {
        let blocks = chain(0);
        assert_eq!(
            validate_block_sequence(&blocks, Slot::new(10)),
            Err(BlockError::WouldRevertFinalizedSlot)
        );
        assert_eq!(validate_block_sequence(&blocks, Slot::new(9)), Ok(()));
    }

    #[test]
    fn blobs_pair_with_their_blocks() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(2);
        let blobs = blocks
            .iter()
            .flat_map(|block| (0..2).map(|index| blob_for(block, index)))
            .collect::<Vec<_>>();

        let inputs = match_blobs(&blocks, blobs, BatchSyncKind::Head, &spec).unwrap();
        assert_eq!(inputs.len(), 3);
        assert!(inputs.iter().all(|input| input.is_available()));
    }

    #[test]
    fn unpaired_blobs_are_a_violation() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(0);
        // A blob for a block outside the batch cannot pair.
        let stray = blob_for(&block_at(99, Hash256::zero(), 1), 0);
        let err = match_blobs(&blocks, vec![stray], BatchSyncKind::Head, &spec).unwrap_err();
        assert_eq!(err.peer_action, Some(PeerAction::LowToleranceError));
    }

    #[test]
    fn blob_count_mismatch_is_a_violation() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(2);
        // Only one blob for the first block.
        let blobs = vec![blob_for(&blocks[0], 0)];
        assert!(match_blobs(&blocks, blobs, BatchSyncKind::Head, &spec).is_err());
    }

    #[test]
    fn complete_columns_make_blocks_available() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(1);
        let requested = vec![0u64, 1, 2];
        let columns = blocks
            .iter()
            .flat_map(|block| requested.iter().map(|index| column_for(block, *index)))
            .collect::<Vec<_>>();

        let outcome = match_columns(
            &blocks,
            columns,
            &requested,
            &requested,
            BatchSyncKind::Finalized,
            HashMap::new(),
            &spec,
        )
        .unwrap();

        assert!(outcome.pending_columns.is_none());
        assert!(outcome.inputs.iter().all(|input| input.is_available()));
    }

    #[test]
    fn partial_columns_carry_pending_between_retries() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(1);
        let sampled = vec![0u64, 1, 2, 3];

        // First peer serves columns 0 and 1 only.
        let first = blocks
            .iter()
            .flat_map(|block| [0u64, 1].map(|index| column_for(block, index)))
            .collect::<Vec<_>>();
        let outcome = match_columns(
            &blocks,
            first,
            &[0, 1],
            &sampled,
            BatchSyncKind::Finalized,
            HashMap::new(),
            &spec,
        )
        .unwrap();
        assert_eq!(outcome.pending_columns, Some(vec![2, 3]));
        assert!(outcome.inputs.iter().all(|input| !input.is_available()));

        // A second peer serves the remaining columns; the merge completes every block.
        let second = blocks
            .iter()
            .flat_map(|block| [2u64, 3].map(|index| column_for(block, index)))
            .collect::<Vec<_>>();
        let outcome = match_columns(
            &blocks,
            second,
            &[2, 3],
            &sampled,
            BatchSyncKind::Finalized,
            outcome.obtained,
            &spec,
        )
        .unwrap();
        assert!(outcome.pending_columns.is_none());
        assert!(outcome.inputs.iter().all(|input| input.is_available()));
    }

    #[test]
    fn missing_requested_columns_penalize_finalized_peers_only() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(1);
        let requested = vec![0u64, 1];
        let columns = blocks
            .iter()
            .map(|block| column_for(block, 0))
            .collect::<Vec<_>>();

        // Finalized source: hard error.
        assert!(
            match_columns(
                &blocks,
                columns.clone(),
                &requested,
                &requested,
                BatchSyncKind::Finalized,
                HashMap::new(),
                &spec,
            )
            .is_err()
        );

        // Head source: tolerated, the blocks await their data.
        let outcome = match_columns(
            &blocks,
            columns,
            &requested,
            &requested,
            BatchSyncKind::Head,
            HashMap::new(),
            &spec,
        )
        .unwrap();
        assert_eq!(outcome.pending_columns, Some(vec![1]));
    }

    #[test]
    fn stray_columns_are_a_violation() {
        let spec = ChainSpec::mainnet();
        let blocks = chain(1);
        let stray = column_for(&block_at(99, Hash256::zero(), 1), 0);
        assert!(
            match_columns(
                &blocks,
                vec![stray],
                &[0],
                &[0],
                BatchSyncKind::Finalized,
                HashMap::new(),
                &spec,
            )
            .is_err()
        );
    }
}
