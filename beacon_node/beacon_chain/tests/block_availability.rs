//! End-to-end tests for the data-availability cache: block/sidecar joins, promise
//! resolution, reconstruction and pruning.

use beacon_chain::{
    Availability, AvailabilityCacheError, AvailabilityDemandKind, CustodyContext,
    DataAvailabilityCache, DataColumnReconstructionResult, DataSource, MAX_BLOCK_INPUT_CACHE_SIZE,
    NodeCustodyType, kzg_utils,
};
use bls::Signature;
use kzg::{CELLS_PER_EXT_BLOB, Kzg, KzgProof};
use slot_clock::{ManualSlotClock, SlotClock};
use std::sync::Arc;
use std::time::Duration;
use types::{
    BeaconBlock, Blob, BlobSidecar, ChainSpec, DataColumnSidecarList, Epoch, EthSpec, Hash256,
    KzgCommitment, MainnetEthSpec, SignedBeaconBlock, Slot, VariableList,
};

type E = MainnetEthSpec;

struct Rig {
    cache: DataAvailabilityCache<E, ManualSlotClock>,
    custody_context: Arc<CustodyContext<E>>,
    spec: Arc<ChainSpec>,
    kzg: Kzg,
}

fn rig(fulu: bool) -> Rig {
    logging::create_test_tracing_subscriber();
    let mut spec = ChainSpec::mainnet();
    if fulu {
        spec.fulu_fork_epoch = Some(Epoch::new(0));
    }
    let spec = Arc::new(spec);
    let custody_context = Arc::new(CustodyContext::<E>::new(
        [42u8; 32],
        NodeCustodyType::Fullnode,
        &spec,
    ));
    let slot_clock = ManualSlotClock::new(
        Slot::new(0),
        Duration::from_secs(0),
        Duration::from_secs(spec.seconds_per_slot),
    );
    slot_clock.set_slot(2);
    Rig {
        cache: DataAvailabilityCache::new(custody_context.clone(), slot_clock, spec.clone()),
        custody_context,
        spec,
        kzg: Kzg::new_from_ethereum_trusted_setup(),
    }
}

fn block_with_commitments(slot: u64, commitments: usize) -> Arc<SignedBeaconBlock<E>> {
    let mut block = BeaconBlock::<E>::empty();
    block.slot = Slot::new(slot);
    block.body.blob_kzg_commitments =
        VariableList::new(vec![KzgCommitment::empty_for_testing(); commitments]).unwrap();
    Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()))
}

fn columns_for(rig: &Rig, block: &SignedBeaconBlock<E>) -> DataColumnSidecarList<E> {
    let blob = Blob::<E>::default();
    let proofs = vec![KzgProof::empty(); CELLS_PER_EXT_BLOB];
    kzg_utils::blobs_to_data_column_sidecars::<E>(&[&blob], proofs, block, &rig.kzg, &rig.spec)
        .unwrap()
}

fn blob_sidecars(block: &SignedBeaconBlock<E>) -> Vec<Arc<BlobSidecar<E>>> {
    let (header, proof) = block.signed_block_header_and_kzg_commitments_proof();
    (0..block.num_expected_blobs())
        .map(|index| {
            Arc::new(
                BlobSidecar::new_with_existing_proof(
                    index,
                    Blob::<E>::default(),
                    block,
                    header.clone(),
                    &proof,
                    KzgProof::empty(),
                )
                .unwrap(),
            )
        })
        .collect()
}

#[test]
fn blobs_complete_an_electra_block() {
    let rig = rig(false);
    let block = block_with_commitments(1, 2);
    let blobs = blob_sidecars(&block);

    // Blob first, then block, then final blob: insertion order is irrelevant.
    assert!(matches!(
        rig.cache
            .ingest_blob(blobs[0].clone(), DataSource::Gossip)
            .unwrap(),
        Availability::MissingComponents(_)
    ));
    assert!(matches!(
        rig.cache
            .ingest_block(block.clone(), DataSource::Gossip)
            .unwrap(),
        Availability::MissingComponents(_)
    ));
    let availability = rig
        .cache
        .ingest_blob(blobs[1].clone(), DataSource::Gossip)
        .unwrap();

    let Availability::Available(input) = availability else {
        panic!("block should be available: {availability:?}");
    };
    assert!(input.is_available());
    assert_eq!(input.block_root(), block.canonical_root());
}

#[test]
fn columns_complete_a_fulu_block_in_any_order() {
    let rig = rig(true);
    let block = block_with_commitments(1, 1);
    let columns = columns_for(&rig, &block);
    let sampled = rig
        .custody_context
        .sampled_columns_at_epoch(Epoch::new(0), &rig.spec)
        .unwrap();

    // A non-sampled column first: cache goes pending.
    let extra_index = (0..rig.spec.number_of_columns)
        .find(|index| !sampled.contains(index))
        .unwrap();
    assert!(matches!(
        rig.cache
            .ingest_data_column(columns[extra_index as usize].clone(), None, DataSource::Gossip)
            .unwrap(),
        Availability::MissingComponents(_)
    ));

    // Then the block.
    assert!(matches!(
        rig.cache
            .ingest_block(block.clone(), DataSource::Gossip)
            .unwrap(),
        Availability::MissingComponents(_)
    ));

    // Then every sampled column; the last one resolves the promise.
    let mut promise = rig
        .cache
        .block_input_promise(&block.canonical_root())
        .expect("entry should exist");
    let mut last = None;
    for index in &sampled {
        last = Some(
            rig.cache
                .ingest_data_column(columns[*index as usize].clone(), None, DataSource::Gossip)
                .unwrap(),
        );
    }
    let Some(Availability::Available(input)) = last else {
        panic!("sampled set should make the block available");
    };
    assert!(input.data().is_some());

    // The promise observed the same resolution.
    let resolved = promise.borrow_and_update().clone();
    assert!(resolved.is_some());
}

#[test]
fn resolved_entries_report_already_known() {
    let rig = rig(true);
    let block = block_with_commitments(1, 1);
    let columns = columns_for(&rig, &block);
    let sampled = rig
        .custody_context
        .sampled_columns_at_epoch(Epoch::new(0), &rig.spec)
        .unwrap();

    rig.cache
        .ingest_block(block.clone(), DataSource::Gossip)
        .unwrap();
    for index in &sampled {
        rig.cache
            .ingest_data_column(columns[*index as usize].clone(), None, DataSource::Gossip)
            .unwrap();
    }

    // Re-ingesting a sampled column after resolution is an IGNORE.
    let again = rig.cache.ingest_data_column(
        columns[sampled[0] as usize].clone(),
        None,
        DataSource::Gossip,
    );
    assert!(matches!(
        again,
        Err(AvailabilityCacheError::GossipColumnAlreadyKnown { .. })
    ));
}

#[test]
fn reconstruction_recovers_missing_columns() {
    let rig = rig(true);
    let block = block_with_commitments(1, 1);
    let columns = columns_for(&rig, &block);
    let half = (rig.spec.number_of_columns / 2) as usize;
    let sampled = rig
        .custody_context
        .sampled_columns_at_epoch(Epoch::new(0), &rig.spec)
        .unwrap();

    rig.cache
        .ingest_block(block.clone(), DataSource::Gossip)
        .unwrap();
    // Exactly half the columns arrive, but one sampled column is withheld so the block stays
    // pending until reconstruction fills it in.
    let withheld = sampled[0];
    for column in columns.iter().filter(|c| c.index != withheld).take(half) {
        let _ = rig
            .cache
            .ingest_data_column(column.clone(), None, DataSource::Gossip)
            .unwrap();
    }

    let block_root = block.canonical_root();
    let result = rig
        .cache
        .reconstruct_data_columns(&rig.kzg, &block_root)
        .unwrap();

    match result {
        DataColumnReconstructionResult::SuccessResolved(recovered) => {
            assert_eq!(recovered.len(), half);
            assert!(recovered.iter().any(|c| c.index == withheld));
        }
        DataColumnReconstructionResult::SuccessLate(_) => {
            panic!("promise should not have resolved before reconstruction")
        }
        other => panic!("reconstruction should run: {other:?}"),
    }

    // All columns now cached.
    assert_eq!(
        rig.cache
            .cached_data_column_indexes(&block_root)
            .unwrap()
            .len() as u64,
        rig.spec.number_of_columns
    );
}

#[test]
fn reconstruction_needs_half_the_columns() {
    let rig = rig(true);
    let block = block_with_commitments(1, 1);
    let columns = columns_for(&rig, &block);

    rig.cache
        .ingest_block(block.clone(), DataSource::Gossip)
        .unwrap();
    for column in columns.iter().take(3) {
        let _ = rig
            .cache
            .ingest_data_column(column.clone(), None, DataSource::Gossip)
            .unwrap();
    }

    let result = rig
        .cache
        .reconstruct_data_columns(&rig.kzg, &block.canonical_root())
        .unwrap();
    assert!(matches!(
        result,
        DataColumnReconstructionResult::NotAttemptedLessThanHalf
    ));
}

#[test]
fn demand_is_emitted_once_for_incomplete_entries() {
    let rig = rig(false);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    rig.cache.set_demand_channel(tx);

    let block = block_with_commitments(1, 3);
    rig.cache
        .ingest_block(block.clone(), DataSource::Gossip)
        .unwrap();

    let demand = rx.try_recv().expect("demand should be emitted");
    assert_eq!(demand.block_root, block.canonical_root());
    match demand.kind {
        AvailabilityDemandKind::Blobs { missing } => assert_eq!(missing, vec![0, 1, 2]),
        other => panic!("expected blob demand: {other:?}"),
    }

    // One blob later, no further demand is emitted.
    let blobs = blob_sidecars(&block);
    rig.cache
        .ingest_blob(blobs[0].clone(), DataSource::Gossip)
        .unwrap();
    assert!(rx.try_recv().is_err());
}

#[test]
fn prune_walks_ancestors() {
    let rig = rig(false);

    // A chain of three blocks, each with pending blobs.
    let mut parent_root = Hash256::ZERO;
    let mut blocks = vec![];
    for slot in 1..=3u64 {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(slot);
        block.parent_root = parent_root;
        block.body.blob_kzg_commitments =
            VariableList::new(vec![KzgCommitment::empty_for_testing()]).unwrap();
        let block = Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()));
        parent_root = block.canonical_root();
        rig.cache
            .ingest_block(block.clone(), DataSource::Gossip)
            .unwrap();
        blocks.push(block);
    }
    assert_eq!(rig.cache.len(), 3);

    // Pruning the middle block takes its ancestor with it, leaving the tip.
    rig.cache.prune(&blocks[1].canonical_root());
    assert_eq!(rig.cache.len(), 1);
    assert!(rig.cache.contains_block(&blocks[2].canonical_root()));
}

#[test]
fn cache_size_is_bounded() {
    let rig = rig(false);
    for slot in 1..=(MAX_BLOCK_INPUT_CACHE_SIZE as u64 + 3) {
        let block = block_with_commitments(slot, 1);
        rig.cache
            .ingest_block(block, DataSource::Gossip)
            .unwrap();
    }
    assert_eq!(rig.cache.len(), MAX_BLOCK_INPUT_CACHE_SIZE);
}

#[test]
fn sidecars_for_the_wrong_fork_are_rejected() {
    // Pre-Fulu cache rejects columns; Fulu cache rejects blobs.
    let rig_blobs = rig(false);
    let block = block_with_commitments(1, 1);
    let columns = columns_for(&rig_blobs, &block);
    assert!(matches!(
        rig_blobs
            .cache
            .ingest_data_column(columns[0].clone(), None, DataSource::Gossip),
        Err(AvailabilityCacheError::WrongDataVariant { .. })
    ));

    let rig_columns = rig(true);
    let blobs = blob_sidecars(&block);
    assert!(matches!(
        rig_columns
            .cache
            .ingest_blob(blobs[0].clone(), DataSource::Gossip),
        Err(AvailabilityCacheError::WrongDataVariant { .. })
    ));
}
