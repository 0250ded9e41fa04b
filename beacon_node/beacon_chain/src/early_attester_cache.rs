use crate::block_input::{AvailableBlockData, BlockInput};
use crate::metrics;
use parking_lot::RwLock;
use std::sync::Arc;
use types::{
    Attestation, AttestationData, BlobSidecarList, Checkpoint, CommitteeIndex,
    DataColumnSidecarList, Epoch, EthSpec, ForkName, Hash256, SignedBeaconBlock, Slot,
};

#[derive(Debug)]
pub enum Error {
    AttestationError(types::AttestationError),
}

pub struct CacheItem<E: EthSpec> {
    /*
     * Values used to create attestations.
     */
    epoch: Epoch,
    beacon_block_root: Hash256,
    source: Checkpoint,
    target: Checkpoint,
    /*
     * Values used to make the block available.
     */
    block: Arc<SignedBeaconBlock<E>>,
    blobs: Option<BlobSidecarList<E>>,
    data_columns: Option<DataColumnSidecarList<E>>,
}

/// Provides a single-item cache which allows for attesting to blocks before those blocks have
/// reached the database.
///
/// This cache stores enough information to:
///
/// - Produce an attestation without consulting the canonical head.
/// - Verify that a block root exists (i.e., will be imported in the future) during attestation
///   verification.
/// - Provide the block's data for serving to peers via RPC.
#[derive(Default)]
pub struct EarlyAttesterCache<E: EthSpec> {
    item: RwLock<Option<CacheItem<E>>>,
}

impl<E: EthSpec> EarlyAttesterCache<E> {
    /// Removes the cached item, meaning that all future calls to `Self::try_attest` will
    /// return `None` until a new cache item is added.
    pub fn clear(&self) {
        *self.item.write() = None
    }

    /// Updates the cache item from an available block input, so that `Self::try_attest` will
    /// return `Some` when given suitable parameters.
    ///
    /// `source` and `target` come from the post-block state the chain processor computed.
    pub fn add_head_block(
        &self,
        input: &BlockInput<E>,
        source: Checkpoint,
        target: Checkpoint,
    ) {
        let Some(block) = input.block() else {
            return;
        };
        let (blobs, data_columns) = match input.data() {
            Some(AvailableBlockData::Blobs { blobs, .. }) => (Some(blobs.clone()), None),
            Some(AvailableBlockData::Columns { columns, .. }) => (None, Some(columns.clone())),
            Some(AvailableBlockData::NoData) | None => (None, None),
        };

        let item = CacheItem {
            epoch: input.slot().epoch(E::slots_per_epoch()),
            beacon_block_root: input.block_root(),
            source,
            target,
            block: block.clone(),
            blobs,
            data_columns,
        };

        *self.item.write() = Some(item);
    }

    /// Will return `Some(attestation)` if all the following conditions are met:
    ///
    /// - There is a cache `item` present.
    /// - `request_slot` is in the same epoch as `item.epoch` and not before the block.
    ///
    /// `committee_len` is the committee size at `(request_slot, request_index)`, resolved by
    /// the caller from the shuffling.
    pub fn try_attest(
        &self,
        request_slot: Slot,
        request_index: CommitteeIndex,
        committee_len: usize,
        fork_name: ForkName,
    ) -> Result<Option<Attestation<E>>, Error> {
        let lock = self.item.read();
        let Some(item) = lock.as_ref() else {
            return Ok(None);
        };

        let request_epoch = request_slot.epoch(E::slots_per_epoch());
        if request_epoch != item.epoch {
            return Ok(None);
        }

        if request_slot < item.block.slot() {
            return Ok(None);
        }

        let attestation = Attestation::empty_for_fork(
            fork_name,
            AttestationData {
                slot: request_slot,
                index: request_index,
                beacon_block_root: item.beacon_block_root,
                source: item.source,
                target: item.target,
            },
            committee_len,
        )
        .map_err(Error::AttestationError)?;

        metrics::inc_counter(&metrics::BEACON_EARLY_ATTESTER_CACHE_HITS);

        Ok(Some(attestation))
    }

    /// Returns `true` if `block_root` matches the cached item.
    pub fn contains_block(&self, block_root: Hash256) -> bool {
        self.item
            .read()
            .as_ref()
            .is_some_and(|item| item.beacon_block_root == block_root)
    }

    /// Returns the block, if `block_root` matches the cached item.
    pub fn get_block(&self, block_root: Hash256) -> Option<Arc<SignedBeaconBlock<E>>> {
        self.item
            .read()
            .as_ref()
            .filter(|item| item.beacon_block_root == block_root)
            .map(|item| item.block.clone())
    }

    /// Returns the blobs, if `block_root` matches the cached item.
    pub fn get_blobs(&self, block_root: Hash256) -> Option<BlobSidecarList<E>> {
        self.item
            .read()
            .as_ref()
            .filter(|item| item.beacon_block_root == block_root)
            .and_then(|item| item.blobs.clone())
    }

    /// Returns the data columns, if `block_root` matches the cached item.
    pub fn get_data_columns(&self, block_root: Hash256) -> Option<DataColumnSidecarList<E>> {
        self.item
            .read()
            .as_ref()
            .filter(|item| item.beacon_block_root == block_root)
            .and_then(|item| item.data_columns.clone())
    }

    /// Returns the epoch of the cached item, if any.
    pub fn epoch(&self) -> Option<Epoch> {
        self.item.read().as_ref().map(|item| item.epoch)
    }
}
