//! One epoch-aligned slice of a range-sync job, with its download/process/validate state
//! machine and the fork-aware selection of which data requests accompany the block request.

use beacon_chain::BlockInput;
use pharos_network::PeerId;
use pharos_network::rpc::methods::{
    BlobsByRangeRequest, BlocksByRangeRequest, DataColumnsByRangeRequest,
};
use std::collections::HashSet;
use types::{ChainSpec, ColumnIndex, Epoch, EthSpec, Slot};

/// The number of epochs downloaded per batch.
pub const EPOCHS_PER_BATCH: u64 = 1;
/// How many download attempts (distinct peers) a batch gets before the chain is dropped.
pub const MAX_BATCH_DOWNLOAD_ATTEMPTS: u8 = 5;

#[derive(Debug, PartialEq)]
pub struct WrongState {
    pub operation: &'static str,
    pub state: &'static str,
}

/// The data a batch must download alongside its blocks, per the fork at its start slot and
/// the retention windows.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDataRequirement {
    /// Pre-Deneb: blocks only.
    BlocksOnly,
    /// Deneb/Electra within the blob retention window.
    BlocksAndBlobs,
    /// Fulu within the column retention window: the columns still pending for this batch,
    /// restricted to what the serving peer custodies.
    BlocksAndColumns { columns: Vec<ColumnIndex> },
    /// Beyond the retention window: blocks only, data flagged out-of-range.
    OutOfRange,
}

/// Compute the batch's data requirement.
///
/// `pending_columns` is the batch's remaining column debt (`None` on first attempt, meaning
/// the full sampled set); `peer_custody_columns` restricts requests to what the peer can
/// serve.
pub fn batch_data_requirement<E: EthSpec>(
    start_slot: Slot,
    current_epoch: Epoch,
    sampled_columns: &[ColumnIndex],
    pending_columns: Option<&Vec<ColumnIndex>>,
    peer_custody_columns: &[ColumnIndex],
    spec: &ChainSpec,
) -> BatchDataRequirement {
    let batch_epoch = start_slot.epoch(E::slots_per_epoch());
    let fork_name = spec.fork_name_at_slot::<E>(start_slot);

    if !fork_name.deneb_enabled() {
        return BatchDataRequirement::BlocksOnly;
    }

    if fork_name.fulu_enabled() {
        if batch_epoch
            < current_epoch.saturating_sub(spec.min_epochs_for_data_column_sidecars_requests)
        {
            return BatchDataRequirement::OutOfRange;
        }
        let wanted: &[ColumnIndex] = pending_columns.map(Vec::as_slice).unwrap_or(sampled_columns);
        let columns = wanted
            .iter()
            .filter(|column| peer_custody_columns.contains(column))
            .copied()
            .collect();
        return BatchDataRequirement::BlocksAndColumns { columns };
    }

    if batch_epoch < current_epoch.saturating_sub(spec.min_epochs_for_blob_sidecars_requests) {
        return BatchDataRequirement::OutOfRange;
    }
    BatchDataRequirement::BlocksAndBlobs
}

/// The accompanying data request, when the requirement calls for one.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchDataRequest {
    Blobs(BlobsByRangeRequest),
    DataColumns(DataColumnsByRangeRequest),
}

#[derive(Debug)]
pub enum BatchState<E: EthSpec> {
    /// The batch has failed either downloading or processing, but can be requested again.
    AwaitingDownload,
    /// The batch is being downloaded.
    Downloading(PeerId),
    /// The batch has been completely downloaded and is ready for processing.
    AwaitingProcessing(PeerId, Vec<BlockInput<E>>),
    /// The batch is being processed.
    Processing(PeerId),
    /// The batch was completely processed and is waiting for the chain processor's
    /// validation verdict.
    AwaitingValidation(PeerId),
    /// The batch has been processed with an error: aborted, never retried silently.
    Failed,
}

impl<E: EthSpec> BatchState<E> {
    pub fn visualize(&self) -> &'static str {
        match self {
            BatchState::AwaitingDownload => "AwaitingDownload",
            BatchState::Downloading(_) => "Downloading",
            BatchState::AwaitingProcessing(_, _) => "AwaitingProcessing",
            BatchState::Processing(_) => "Processing",
            BatchState::AwaitingValidation(_) => "AwaitingValidation",
            BatchState::Failed => "Failed",
        }
    }
}

/// One batch of a range-sync chain.
#[derive(Debug)]
pub struct BatchInfo<E: EthSpec> {
    start_epoch: Epoch,
    state: BatchState<E>,
    /// Peers that failed to download this batch.
    failed_peers: HashSet<PeerId>,
    /// The columns this batch still needs, carried between retries so a subsequent peer only
    /// downloads the missing ones. `None` until the first partial response.
    pending_columns: Option<Vec<ColumnIndex>>,
    download_attempts: u8,
}

impl<E: EthSpec> BatchInfo<E> {
    pub fn new(start_epoch: Epoch) -> Self {
        Self {
            start_epoch,
            state: BatchState::AwaitingDownload,
            failed_peers: HashSet::new(),
            pending_columns: None,
            download_attempts: 0,
        }
    }

    pub fn start_epoch(&self) -> Epoch {
        self.start_epoch
    }

    pub fn state(&self) -> &BatchState<E> {
        &self.state
    }

    pub fn start_slot(&self) -> Slot {
        self.start_epoch.start_slot(E::slots_per_epoch())
    }

    pub fn count(&self) -> u64 {
        EPOCHS_PER_BATCH * E::slots_per_epoch()
    }

    pub fn failed_peers(&self) -> &HashSet<PeerId> {
        &self.failed_peers
    }

    pub fn pending_columns(&self) -> Option<&Vec<ColumnIndex>> {
        self.pending_columns.as_ref()
    }

    pub fn set_pending_columns(&mut self, columns: Option<Vec<ColumnIndex>>) {
        self.pending_columns = columns;
    }

    /// The block request plus the matching data request for the given requirement. Both carry
    /// identical `start_slot` and `count`.
    pub fn get_requests(
        &self,
        requirement: &BatchDataRequirement,
    ) -> (BlocksByRangeRequest, Option<BatchDataRequest>) {
        let start_slot = self.start_slot().as_u64();
        let count = self.count();
        let blocks = BlocksByRangeRequest { start_slot, count };
        let data = match requirement {
            BatchDataRequirement::BlocksOnly | BatchDataRequirement::OutOfRange => None,
            BatchDataRequirement::BlocksAndBlobs => {
                Some(BatchDataRequest::Blobs(BlobsByRangeRequest {
                    start_slot,
                    count,
                }))
            }
            BatchDataRequirement::BlocksAndColumns { columns } if !columns.is_empty() => {
                Some(BatchDataRequest::DataColumns(DataColumnsByRangeRequest {
                    start_slot,
                    count,
                    columns: columns.clone(),
                }))
            }
            BatchDataRequirement::BlocksAndColumns { .. } => None,
        };
        (blocks, data)
    }

    /*
     * State transitions, per the batch lifecycle diagram.
     */

    pub fn start_downloading(&mut self, peer: PeerId) -> Result<(), WrongState> {
        match self.state {
            BatchState::AwaitingDownload => {
                self.state = BatchState::Downloading(peer);
                Ok(())
            }
            _ => Err(self.wrong_state("start_downloading")),
        }
    }

    /// A download failed: back to `AwaitingDownload`, remembering the peer. Returns whether
    /// the batch still has attempts left.
    pub fn downloading_error(&mut self) -> Result<bool, WrongState> {
        match &self.state {
            BatchState::Downloading(peer) => {
                self.failed_peers.insert(*peer);
                self.download_attempts = self.download_attempts.saturating_add(1);
                self.state = BatchState::AwaitingDownload;
                Ok(self.download_attempts < MAX_BATCH_DOWNLOAD_ATTEMPTS)
            }
            _ => Err(self.wrong_state("downloading_error")),
        }
    }

    pub fn downloading_success(&mut self, blocks: Vec<BlockInput<E>>) -> Result<(), WrongState> {
        match &self.state {
            BatchState::Downloading(peer) => {
                self.state = BatchState::AwaitingProcessing(*peer, blocks);
                Ok(())
            }
            _ => Err(self.wrong_state("downloading_success")),
        }
    }

    pub fn start_processing(&mut self) -> Result<Vec<BlockInput<E>>, WrongState> {
        match std::mem::replace(&mut self.state, BatchState::Failed) {
            BatchState::AwaitingProcessing(peer, blocks) => {
                self.state = BatchState::Processing(peer);
                Ok(blocks)
            }
            other => {
                self.state = other;
                Err(self.wrong_state("start_processing"))
            }
        }
    }

    /// A processing error aborts the batch: there is no silent retry.
    pub fn processing_error(&mut self) -> Result<PeerId, WrongState> {
        match &self.state {
            BatchState::Processing(peer) => {
                let peer = *peer;
                self.state = BatchState::Failed;
                Ok(peer)
            }
            _ => Err(self.wrong_state("processing_error")),
        }
    }

    pub fn processing_success(&mut self) -> Result<(), WrongState> {
        match &self.state {
            BatchState::Processing(peer) => {
                self.state = BatchState::AwaitingValidation(*peer);
                Ok(())
            }
            _ => Err(self.wrong_state("processing_success")),
        }
    }

    /// Chain validation succeeded: the batch is complete and can be dropped.
    pub fn validation_success(self) -> Result<(), WrongState> {
        match self.state {
            BatchState::AwaitingValidation(_) => Ok(()),
            _ => Err(WrongState {
                operation: "validation_success",
                state: self.state.visualize(),
            }),
        }
    }

    fn wrong_state(&self, operation: &'static str) -> WrongState {
        WrongState {
            operation,
            state: self.state.visualize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::MainnetEthSpec;

    type E = MainnetEthSpec;

    #[test]
    fn happy_path_transitions() {
        let mut batch = BatchInfo::<E>::new(Epoch::new(3));
        assert_eq!(batch.start_slot(), Slot::new(96));
        assert_eq!(batch.count(), 32);

        let peer = PeerId::random();
        batch.start_downloading(peer).unwrap();
        batch.downloading_success(vec![]).unwrap();
        let blocks = batch.start_processing().unwrap();
        assert!(blocks.is_empty());
        batch.processing_success().unwrap();
        batch.validation_success().unwrap();
    }

    #[test]
    fn illegal_transitions_raise_wrong_state() {
        let mut batch = BatchInfo::<E>::new(Epoch::new(0));
        assert!(batch.downloading_success(vec![]).is_err());
        assert!(batch.start_processing().is_err());
        assert!(batch.processing_error().is_err());

        let peer = PeerId::random();
        batch.start_downloading(peer).unwrap();
        assert!(batch.start_downloading(peer).is_err());
    }

    #[test]
    fn download_errors_track_failed_peers_and_attempts() {
        let mut batch = BatchInfo::<E>::new(Epoch::new(0));
        for attempt in 0..MAX_BATCH_DOWNLOAD_ATTEMPTS {
            let peer = PeerId::random();
            batch.start_downloading(peer).unwrap();
            let retryable = batch.downloading_error().unwrap();
            assert_eq!(batch.failed_peers().len(), attempt as usize + 1);
            assert_eq!(retryable, attempt + 1 < MAX_BATCH_DOWNLOAD_ATTEMPTS);
        }
    }

    #[test]
    fn processing_error_aborts_for_good() {
        let mut batch = BatchInfo::<E>::new(Epoch::new(0));
        let peer = PeerId::random();
        batch.start_downloading(peer).unwrap();
        batch.downloading_success(vec![]).unwrap();
        batch.start_processing().unwrap();
        let offending = batch.processing_error().unwrap();
        assert_eq!(offending, peer);
        // Aborted: every further operation is a wrong-state error.
        assert!(batch.start_downloading(peer).is_err());
        assert!(batch.processing_success().is_err());
    }

    #[test]
    fn requests_share_slot_bounds() {
        let spec = ChainSpec::mainnet();
        let batch = BatchInfo::<E>::new(Epoch::new(2));

        let requirement = batch_data_requirement::<E>(
            batch.start_slot(),
            Epoch::new(3),
            &[1, 2, 3],
            None,
            &[2, 3, 7],
            &spec,
        );
        // Mainnet spec without Fulu: blobs accompany blocks.
        assert_eq!(requirement, BatchDataRequirement::BlocksAndBlobs);
        let (blocks, data) = batch.get_requests(&requirement);
        match data {
            Some(BatchDataRequest::Blobs(blobs)) => {
                assert_eq!(blobs.start_slot, blocks.start_slot);
                assert_eq!(blobs.count, blocks.count);
            }
            other => panic!("expected blobs request: {other:?}"),
        }
    }

    #[test]
    fn fulu_columns_intersect_peer_custody() {
        let mut spec = ChainSpec::mainnet();
        spec.fulu_fork_epoch = Some(Epoch::new(0));
        let batch = BatchInfo::<E>::new(Epoch::new(2));

        let requirement = batch_data_requirement::<E>(
            batch.start_slot(),
            Epoch::new(3),
            &[1, 2, 3, 4],
            Some(&vec![2, 4]),
            &[2, 3, 7],
            &spec,
        );
        assert_eq!(
            requirement,
            BatchDataRequirement::BlocksAndColumns { columns: vec![2] }
        );
    }

    #[test]
    fn out_of_range_batches_request_blocks_only() {
        let spec = ChainSpec::mainnet();
        let batch = BatchInfo::<E>::new(Epoch::new(0));
        let requirement = batch_data_requirement::<E>(
            batch.start_slot(),
            Epoch::new(5000),
            &[],
            None,
            &[],
            &spec,
        );
        assert_eq!(requirement, BatchDataRequirement::OutOfRange);
        let (_, data) = batch.get_requests(&requirement);
        assert!(data.is_none());
    }
}
