//! The in-memory operational core between gossip validation and the chain processor: the
//! data-availability cache joining blocks with their blob or column sidecars, the PeerDAS
//! custody context, engine-assisted blob acquisition, column reconstruction, and per-validator
//! monitoring.

mod block_input;
mod custody_context;
mod data_availability_cache;
mod early_attester_cache;
mod fetch_engine_blobs;
pub mod kzg_utils;
pub mod metrics;
mod validator_monitor;

pub use block_input::{
    AvailableBlockData, BlockInput, BlockInputMeta, BlockInputState, DataSource,
};
pub use custody_context::{
    CUSTODY_CHANGE_DA_EFFECTIVE_DELAY_SECONDS, CustodyContext, CustodyContextSsz,
    CustodyCountChanged, EpochCustodyRequirement, NodeCustodyType,
};
pub use data_availability_cache::{
    Availability, AvailabilityCacheError, AvailabilityDemand, AvailabilityDemandKind,
    DataAvailabilityCache, DataColumnReconstructionResult, MAX_BLOCK_INPUT_CACHE_SIZE,
    start_availability_cache_maintenance_service,
};
pub use early_attester_cache::EarlyAttesterCache;
pub use fetch_engine_blobs::{
    BlobAndProofV1, BlobAndProofV2, BlobsOrDataColumns, ExecutionBlobsProvider,
    FetchEngineBlobError, VersionedHash, fetch_and_process_engine_blobs,
};
pub use validator_monitor::{EpochSummary, SUMMARIES_RETAINED, ValidatorMonitor};

/// Convenience for computing a block root once and reusing it.
pub fn get_block_root<E: types::EthSpec>(block: &types::SignedBeaconBlock<E>) -> types::Hash256 {
    block.canonical_root()
}
