//! Range sync and block lookup: epoch-aligned batches downloaded from peers, their sidecar
//! coupling, and the walk of unknown parents back to the known chain.

pub mod metrics;
pub mod sync;

pub use sync::batch::{
    BatchDataRequest, BatchDataRequirement, BatchInfo, BatchState, EPOCHS_PER_BATCH,
    MAX_BATCH_DOWNLOAD_ATTEMPTS, WrongState, batch_data_requirement,
};
pub use sync::block_sidecar_coupling::{
    BatchSyncKind, BlockError, ColumnMatchOutcome, CouplingError, match_blobs, match_columns,
    validate_block_sequence,
};
pub use sync::unknown_block_resolver::{
    MAX_PENDING_BLOCKS, ResolutionOutcome, ResolverRequest, UnknownBlockResolver,
};
