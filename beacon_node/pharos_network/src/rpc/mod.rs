pub mod methods;

pub use methods::{
    BlobsByRangeRequest, BlobsByRootRequest, BlocksByRangeRequest, BlocksByRootRequest,
    DataColumnsByRangeRequest, DataColumnsByRootRequest, EnrAttestationBitfield,
    EnrSyncCommitteeBitfield, GoodbyeReason, MetaData, MetaDataV1, MetaDataV2, MetaDataV3, Ping,
    RequestValidationError, StatusMessage, StatusMessageV1, StatusMessageV2,
    minimum_columns_by_root_epoch,
};

use std::time::Duration;

/// The timeout on a single ReqResp data request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// GOODBYE is best-effort: a short timeout so shutdown and disconnects are never held up.
pub const GOODBYE_TIMEOUT: Duration = Duration::from_secs(1);
