//! Fetching blobs from the execution engine's blob pool.
//!
//! If a blob was seen in the public mempool there is no need to wait for it on P2P gossip:
//! `engine_getBlobs` returns it immediately. Fetched blobs (pre-Fulu) or the data columns
//! computed from them (Fulu) are inserted into the availability cache, and any the node has
//! not yet observed on gossip are handed to `publish_fn` for re-broadcast.

use crate::block_input::DataSource;
use crate::data_availability_cache::{
    Availability, AvailabilityCacheError, DataAvailabilityCache,
};
use crate::kzg_utils::blobs_to_data_column_sidecars;
use crate::metrics;
use kzg::{CELLS_PER_EXT_BLOB, Kzg, KzgProof};
use slot_clock::SlotClock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use types::{
    Blob, BlobSidecar, BlobSidecarError, ChainSpec, ColumnIndex, DataColumnSidecarError,
    DataColumnSidecarList, EthSpec, Hash256, SignedBeaconBlock,
};

/// A versioned hash identifying a blob in the engine's pool.
pub type VersionedHash = Hash256;

/// A blob with its single blob-level proof (`engine_getBlobsV1`, pre-Fulu).
pub struct BlobAndProofV1<E: EthSpec> {
    pub blob: Blob<E>,
    pub proof: KzgProof,
}

/// A blob with its per-cell proofs (`engine_getBlobsV2`, Fulu).
pub struct BlobAndProofV2<E: EthSpec> {
    pub blob: Blob<E>,
    pub proofs: Vec<KzgProof>,
}

/// The narrow slice of the execution engine the blob fetcher uses. The engine API transport
/// lives at the node's edge; this trait is its in-process contract.
pub trait ExecutionBlobsProvider<E: EthSpec>: Send + Sync {
    fn get_blobs_v1(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> impl Future<Output = Result<Vec<Option<BlobAndProofV1<E>>>, String>> + Send;

    fn get_blobs_v2(
        &self,
        versioned_hashes: Vec<VersionedHash>,
    ) -> impl Future<Output = Result<Vec<Option<BlobAndProofV2<E>>>, String>> + Send;
}

/// Blobs or data columns to be re-published to the gossip network.
pub enum BlobsOrDataColumns<E: EthSpec> {
    Blobs(Vec<Arc<BlobSidecar<E>>>),
    DataColumns(DataColumnSidecarList<E>),
}

#[derive(Debug)]
pub enum FetchEngineBlobError {
    BlobSidecarError(BlobSidecarError),
    DataColumnSidecarError(DataColumnSidecarError),
    CacheError(AvailabilityCacheError),
    RequestFailed(String),
    InternalError(String),
}

/// Fetch the blobs a block commits to from the engine and feed them into the availability
/// cache. Returns the availability outcome, or `None` when the engine had nothing useful.
pub async fn fetch_and_process_engine_blobs<E, S, P>(
    cache: &DataAvailabilityCache<E, S>,
    kzg: &Kzg,
    provider: &P,
    block: Arc<SignedBeaconBlock<E>>,
    custody_columns_indices: HashSet<ColumnIndex>,
    spec: &ChainSpec,
    publish_fn: impl FnOnce(BlobsOrDataColumns<E>),
) -> Result<Option<Availability<E>>, FetchEngineBlobError>
where
    E: EthSpec,
    S: SlotClock,
    P: ExecutionBlobsProvider<E>,
{
    let versioned_hashes: Vec<_> = block
        .kzg_commitments()
        .iter()
        .map(|commitment| commitment.calculate_versioned_hash())
        .collect();
    if versioned_hashes.is_empty() {
        debug!("Fetch blobs not triggered - none required");
        return Ok(None);
    }

    metrics::observe(
        &metrics::BLOBS_FROM_EL_EXPECTED,
        versioned_hashes.len() as f64,
    );
    debug!(
        num_expected_blobs = versioned_hashes.len(),
        "Fetching blobs from the EL"
    );

    if spec.is_peer_das_enabled_for_epoch(block.epoch()) {
        fetch_and_process_blobs_v2(
            cache,
            kzg,
            provider,
            block,
            versioned_hashes,
            custody_columns_indices,
            spec,
            publish_fn,
        )
        .await
    } else {
        fetch_and_process_blobs_v1(cache, provider, block, versioned_hashes, publish_fn).await
    }
}

async fn fetch_and_process_blobs_v1<E, S, P>(
    cache: &DataAvailabilityCache<E, S>,
    provider: &P,
    block: Arc<SignedBeaconBlock<E>>,
    versioned_hashes: Vec<VersionedHash>,
    publish_fn: impl FnOnce(BlobsOrDataColumns<E>),
) -> Result<Option<Availability<E>>, FetchEngineBlobError>
where
    E: EthSpec,
    S: SlotClock,
    P: ExecutionBlobsProvider<E>,
{
    let num_expected_blobs = versioned_hashes.len();
    let response = provider
        .get_blobs_v1(versioned_hashes)
        .await
        .inspect_err(|_| metrics::inc_counter(&metrics::BLOBS_FROM_EL_ERROR_TOTAL))
        .map_err(FetchEngineBlobError::RequestFailed)?;

    let num_fetched_blobs = response.iter().filter(|opt| opt.is_some()).count();
    metrics::observe(&metrics::BLOBS_FROM_EL_RECEIVED, num_fetched_blobs as f64);
    if num_fetched_blobs == 0 {
        debug!(num_expected_blobs, "No blobs fetched from the EL");
        metrics::inc_counter(&metrics::BLOBS_FROM_EL_MISS_TOTAL);
        return Ok(None);
    }
    metrics::inc_counter(&metrics::BLOBS_FROM_EL_HIT_TOTAL);

    let (signed_block_header, kzg_commitments_proof) =
        block.signed_block_header_and_kzg_commitments_proof();

    let mut sidecars = Vec::with_capacity(num_fetched_blobs);
    for (index, blob_and_proof) in response
        .into_iter()
        .enumerate()
        .filter_map(|(i, opt_blob)| Some((i, opt_blob?)))
    {
        let sidecar = BlobSidecar::new_with_existing_proof(
            index,
            blob_and_proof.blob,
            &block,
            signed_block_header.clone(),
            &kzg_commitments_proof,
            blob_and_proof.proof,
        )
        .map_err(FetchEngineBlobError::BlobSidecarError)?;
        sidecars.push(Arc::new(sidecar));
    }

    // Ingest before publishing: blobs that arrived on gossip while the request was in flight
    // come back as already-known and are not re-published.
    let mut availability = None;
    let mut to_publish = Vec::new();
    for sidecar in sidecars {
        match cache.ingest_blob(sidecar.clone(), DataSource::Engine) {
            Ok(outcome) => {
                availability = Some(outcome);
                to_publish.push(sidecar);
            }
            Err(AvailabilityCacheError::GossipBlobAlreadyKnown { .. }) => {}
            Err(e) => return Err(FetchEngineBlobError::CacheError(e)),
        }
    }

    if !to_publish.is_empty() {
        publish_fn(BlobsOrDataColumns::Blobs(to_publish));
    }

    debug!(num_fetched_blobs, "Processed engine blobs");
    Ok(availability)
}

#[allow(clippy::too_many_arguments)]
async fn fetch_and_process_blobs_v2<E, S, P>(
    cache: &DataAvailabilityCache<E, S>,
    kzg: &Kzg,
    provider: &P,
    block: Arc<SignedBeaconBlock<E>>,
    versioned_hashes: Vec<VersionedHash>,
    custody_columns_indices: HashSet<ColumnIndex>,
    spec: &ChainSpec,
    publish_fn: impl FnOnce(BlobsOrDataColumns<E>),
) -> Result<Option<Availability<E>>, FetchEngineBlobError>
where
    E: EthSpec,
    S: SlotClock,
    P: ExecutionBlobsProvider<E>,
{
    let num_expected_blobs = versioned_hashes.len();
    let response = provider
        .get_blobs_v2(versioned_hashes)
        .await
        .inspect_err(|_| metrics::inc_counter(&metrics::BLOBS_FROM_EL_ERROR_TOTAL))
        .map_err(FetchEngineBlobError::RequestFailed)?;

    let (blobs, proofs): (Vec<_>, Vec<_>) = response
        .into_iter()
        .flatten()
        .map(|blob_and_proof| (blob_and_proof.blob, blob_and_proof.proofs))
        .unzip();

    let num_fetched_blobs = blobs.len();
    metrics::observe(&metrics::BLOBS_FROM_EL_RECEIVED, num_fetched_blobs as f64);

    // A partial blob set cannot produce columns: every cell of every row is needed.
    if num_fetched_blobs != num_expected_blobs {
        debug!(
            info = "Unable to compute data columns",
            num_fetched_blobs, num_expected_blobs, "Not all blobs fetched from the EL"
        );
        metrics::inc_counter(&metrics::BLOBS_FROM_EL_MISS_TOTAL);
        return Ok(None);
    }
    metrics::inc_counter(&metrics::BLOBS_FROM_EL_HIT_TOTAL);

    let cell_proofs = proofs.into_iter().flatten().collect::<Vec<_>>();
    if cell_proofs.len() != num_fetched_blobs * CELLS_PER_EXT_BLOB {
        return Err(FetchEngineBlobError::InternalError(format!(
            "engine returned {} cell proofs for {} blobs",
            cell_proofs.len(),
            num_fetched_blobs,
        )));
    }

    let blob_refs = blobs.iter().collect::<Vec<_>>();
    let data_columns = blobs_to_data_column_sidecars(&blob_refs, cell_proofs, &block, kzg, spec)
        .map_err(FetchEngineBlobError::DataColumnSidecarError)?;

    // Only the node's sampled columns enter the cache: availability requires a strict match on
    // the sampled set.
    let custody_columns = data_columns
        .into_iter()
        .filter(|column| custody_columns_indices.contains(&column.index))
        .collect::<Vec<_>>();

    let mut availability = None;
    let mut to_publish = Vec::new();
    for column in custody_columns {
        match cache.ingest_data_column(column.clone(), None, DataSource::Engine) {
            Ok(outcome) => {
                availability = Some(outcome);
                to_publish.push(column);
            }
            Err(AvailabilityCacheError::GossipColumnAlreadyKnown { .. }) => {}
            Err(e) => return Err(FetchEngineBlobError::CacheError(e)),
        }
    }

    if !to_publish.is_empty() {
        publish_fn(BlobsOrDataColumns::DataColumns(to_publish));
    }

    debug!(num_fetched_blobs, "Processed engine blobs");
    Ok(availability)
}
