use crate::block_input::{AvailableBlockData, BlockInput, DataSource};
use crate::custody_context::CustodyContext;
use crate::kzg_utils;
use crate::metrics;
use fork_choice::SharedForkChoice;
use kzg::Kzg;
use parking_lot::RwLock;
use slot_clock::SlotClock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use task_executor::TaskExecutor;
use tokio::sync::{mpsc, watch};
use tracing::debug;
use types::{
    BlobSidecar, ChainSpec, ColumnIndex, DataColumnSidecar, DataColumnSidecarList, Epoch, EthSpec,
    ForkName, Hash256, SignedBeaconBlock, Slot,
};

/// The cache only needs to absorb short forks and propagation delay: availability resolves
/// within a slot in the happy path, so a handful of entries suffices.
pub const MAX_BLOCK_INPUT_CACHE_SIZE: usize = 5;

#[derive(Debug, PartialEq)]
pub enum AvailabilityCacheError {
    /// A sidecar arrived for a fork that does not carry that data kind, or an entry already
    /// holds the other data kind. Raised rather than silently succeeding, for every fork.
    WrongDataVariant {
        fork_name: ForkName,
    },
    /// The `(block_root, index)` pair is already cached; per gossip policy this is IGNOREd.
    GossipBlobAlreadyKnown {
        block_root: Hash256,
        index: u64,
    },
    /// The `(block_root, index)` pair is already cached, or the `(slot, proposer, index)`
    /// dedupe triple was already observed.
    GossipColumnAlreadyKnown {
        block_root: Hash256,
        index: ColumnIndex,
    },
    InvalidBlobIndex {
        index: u64,
        max: u64,
    },
    InvalidColumnIndex {
        index: ColumnIndex,
    },
    UnknownBlockRoot(Hash256),
    SlotClockError,
}

/// Returned after any ingestion: either the entry is still missing components, or the block
/// input became fully available.
pub enum Availability<E: EthSpec> {
    MissingComponents(Hash256),
    Available(Box<BlockInput<E>>),
}

impl<E: EthSpec> fmt::Debug for Availability<E> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::MissingComponents(block_root) => {
                write!(f, "MissingComponents({})", block_root)
            }
            Self::Available(input) => write!(f, "Available({:?})", input.block_root()),
        }
    }
}

/// The outcome of a PeerDAS erasure-recovery attempt.
#[derive(Debug)]
pub enum DataColumnReconstructionResult<E: EthSpec> {
    /// Fewer than half the columns are cached; recovery is impossible.
    NotAttemptedLessThanHalf,
    /// Every column is already cached (or another attempt is in flight).
    NotAttemptedFull,
    /// Recovery completed and resolved the availability promise.
    SuccessResolved(DataColumnSidecarList<E>),
    /// Recovery completed after the promise had already been resolved by another path.
    SuccessLate(DataColumnSidecarList<E>),
    Failed,
}

/// A request for the network/engine layers to go fetch what gossip has not yet delivered.
#[derive(Debug, Clone)]
pub struct AvailabilityDemand {
    pub block_root: Hash256,
    pub slot: Slot,
    pub kind: AvailabilityDemandKind,
}

#[derive(Debug, Clone)]
pub enum AvailabilityDemandKind {
    Blobs { missing: Vec<u64> },
    Columns { missing: Vec<ColumnIndex> },
}

struct CachedColumn<E: EthSpec> {
    sidecar: Arc<DataColumnSidecar<E>>,
    bytes: Option<Vec<u8>>,
}

enum CachedData<E: EthSpec> {
    Blobs(HashMap<u64, Arc<BlobSidecar<E>>>),
    Columns(HashMap<ColumnIndex, CachedColumn<E>>),
}

struct CacheEntry<E: EthSpec> {
    slot: Slot,
    fork_name: ForkName,
    parent_root: Option<Hash256>,
    da_out_of_range: bool,
    block: Option<Arc<SignedBeaconBlock<E>>>,
    cached_data: Option<CachedData<E>>,
    /// Resolved first, with the data alone.
    availability_tx: watch::Sender<Option<AvailableBlockData<E>>>,
    /// Resolved second, with the complete block input.
    block_input_tx: watch::Sender<Option<BlockInput<E>>>,
    resolved: bool,
    demand_emitted: bool,
    reconstruction_started: bool,
    last_source: DataSource,
}

impl<E: EthSpec> CacheEntry<E> {
    fn new(slot: Slot, fork_name: ForkName, da_out_of_range: bool) -> Self {
        let (availability_tx, _) = watch::channel(None);
        let (block_input_tx, _) = watch::channel(None);
        Self {
            slot,
            fork_name,
            parent_root: None,
            da_out_of_range,
            block: None,
            cached_data: None,
            availability_tx,
            block_input_tx,
            resolved: false,
            demand_emitted: false,
            reconstruction_started: false,
            last_source: DataSource::Gossip,
        }
    }

    fn epoch(&self) -> Epoch {
        self.slot.epoch(E::slots_per_epoch())
    }

    fn cached_blob_indexes(&self) -> Vec<u64> {
        match &self.cached_data {
            Some(CachedData::Blobs(blobs)) => blobs.keys().copied().collect(),
            _ => vec![],
        }
    }

    fn cached_column_indexes(&self) -> Vec<ColumnIndex> {
        match &self.cached_data {
            Some(CachedData::Columns(columns)) => columns.keys().copied().collect(),
            _ => vec![],
        }
    }
}

/// Assembles a block's availability view by joining gossiped/RPC'd blocks with their blob
/// sidecars (Deneb/Electra) or sampled data-column sidecars (Fulu), resolving a one-shot
/// availability promise when the view completes.
///
/// Entries are created lazily on the first observation of any component; insertion order is
/// irrelevant. Each entry's promise pair resolves exactly once, availability before block
/// input.
pub struct DataAvailabilityCache<E: EthSpec, S: SlotClock> {
    entries: RwLock<HashMap<Hash256, CacheEntry<E>>>,
    /// The gossip dedupe triples for column sidecars.
    observed_column_triples: RwLock<HashSet<(Slot, u64, ColumnIndex)>>,
    custody_context: Arc<CustodyContext<E>>,
    slot_clock: S,
    spec: Arc<ChainSpec>,
    demand_tx: RwLock<Option<mpsc::UnboundedSender<AvailabilityDemand>>>,
}

impl<E: EthSpec, S: SlotClock> DataAvailabilityCache<E, S> {
    pub fn new(custody_context: Arc<CustodyContext<E>>, slot_clock: S, spec: Arc<ChainSpec>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            observed_column_triples: RwLock::new(HashSet::new()),
            custody_context,
            slot_clock,
            spec,
            demand_tx: RwLock::new(None),
        }
    }

    /// Register the channel on which fetch demands (engine/RPC) are emitted for fresh,
    /// incomplete entries.
    pub fn set_demand_channel(&self, tx: mpsc::UnboundedSender<AvailabilityDemand>) {
        *self.demand_tx.write() = Some(tx);
    }

    pub fn custody_context(&self) -> &Arc<CustodyContext<E>> {
        &self.custody_context
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains_block(&self, block_root: &Hash256) -> bool {
        self.entries
            .read()
            .get(block_root)
            .is_some_and(|entry| entry.block.is_some())
    }

    /// The blob indexes currently cached for `block_root`, `None` when no entry exists.
    pub fn cached_blob_indexes(&self, block_root: &Hash256) -> Option<Vec<u64>> {
        self.entries
            .read()
            .get(block_root)
            .map(|entry| entry.cached_blob_indexes())
    }

    /// The column indexes currently cached for `block_root`, `None` when no entry exists.
    pub fn cached_data_column_indexes(&self, block_root: &Hash256) -> Option<Vec<ColumnIndex>> {
        self.entries
            .read()
            .get(block_root)
            .map(|entry| entry.cached_column_indexes())
    }

    /// A promise for the entry's data, resolved when the availability view completes.
    pub fn availability_promise(
        &self,
        block_root: &Hash256,
    ) -> Option<watch::Receiver<Option<AvailableBlockData<E>>>> {
        self.entries
            .read()
            .get(block_root)
            .map(|entry| entry.availability_tx.subscribe())
    }

    /// A promise for the complete block input, resolved immediately after the availability
    /// promise.
    pub fn block_input_promise(
        &self,
        block_root: &Hash256,
    ) -> Option<watch::Receiver<Option<BlockInput<E>>>> {
        self.entries
            .read()
            .get(block_root)
            .map(|entry| entry.block_input_tx.subscribe())
    }

    /// Ingest a gossip/RPC block.
    pub fn ingest_block(
        &self,
        block: Arc<SignedBeaconBlock<E>>,
        source: DataSource,
    ) -> Result<Availability<E>, AvailabilityCacheError> {
        let slot = block.slot();
        let fork_name = self.spec.fork_name_at_slot::<E>(slot);
        if !fork_name.deneb_enabled() {
            return Ok(Availability::Available(Box::new(BlockInput::pre_data(
                block, fork_name,
            ))));
        }

        let block_root = block.canonical_root();
        let mut entries = self.entries.write();
        let entry = self.entry_or_insert(&mut entries, block_root, slot);

        if entry.block.is_some() {
            metrics::inc_counter(&metrics::DATA_AVAILABILITY_CACHE_DUPLICATE_BLOCK);
        } else {
            entry.parent_root = Some(block.parent_root());
            entry.block = Some(block);
            entry.last_source = source;
        }

        let availability = Self::check_availability(
            &self.custody_context,
            &self.spec,
            entry,
            block_root,
        );
        self.maybe_emit_demand(entry, block_root);
        drop(entries);
        self.enforce_max_size();
        Ok(availability)
    }

    /// Ingest a gossip/RPC/engine blob sidecar (Deneb/Electra only).
    pub fn ingest_blob(
        &self,
        blob: Arc<BlobSidecar<E>>,
        source: DataSource,
    ) -> Result<Availability<E>, AvailabilityCacheError> {
        let slot = blob.slot();
        let fork_name = self.spec.fork_name_at_slot::<E>(slot);
        if !fork_name.deneb_enabled() || fork_name.fulu_enabled() {
            return Err(AvailabilityCacheError::WrongDataVariant { fork_name });
        }

        let max_blobs = self.spec.max_blobs_per_block(slot.epoch(E::slots_per_epoch()));
        if blob.index >= max_blobs {
            return Err(AvailabilityCacheError::InvalidBlobIndex {
                index: blob.index,
                max: max_blobs,
            });
        }

        let block_root = blob.block_root();
        let mut entries = self.entries.write();
        let entry = self.entry_or_insert(&mut entries, block_root, slot);
        entry.parent_root.get_or_insert(blob.block_parent_root());

        let blobs = match entry
            .cached_data
            .get_or_insert_with(|| CachedData::Blobs(HashMap::new()))
        {
            CachedData::Blobs(blobs) => blobs,
            CachedData::Columns(_) => {
                return Err(AvailabilityCacheError::WrongDataVariant { fork_name });
            }
        };

        if blobs.contains_key(&blob.index) {
            // Same index with same or differing content: gossip IGNORE either way.
            return Err(AvailabilityCacheError::GossipBlobAlreadyKnown {
                block_root,
                index: blob.index,
            });
        }
        let index = blob.index;
        blobs.insert(index, blob);
        entry.last_source = source;

        let availability = Self::check_availability(
            &self.custody_context,
            &self.spec,
            entry,
            block_root,
        );
        self.maybe_emit_demand(entry, block_root);
        drop(entries);
        self.enforce_max_size();
        Ok(availability)
    }

    /// Ingest a gossip/RPC/engine/reconstructed data-column sidecar (Fulu only).
    pub fn ingest_data_column(
        &self,
        column: Arc<DataColumnSidecar<E>>,
        bytes: Option<Vec<u8>>,
        source: DataSource,
    ) -> Result<Availability<E>, AvailabilityCacheError> {
        let slot = column.slot();
        let fork_name = self.spec.fork_name_at_slot::<E>(slot);
        if !fork_name.fulu_enabled() {
            return Err(AvailabilityCacheError::WrongDataVariant { fork_name });
        }
        if column.index >= self.spec.number_of_columns {
            return Err(AvailabilityCacheError::InvalidColumnIndex {
                index: column.index,
            });
        }

        let block_root = column.block_root();

        // Spec IGNORE rule: one sidecar per (slot, proposer, index) triple.
        let triple = (slot, column.block_proposer_index(), column.index);
        if !self.observed_column_triples.write().insert(triple) {
            return Err(AvailabilityCacheError::GossipColumnAlreadyKnown {
                block_root,
                index: column.index,
            });
        }

        let mut entries = self.entries.write();
        let entry = self.entry_or_insert(&mut entries, block_root, slot);
        entry.parent_root.get_or_insert(column.block_parent_root());

        let columns = match entry
            .cached_data
            .get_or_insert_with(|| CachedData::Columns(HashMap::new()))
        {
            CachedData::Columns(columns) => columns,
            CachedData::Blobs(_) => {
                return Err(AvailabilityCacheError::WrongDataVariant { fork_name });
            }
        };

        if columns.contains_key(&column.index) {
            return Err(AvailabilityCacheError::GossipColumnAlreadyKnown {
                block_root,
                index: column.index,
            });
        }
        columns.insert(
            column.index,
            CachedColumn {
                sidecar: column,
                bytes,
            },
        );
        entry.last_source = source;

        let availability = Self::check_availability(
            &self.custody_context,
            &self.spec,
            entry,
            block_root,
        );
        self.maybe_emit_demand(entry, block_root);
        drop(entries);
        self.enforce_max_size();
        Ok(availability)
    }

    /// Attempt erasure-recovery of missing columns once at least half are present.
    ///
    /// Returns the recovered sidecars not previously cached, for re-publish on gossip.
    pub fn reconstruct_data_columns(
        &self,
        kzg: &Kzg,
        block_root: &Hash256,
    ) -> Result<DataColumnReconstructionResult<E>, AvailabilityCacheError> {
        let number_of_columns = self.spec.number_of_columns;
        // Snapshot the cached columns without holding the lock over the KZG work.
        let cached = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(block_root)
                .ok_or(AvailabilityCacheError::UnknownBlockRoot(*block_root))?;
            let cached = match &entry.cached_data {
                Some(CachedData::Columns(columns)) => columns
                    .values()
                    .map(|column| column.sidecar.clone())
                    .collect::<Vec<_>>(),
                _ => return Ok(DataColumnReconstructionResult::NotAttemptedLessThanHalf),
            };
            if cached.len() as u64 >= number_of_columns {
                return Ok(DataColumnReconstructionResult::NotAttemptedFull);
            }
            if (cached.len() as u64) < number_of_columns / 2 {
                return Ok(DataColumnReconstructionResult::NotAttemptedLessThanHalf);
            }
            if entry.reconstruction_started {
                return Ok(DataColumnReconstructionResult::NotAttemptedFull);
            }
            entry.reconstruction_started = true;
            cached
        };

        metrics::inc_counter(&metrics::KZG_DATA_COLUMN_RECONSTRUCTION_ATTEMPTS);
        let timer = metrics::start_timer(&metrics::DATA_AVAILABILITY_RECONSTRUCTION_TIME);

        let all_columns = match kzg_utils::reconstruct_data_columns(kzg, &cached, &self.spec) {
            Ok(columns) => columns,
            Err(e) => {
                tracing::error!(?block_root, error = ?e, "Error reconstructing data columns");
                metrics::inc_counter(&metrics::KZG_DATA_COLUMN_RECONSTRUCTION_FAILURES);
                if let Some(entry) = self.entries.write().get_mut(block_root) {
                    entry.reconstruction_started = false;
                }
                return Ok(DataColumnReconstructionResult::Failed);
            }
        };
        metrics::stop_timer(timer);

        // Re-check the cache so columns that raced in via gossip are not re-published.
        let Some(existing) = self.cached_data_column_indexes(block_root) else {
            return Err(AvailabilityCacheError::UnknownBlockRoot(*block_root));
        };
        let was_resolved = self
            .entries
            .read()
            .get(block_root)
            .is_some_and(|entry| entry.resolved);

        let mut recovered = Vec::new();
        for column in all_columns {
            if existing.contains(&column.index) {
                continue;
            }
            match self.ingest_data_column(column.clone(), None, DataSource::Reconstruction) {
                Ok(_) | Err(AvailabilityCacheError::GossipColumnAlreadyKnown { .. }) => {
                    recovered.push(column);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            count = recovered.len(),
            ?block_root,
            "Reconstructed columns"
        );
        metrics::inc_counter_by(
            &metrics::DATA_AVAILABILITY_RECONSTRUCTED_COLUMNS,
            recovered.len() as u64,
        );

        if was_resolved {
            Ok(DataColumnReconstructionResult::SuccessLate(recovered))
        } else {
            Ok(DataColumnReconstructionResult::SuccessResolved(recovered))
        }
    }

    /// Remove the entry for a successfully processed block along with every cached ancestor.
    pub fn prune(&self, block_root: &Hash256) {
        let mut entries = self.entries.write();
        let mut next = Some(*block_root);
        while let Some(root) = next {
            next = entries.remove(&root).and_then(|entry| entry.parent_root);
        }
    }

    /// Drop entries (and dedupe triples) from before the finalized epoch.
    pub fn prune_finalized(&self, finalized_epoch: Epoch) {
        self.entries
            .write()
            .retain(|_, entry| entry.epoch() >= finalized_epoch);
        let finalized_slot = finalized_epoch.start_slot(E::slots_per_epoch());
        self.observed_column_triples
            .write()
            .retain(|(slot, _, _)| *slot >= finalized_slot);
    }

    fn entry_or_insert<'a>(
        &self,
        entries: &'a mut HashMap<Hash256, CacheEntry<E>>,
        block_root: Hash256,
        slot: Slot,
    ) -> &'a mut CacheEntry<E> {
        entries.entry(block_root).or_insert_with(|| {
            let fork_name = self.spec.fork_name_at_slot::<E>(slot);
            let da_out_of_range = self.da_out_of_range(slot.epoch(E::slots_per_epoch()));
            CacheEntry::new(slot, fork_name, da_out_of_range)
        })
    }

    /// Whether `epoch` sits outside the data retention window: data for such blocks is not
    /// required for import and must not be awaited.
    fn da_out_of_range(&self, epoch: Epoch) -> bool {
        let Some(current_slot) = self.slot_clock.now() else {
            return false;
        };
        let current_epoch = current_slot.epoch(E::slots_per_epoch());
        let fork_name = self.spec.fork_name_at_epoch(epoch);
        let retention_epochs = if fork_name.fulu_enabled() {
            self.spec.min_epochs_for_data_column_sidecars_requests
        } else {
            self.spec.min_epochs_for_blob_sidecars_requests
        };
        epoch < current_epoch.saturating_sub(retention_epochs)
    }

    /// Resolve the entry if its view is complete. The promise pair fires exactly once, data
    /// before block input.
    fn check_availability(
        custody_context: &Arc<CustodyContext<E>>,
        spec: &ChainSpec,
        entry: &mut CacheEntry<E>,
        block_root: Hash256,
    ) -> Availability<E> {
        let Some(block) = entry.block.clone() else {
            return Availability::MissingComponents(block_root);
        };

        if entry.resolved {
            if let Some(input) = entry.block_input_tx.borrow().clone() {
                return Availability::Available(Box::new(input));
            }
        }

        let data_required = block.num_expected_blobs() > 0 && !entry.da_out_of_range;
        let data = if !data_required {
            AvailableBlockData::NoData
        } else {
            match &entry.cached_data {
                Some(CachedData::Blobs(blobs)) => {
                    if blobs.len() != block.num_expected_blobs() {
                        return Availability::MissingComponents(block_root);
                    }
                    let mut list = blobs.values().cloned().collect::<Vec<_>>();
                    list.sort_unstable_by_key(|blob| blob.index);
                    AvailableBlockData::Blobs {
                        blobs: list,
                        source: entry.last_source,
                    }
                }
                Some(CachedData::Columns(columns)) => {
                    let sampled = custody_context
                        .sampled_columns_at_epoch(entry.epoch(), spec)
                        .unwrap_or_default();
                    if !sampled.iter().all(|index| columns.contains_key(index)) {
                        return Availability::MissingComponents(block_root);
                    }
                    let mut list = columns.values().collect::<Vec<_>>();
                    list.sort_unstable_by_key(|column| column.sidecar.index);
                    let bytes = list
                        .iter()
                        .map(|column| column.bytes.clone())
                        .collect::<Option<Vec<_>>>();
                    AvailableBlockData::Columns {
                        columns: list.into_iter().map(|c| c.sidecar.clone()).collect(),
                        bytes,
                        source: entry.last_source,
                    }
                }
                None => return Availability::MissingComponents(block_root),
            }
        };

        let input = BlockInput::available(block, data.clone(), entry.fork_name, entry.da_out_of_range);
        entry.resolved = true;
        let _ = entry.availability_tx.send(Some(data));
        let _ = entry.block_input_tx.send(Some(input.clone()));
        Availability::Available(Box::new(input))
    }

    /// Emit a fetch demand the first time an entry is observed incomplete with its block
    /// present.
    fn maybe_emit_demand(&self, entry: &mut CacheEntry<E>, block_root: Hash256) {
        if entry.resolved || entry.demand_emitted {
            return;
        }
        let Some(block) = &entry.block else {
            return;
        };
        if block.num_expected_blobs() == 0 || entry.da_out_of_range {
            return;
        }
        let Some(tx) = self.demand_tx.read().clone() else {
            return;
        };

        let kind = if entry.fork_name.fulu_enabled() {
            let cached = entry.cached_column_indexes();
            let missing = self
                .custody_context
                .sampled_columns_at_epoch(entry.epoch(), &self.spec)
                .unwrap_or_default()
                .into_iter()
                .filter(|index| !cached.contains(index))
                .collect();
            AvailabilityDemandKind::Columns { missing }
        } else {
            let cached = entry.cached_blob_indexes();
            let missing = (0..block.num_expected_blobs() as u64)
                .filter(|index| !cached.contains(index))
                .collect();
            AvailabilityDemandKind::Blobs { missing }
        };

        entry.demand_emitted = true;
        let _ = tx.send(AvailabilityDemand {
            block_root,
            slot: entry.slot,
            kind,
        });
    }

    fn enforce_max_size(&self) {
        let mut entries = self.entries.write();
        while entries.len() > MAX_BLOCK_INPUT_CACHE_SIZE {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.slot)
                .map(|(root, _)| *root)
            else {
                break;
            };
            debug!(block_root = ?oldest, "Availability cache overflow, evicting oldest entry");
            entries.remove(&oldest);
        }
    }
}

/// Spawn the epoch-cadence maintenance task: prune entries behind finality and report the
/// cache size.
pub fn start_availability_cache_maintenance_service<E, S>(
    executor: TaskExecutor,
    cache: Arc<DataAvailabilityCache<E, S>>,
    fork_choice: SharedForkChoice,
) where
    E: EthSpec,
    S: SlotClock + 'static,
{
    executor.spawn(
        async move { availability_cache_maintenance_service(cache, fork_choice).await },
        "availability_cache_service",
    );
}

async fn availability_cache_maintenance_service<E, S>(
    cache: Arc<DataAvailabilityCache<E, S>>,
    fork_choice: SharedForkChoice,
) where
    E: EthSpec,
    S: SlotClock,
{
    loop {
        let Some(duration) = cache.slot_clock.duration_to_next_epoch(E::slots_per_epoch()) else {
            tracing::error!("Failed to read slot clock");
            // If we can't read the slot clock, just wait another slot.
            tokio::time::sleep(cache.slot_clock.slot_duration()).await;
            continue;
        };
        // Run a quarter of the way into the epoch, once finality has had a chance to move.
        let epoch_duration = cache.slot_clock.slot_duration() * E::slots_per_epoch() as u32;
        tokio::time::sleep(duration + epoch_duration / 4).await;

        let finalized_epoch = fork_choice.read().finalized_checkpoint().epoch;
        debug!(%finalized_epoch, "Availability cache maintenance firing");
        cache.prune_finalized(finalized_epoch);
        metrics::set_gauge(&metrics::DATA_AVAILABILITY_CACHE_SIZE, cache.len() as i64);
    }
}
