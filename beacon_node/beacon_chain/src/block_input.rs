use std::sync::Arc;
use types::{
    BlobSidecarList, DataColumnSidecarList, EthSpec, ForkName, Hash256, SignedBeaconBlock, Slot,
};

/// Where a block component was obtained from. Carried through to the chain processor for
/// metrics and for source-dependent matching rules during range sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Gossip,
    Rpc,
    Engine,
    Reconstruction,
}

/// The sidecar data that makes a block available.
#[derive(Debug, Clone)]
pub enum AvailableBlockData<E: EthSpec> {
    /// Block is pre-Deneb, has zero blobs, or sits outside the DA retention window.
    NoData,
    /// Block is post-Deneb, pre-PeerDAS and has more than zero blobs.
    Blobs {
        blobs: BlobSidecarList<E>,
        source: DataSource,
    },
    /// Block is post-PeerDAS and has more than zero blobs. `bytes` carries the wire encoding
    /// of each column when it was received over the network, for cheap re-publish.
    Columns {
        columns: DataColumnSidecarList<E>,
        bytes: Option<Vec<Vec<u8>>>,
        source: DataSource,
    },
}

impl<E: EthSpec> AvailableBlockData<E> {
    pub fn source(&self) -> Option<DataSource> {
        match self {
            AvailableBlockData::NoData => None,
            AvailableBlockData::Blobs { source, .. } => Some(*source),
            AvailableBlockData::Columns { source, .. } => Some(*source),
        }
    }
}

/// Context shared by every block-input variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInputMeta {
    pub block_root: Hash256,
    /// Known once the block or any sidecar header has been seen.
    pub parent_root: Option<Hash256>,
    pub slot: Slot,
    pub fork_name: ForkName,
    /// True when the block sits outside the data-availability retention window: data is not
    /// required and must not be awaited.
    pub da_out_of_range: bool,
}

/// The assembly state of a block input.
#[derive(Debug, Clone)]
pub enum BlockInputState<E: EthSpec> {
    /// A block from before the data-availability fork: no sidecar requirement exists.
    PreData { block: Arc<SignedBeaconBlock<E>> },
    /// The availability view is incomplete: the block, some data, or both are missing.
    AwaitingData {
        block: Option<Arc<SignedBeaconBlock<E>>>,
    },
    /// The block and all required data are present.
    Available {
        block: Arc<SignedBeaconBlock<E>>,
        data: AvailableBlockData<E>,
    },
}

/// A block's availability view, handed across the boundary between the availability cache,
/// range sync and the chain processor.
///
/// The state transition is monotonic: `AwaitingData` may move to `Available`, never backward.
#[derive(Debug, Clone)]
pub struct BlockInput<E: EthSpec> {
    meta: BlockInputMeta,
    state: BlockInputState<E>,
}

impl<E: EthSpec> BlockInput<E> {
    pub fn new(meta: BlockInputMeta, state: BlockInputState<E>) -> Self {
        Self { meta, state }
    }

    pub fn pre_data(block: Arc<SignedBeaconBlock<E>>, fork_name: ForkName) -> Self {
        Self {
            meta: BlockInputMeta {
                block_root: block.canonical_root(),
                parent_root: Some(block.parent_root()),
                slot: block.slot(),
                fork_name,
                da_out_of_range: false,
            },
            state: BlockInputState::PreData { block },
        }
    }

    pub fn available(
        block: Arc<SignedBeaconBlock<E>>,
        data: AvailableBlockData<E>,
        fork_name: ForkName,
        da_out_of_range: bool,
    ) -> Self {
        Self {
            meta: BlockInputMeta {
                block_root: block.canonical_root(),
                parent_root: Some(block.parent_root()),
                slot: block.slot(),
                fork_name,
                da_out_of_range,
            },
            state: BlockInputState::Available { block, data },
        }
    }

    pub fn awaiting_data(meta: BlockInputMeta, block: Option<Arc<SignedBeaconBlock<E>>>) -> Self {
        Self {
            meta,
            state: BlockInputState::AwaitingData { block },
        }
    }

    pub fn meta(&self) -> &BlockInputMeta {
        &self.meta
    }

    pub fn block_root(&self) -> Hash256 {
        self.meta.block_root
    }

    pub fn parent_root(&self) -> Option<Hash256> {
        self.meta.parent_root
    }

    pub fn slot(&self) -> Slot {
        self.meta.slot
    }

    pub fn fork_name(&self) -> ForkName {
        self.meta.fork_name
    }

    pub fn da_out_of_range(&self) -> bool {
        self.meta.da_out_of_range
    }

    pub fn state(&self) -> &BlockInputState<E> {
        &self.state
    }

    pub fn block(&self) -> Option<&Arc<SignedBeaconBlock<E>>> {
        match &self.state {
            BlockInputState::PreData { block } => Some(block),
            BlockInputState::AwaitingData { block } => block.as_ref(),
            BlockInputState::Available { block, .. } => Some(block),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(
            self.state,
            BlockInputState::PreData { .. } | BlockInputState::Available { .. }
        )
    }

    /// The data of an `Available` input.
    pub fn data(&self) -> Option<&AvailableBlockData<E>> {
        match &self.state {
            BlockInputState::Available { data, .. } => Some(data),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use types::{BeaconBlock, MainnetEthSpec};

    type E = MainnetEthSpec;

    #[test]
    fn awaiting_data_carries_root_without_block() {
        let root = Hash256::repeat_byte(9);
        let meta = BlockInputMeta {
            block_root: root,
            parent_root: None,
            slot: Slot::new(4),
            fork_name: ForkName::Fulu,
            da_out_of_range: false,
        };
        let input = BlockInput::<E>::awaiting_data(meta, None);
        assert!(!input.is_available());
        assert_eq!(input.block_root(), root);
        assert!(input.block().is_none());
    }

    #[test]
    fn pre_data_is_available() {
        let block = Arc::new(SignedBeaconBlock::from_block(
            BeaconBlock::<E>::empty(),
            Signature::empty(),
        ));
        let input = BlockInput::pre_data(block, ForkName::Capella);
        assert!(input.is_available());
        assert!(input.data().is_none());
        assert!(!input.da_out_of_range());
    }
}
