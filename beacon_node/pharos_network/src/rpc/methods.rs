//! The wire types of the ReqResp protocol: Status, Ping, Goodbye, Metadata and the
//! block/sidecar request messages.

use ssz_derive::{Decode, Encode};
use ssz_types::BitVector;
use std::fmt;
use std::fmt::Display;
use types::{
    BlobIdentifier, ChainSpec, ColumnIndex, DataColumnsByRootIdentifier, Epoch, EthSpec, ForkName,
    Hash256, Slot,
};

pub type EnrAttestationBitfield<E> = BitVector<<E as EthSpec>::SubnetBitfieldLength>;
pub type EnrSyncCommitteeBitfield<E> = BitVector<<E as EthSpec>::SyncCommitteeSubnetCount>;

/// The STATUS request/response handshake, V1.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct StatusMessageV1 {
    pub fork_digest: [u8; 4],
    pub finalized_root: Hash256,
    pub finalized_epoch: Epoch,
    pub head_root: Hash256,
    pub head_slot: Slot,
}

/// The STATUS request/response handshake, V2: adds the earliest slot the node can serve.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct StatusMessageV2 {
    pub fork_digest: [u8; 4],
    pub finalized_root: Hash256,
    pub finalized_epoch: Epoch,
    pub head_root: Hash256,
    pub head_slot: Slot,
    pub earliest_available_slot: Slot,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StatusMessage {
    V1(StatusMessageV1),
    V2(StatusMessageV2),
}

impl StatusMessage {
    pub fn fork_digest(&self) -> [u8; 4] {
        match self {
            StatusMessage::V1(msg) => msg.fork_digest,
            StatusMessage::V2(msg) => msg.fork_digest,
        }
    }

    pub fn finalized_root(&self) -> Hash256 {
        match self {
            StatusMessage::V1(msg) => msg.finalized_root,
            StatusMessage::V2(msg) => msg.finalized_root,
        }
    }

    pub fn finalized_epoch(&self) -> Epoch {
        match self {
            StatusMessage::V1(msg) => msg.finalized_epoch,
            StatusMessage::V2(msg) => msg.finalized_epoch,
        }
    }

    pub fn head_root(&self) -> Hash256 {
        match self {
            StatusMessage::V1(msg) => msg.head_root,
            StatusMessage::V2(msg) => msg.head_root,
        }
    }

    pub fn head_slot(&self) -> Slot {
        match self {
            StatusMessage::V1(msg) => msg.head_slot,
            StatusMessage::V2(msg) => msg.head_slot,
        }
    }

    pub fn earliest_available_slot(&self) -> Option<Slot> {
        match self {
            StatusMessage::V1(_) => None,
            StatusMessage::V2(msg) => Some(msg.earliest_available_slot),
        }
    }
}

/// The PING request/response message.
#[derive(Encode, Decode, Clone, Copy, Debug, PartialEq)]
pub struct Ping {
    /// The metadata sequence number.
    pub data: u64,
}

/// The reason given for a `Goodbye` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GoodbyeReason {
    ClientShutdown,
    IrrelevantNetwork,
    Fault,
    TooManyPeers,
    BadScore,
    Banned,
    /// The local node disconnected an inbound peer to make room for outbound dials.
    InboundDisconnect,
    Unknown(u64),
}

impl From<u64> for GoodbyeReason {
    fn from(id: u64) -> GoodbyeReason {
        match id {
            1 => GoodbyeReason::ClientShutdown,
            2 => GoodbyeReason::IrrelevantNetwork,
            3 => GoodbyeReason::Fault,
            129 => GoodbyeReason::TooManyPeers,
            250 => GoodbyeReason::BadScore,
            251 => GoodbyeReason::Banned,
            252 => GoodbyeReason::InboundDisconnect,
            other => GoodbyeReason::Unknown(other),
        }
    }
}

impl From<GoodbyeReason> for u64 {
    fn from(reason: GoodbyeReason) -> u64 {
        match reason {
            GoodbyeReason::ClientShutdown => 1,
            GoodbyeReason::IrrelevantNetwork => 2,
            GoodbyeReason::Fault => 3,
            GoodbyeReason::TooManyPeers => 129,
            GoodbyeReason::BadScore => 250,
            GoodbyeReason::Banned => 251,
            GoodbyeReason::InboundDisconnect => 252,
            GoodbyeReason::Unknown(id) => id,
        }
    }
}

impl ssz::Encode for GoodbyeReason {
    fn is_ssz_fixed_len() -> bool {
        <u64 as ssz::Encode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <u64 as ssz::Encode>::ssz_fixed_len()
    }

    fn ssz_bytes_len(&self) -> usize {
        0_u64.ssz_bytes_len()
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        let conv: u64 = (*self).into();
        conv.ssz_append(buf)
    }
}

impl ssz::Decode for GoodbyeReason {
    fn is_ssz_fixed_len() -> bool {
        <u64 as ssz::Decode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <u64 as ssz::Decode>::ssz_fixed_len()
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
        u64::from_ssz_bytes(bytes).map(|n| n.into())
    }
}

impl Display for GoodbyeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoodbyeReason::ClientShutdown => write!(f, "Client Shutdown"),
            GoodbyeReason::IrrelevantNetwork => write!(f, "Irrelevant Network"),
            GoodbyeReason::Fault => write!(f, "Fault"),
            GoodbyeReason::TooManyPeers => write!(f, "Too Many Peers"),
            GoodbyeReason::BadScore => write!(f, "Bad Score"),
            GoodbyeReason::Banned => write!(f, "Banned"),
            GoodbyeReason::InboundDisconnect => write!(f, "Inbound Disconnect"),
            GoodbyeReason::Unknown(id) => write!(f, "Unknown Reason ({id})"),
        }
    }
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct MetaDataV1<E: EthSpec> {
    pub seq_number: u64,
    pub attnets: EnrAttestationBitfield<E>,
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct MetaDataV2<E: EthSpec> {
    pub seq_number: u64,
    pub attnets: EnrAttestationBitfield<E>,
    pub syncnets: EnrSyncCommitteeBitfield<E>,
}

#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct MetaDataV3<E: EthSpec> {
    pub seq_number: u64,
    pub attnets: EnrAttestationBitfield<E>,
    pub syncnets: EnrSyncCommitteeBitfield<E>,
    pub custody_group_count: u64,
}

/// The METADATA response, at whichever protocol version the peer speaks.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaData<E: EthSpec> {
    V1(MetaDataV1<E>),
    V2(MetaDataV2<E>),
    V3(MetaDataV3<E>),
}

impl<E: EthSpec> MetaData<E> {
    pub fn seq_number(&self) -> u64 {
        match self {
            MetaData::V1(md) => md.seq_number,
            MetaData::V2(md) => md.seq_number,
            MetaData::V3(md) => md.seq_number,
        }
    }

    pub fn attnets(&self) -> &EnrAttestationBitfield<E> {
        match self {
            MetaData::V1(md) => &md.attnets,
            MetaData::V2(md) => &md.attnets,
            MetaData::V3(md) => &md.attnets,
        }
    }

    pub fn syncnets(&self) -> Option<&EnrSyncCommitteeBitfield<E>> {
        match self {
            MetaData::V1(_) => None,
            MetaData::V2(md) => Some(&md.syncnets),
            MetaData::V3(md) => Some(&md.syncnets),
        }
    }

    pub fn custody_group_count(&self) -> Option<u64> {
        match self {
            MetaData::V1(_) | MetaData::V2(_) => None,
            MetaData::V3(md) => Some(md.custody_group_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestValidationError {
    ZeroCount,
    StartSlotBeforeGenesis { start_slot: Slot, genesis_slot: Slot },
}

/// Request a number of beacon blocks starting at a slot.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct BlocksByRangeRequest {
    pub start_slot: u64,
    pub count: u64,
}

impl BlocksByRangeRequest {
    /// Validate the request per the wire contract and clamp `count` to the fork's maximum.
    pub fn validate_and_clamp(
        &mut self,
        fork_name: ForkName,
        spec: &ChainSpec,
    ) -> Result<(), RequestValidationError> {
        if self.count == 0 {
            return Err(RequestValidationError::ZeroCount);
        }
        if Slot::new(self.start_slot) < spec.genesis_slot {
            return Err(RequestValidationError::StartSlotBeforeGenesis {
                start_slot: Slot::new(self.start_slot),
                genesis_slot: spec.genesis_slot,
            });
        }
        self.count = self.count.min(spec.max_request_blocks(fork_name));
        Ok(())
    }
}

/// Request a number of blob sidecars covering a slot range.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct BlobsByRangeRequest {
    pub start_slot: u64,
    pub count: u64,
}

impl BlobsByRangeRequest {
    pub fn max_blobs_requested(&self, epoch: Epoch, spec: &ChainSpec) -> u64 {
        self.count.saturating_mul(spec.max_blobs_per_block(epoch))
    }
}

/// Request a set of columns of data column sidecars covering a slot range.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct DataColumnsByRangeRequest {
    pub start_slot: u64,
    pub count: u64,
    pub columns: Vec<ColumnIndex>,
}

impl DataColumnsByRangeRequest {
    pub fn max_requested(&self) -> u64 {
        self.count.saturating_mul(self.columns.len() as u64)
    }
}

/// Request blocks by their roots.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct BlocksByRootRequest {
    pub block_roots: Vec<Hash256>,
}

/// Request blob sidecars by `(block_root, index)`.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct BlobsByRootRequest {
    pub blob_ids: Vec<BlobIdentifier>,
}

/// Request data column sidecars by block root and column set.
#[derive(Encode, Decode, Clone, Debug, PartialEq)]
pub struct DataColumnsByRootRequest<E: EthSpec> {
    pub data_column_ids: Vec<DataColumnsByRootIdentifier<E>>,
}

/// The oldest epoch a `DataColumnSidecarsByRoot` server must answer for; blocks older than
/// this may be omitted from responses.
pub fn minimum_columns_by_root_epoch(
    finalized_epoch: Epoch,
    current_epoch: Epoch,
    spec: &ChainSpec,
) -> Epoch {
    let retention_floor =
        current_epoch.saturating_sub(spec.min_epochs_for_data_column_sidecars_requests);
    let fulu_epoch = spec.fulu_fork_epoch.unwrap_or(current_epoch);
    std::cmp::max(std::cmp::max(finalized_epoch, retention_floor), fulu_epoch)
}
