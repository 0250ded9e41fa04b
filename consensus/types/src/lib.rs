//! Types for the Ethereum consensus layer, scoped to the operational core of the beacon node:
//! attestations and their aggregation bitfields, blocks as the availability machinery sees them,
//! blob and data-column sidecars, and the PeerDAS custody derivation.

pub mod consts;

mod attestation;
mod attestation_data;
mod beacon_block;
mod beacon_block_body;
mod beacon_block_header;
mod beacon_state;
mod blob_sidecar;
mod chain_spec;
mod checkpoint;
pub mod data_column_custody_group;
mod data_column_sidecar;
mod data_column_subnet_id;
mod eth_spec;
mod fork_name;
pub mod merkle_proof;
mod participation_flags;
mod slot_epoch;
mod subnet_id;

pub use crate::attestation::{
    Attestation, AttestationBase, AttestationElectra, AttestationRef,
    Error as AttestationError,
};
pub use crate::attestation_data::AttestationData;
pub use crate::beacon_block::{BeaconBlock, SignedBeaconBlock};
pub use crate::beacon_block_body::{
    BLOB_KZG_COMMITMENTS_INDEX, BeaconBlockBody, KzgCommitments,
};
pub use crate::beacon_block_header::{BeaconBlockHeader, SignedBeaconBlockHeader};
pub use crate::beacon_state::{BeaconState, BeaconStateError};
pub use crate::blob_sidecar::{
    Blob, BlobIdentifier, BlobSidecar, BlobSidecarError, BlobSidecarList, FixedBlobSidecarList,
    KzgProofs,
};
pub use crate::chain_spec::ChainSpec;
pub use crate::checkpoint::Checkpoint;
pub use crate::data_column_custody_group::{
    CustodyIndex, DataColumnCustodyGroupError, compute_columns_for_custody_group,
    compute_subnet_for_data_column_sidecar, get_custody_groups,
};
pub use crate::data_column_sidecar::{
    Cell, ColumnIndex, DataColumn, DataColumnIdentifier, DataColumnSidecar,
    DataColumnSidecarError, DataColumnSidecarList, DataColumnsByRootIdentifier,
};
pub use crate::data_column_subnet_id::DataColumnSubnetId;
pub use crate::eth_spec::{EthSpec, EthSpecId, MainnetEthSpec, MinimalEthSpec};
pub use crate::fork_name::ForkName;
pub use crate::participation_flags::ParticipationFlags;
pub use crate::slot_epoch::{Epoch, Slot};
pub use crate::subnet_id::SubnetId;

pub use bls::{AggregateSignature, Signature};
pub use fixed_bytes::{FixedBytesExtended, Hash256, Uint256};
pub use kzg::{KzgCommitment, KzgProof};
pub use ssz_types::{BitList, BitVector, Error as SszTypesError, FixedVector, VariableList, typenum};

pub type CommitteeIndex = u64;
pub type ValidatorIndex = u64;
