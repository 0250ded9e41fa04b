use crate::ChainSpec;
use serde::{Deserialize, Serialize};
use ssz_types::typenum::{
    U4, U8, U32, U64, U128, U2048, U4096, U8192, U131072, Unsigned,
};
use std::fmt::{self, Debug};
use std::str::FromStr;

const MAINNET: &str = "mainnet";
const MINIMAL: &str = "minimal";

#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum EthSpecId {
    #[serde(rename = "mainnet")]
    Mainnet,
    #[serde(rename = "minimal")]
    Minimal,
}

impl FromStr for EthSpecId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MAINNET => Ok(EthSpecId::Mainnet),
            MINIMAL => Ok(EthSpecId::Minimal),
            _ => Err(format!("Unknown eth spec: {}", s)),
        }
    }
}

impl fmt::Display for EthSpecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EthSpecId::Mainnet => MAINNET,
            EthSpecId::Minimal => MINIMAL,
        };
        write!(f, "{}", s)
    }
}

/// Compile-time preset parameters, encoded as typenums so that SSZ containers carry their
/// bounds in the type system.
pub trait EthSpec:
    'static + Default + Sync + Send + Clone + Debug + PartialEq + Eq + std::hash::Hash
{
    /// The number of slots per epoch.
    type SlotsPerEpoch: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The maximum number of validators in a single committee.
    type MaxValidatorsPerCommittee: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The maximum number of committees at a single slot.
    type MaxCommitteesPerSlot: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The maximum number of attesting validators at a single slot (Electra aggregates).
    type MaxValidatorsPerSlot: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The maximum number of KZG commitments in a block body.
    type MaxBlobCommitmentsPerBlock: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The number of bytes in a single blob.
    type BytesPerBlob: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The number of bytes in a single cell of the extended blob matrix.
    type BytesPerCell: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The number of data columns in the extended blob matrix.
    type NumberOfColumns: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The depth of the merkle branch proving inclusion of `blob_kzg_commitments` in the body.
    type KzgCommitmentsInclusionProofDepth: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The length of the attestation subnet bitfield carried in the ENR and metadata.
    type SubnetBitfieldLength: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;
    /// The number of sync committee subnets.
    type SyncCommitteeSubnetCount: Unsigned + Clone + Sync + Send + Debug + PartialEq + Eq;

    fn default_spec() -> ChainSpec;

    fn spec_name() -> EthSpecId;

    /// Returns the `SLOTS_PER_EPOCH` constant for this specification.
    fn slots_per_epoch() -> u64 {
        Self::SlotsPerEpoch::to_u64()
    }

    /// Returns the `MAX_VALIDATORS_PER_COMMITTEE` constant for this specification.
    fn max_validators_per_committee() -> usize {
        Self::MaxValidatorsPerCommittee::to_usize()
    }

    /// Returns the `MAX_COMMITTEES_PER_SLOT` constant for this specification.
    fn max_committees_per_slot() -> usize {
        Self::MaxCommitteesPerSlot::to_usize()
    }

    fn max_blob_commitments_per_block() -> usize {
        Self::MaxBlobCommitmentsPerBlock::to_usize()
    }

    fn bytes_per_blob() -> usize {
        Self::BytesPerBlob::to_usize()
    }

    fn bytes_per_cell() -> usize {
        Self::BytesPerCell::to_usize()
    }

    fn number_of_columns() -> usize {
        Self::NumberOfColumns::to_usize()
    }

    fn kzg_commitments_inclusion_proof_depth() -> usize {
        Self::KzgCommitmentsInclusionProofDepth::to_usize()
    }
}

/// Ethereum Foundation specifications.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, Hash)]
pub struct MainnetEthSpec;

impl EthSpec for MainnetEthSpec {
    type SlotsPerEpoch = U32;
    type MaxValidatorsPerCommittee = U2048;
    type MaxCommitteesPerSlot = U64;
    type MaxValidatorsPerSlot = U131072;
    type MaxBlobCommitmentsPerBlock = U4096;
    type BytesPerBlob = U131072;
    type BytesPerCell = U2048;
    type NumberOfColumns = U128;
    type KzgCommitmentsInclusionProofDepth = U4;
    type SubnetBitfieldLength = U64;
    type SyncCommitteeSubnetCount = U4;

    fn default_spec() -> ChainSpec {
        ChainSpec::mainnet()
    }

    fn spec_name() -> EthSpecId {
        EthSpecId::Mainnet
    }
}

/// Ethereum Foundation minimal spec, as defined in the eth2.0-specs repo.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize, Hash)]
pub struct MinimalEthSpec;

impl EthSpec for MinimalEthSpec {
    type SlotsPerEpoch = U8;
    type MaxValidatorsPerCommittee = U2048;
    type MaxCommitteesPerSlot = U4;
    type MaxValidatorsPerSlot = U8192;
    type MaxBlobCommitmentsPerBlock = U32;
    type BytesPerBlob = U131072;
    type BytesPerCell = U2048;
    type NumberOfColumns = U128;
    type KzgCommitmentsInclusionProofDepth = U4;
    type SubnetBitfieldLength = U64;
    type SyncCommitteeSubnetCount = U4;

    fn default_spec() -> ChainSpec {
        ChainSpec::minimal()
    }

    fn spec_name() -> EthSpecId {
        EthSpecId::Minimal
    }
}
