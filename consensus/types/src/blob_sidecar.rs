use crate::beacon_block_body::BLOB_KZG_COMMITMENTS_INDEX;
use crate::merkle_proof::verify_merkle_proof;
use crate::{
    BeaconStateError, Epoch, EthSpec, Hash256, SignedBeaconBlock, SignedBeaconBlockHeader, Slot,
};
use derivative::Derivative;
use kzg::{KzgCommitment, KzgProof};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{FixedVector, VariableList};
use std::sync::Arc;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// The raw bytes of a blob, one field element per 32 bytes.
pub type Blob<E> = FixedVector<u8, <E as EthSpec>::BytesPerBlob>;
pub type KzgProofs<E> = VariableList<KzgProof, <E as EthSpec>::MaxBlobCommitmentsPerBlock>;

/// A list of blob sidecars for a single block, ordered by `index`.
pub type BlobSidecarList<E> = Vec<Arc<BlobSidecar<E>>>;

/// Index-addressable blob slots for a single block; `None` marks a missing index.
pub type FixedBlobSidecarList<E> = Vec<Option<Arc<BlobSidecar<E>>>>;

/// Identifies a blob sidecar by `(block_root, index)`, the key used by `BlobSidecarsByRoot`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash,
)]
pub struct BlobIdentifier {
    pub block_root: Hash256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
}

#[derive(Debug)]
pub enum BlobSidecarError {
    PreDeneb,
    MissingKzgCommitment,
    BeaconState(BeaconStateError),
    IndexOutOfBounds { index: u64, commitments: usize },
}

/// A KZG-committed shard of blob data gossiped alongside its block in Deneb/Electra.
#[derive(
    Debug, Clone, Serialize, Deserialize, Encode, Decode, TreeHash, Derivative,
)]
#[serde(bound = "E: EthSpec")]
#[derivative(PartialEq, Eq, Hash(bound = "E: EthSpec"))]
pub struct BlobSidecar<E: EthSpec> {
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,
    #[serde(with = "ssz_types::serde_utils::hex_fixed_vec")]
    pub blob: Blob<E>,
    pub kzg_commitment: KzgCommitment,
    pub kzg_proof: KzgProof,
    pub signed_block_header: SignedBeaconBlockHeader,
    /// Merkle branch proving the inclusion of `blob_kzg_commitments` in the block body.
    pub kzg_commitments_inclusion_proof:
        FixedVector<Hash256, E::KzgCommitmentsInclusionProofDepth>,
}

impl<E: EthSpec> BlobSidecar<E> {
    /// Build a sidecar from a blob fetched outside gossip (e.g. the execution engine's blob
    /// pool), re-using the proof computed from the block.
    pub fn new_with_existing_proof(
        index: usize,
        blob: Blob<E>,
        block: &SignedBeaconBlock<E>,
        signed_block_header: SignedBeaconBlockHeader,
        kzg_commitments_inclusion_proof: &FixedVector<
            Hash256,
            E::KzgCommitmentsInclusionProofDepth,
        >,
        kzg_proof: KzgProof,
    ) -> Result<Self, BlobSidecarError> {
        let kzg_commitment = *block
            .kzg_commitments()
            .get(index)
            .ok_or(BlobSidecarError::IndexOutOfBounds {
                index: index as u64,
                commitments: block.num_expected_blobs(),
            })?;

        Ok(Self {
            index: index as u64,
            blob,
            kzg_commitment,
            kzg_proof,
            signed_block_header,
            kzg_commitments_inclusion_proof: kzg_commitments_inclusion_proof.clone(),
        })
    }

    pub fn id(&self) -> BlobIdentifier {
        BlobIdentifier {
            block_root: self.block_root(),
            index: self.index,
        }
    }

    pub fn slot(&self) -> Slot {
        self.signed_block_header.message.slot
    }

    pub fn epoch(&self) -> Epoch {
        self.slot().epoch(E::slots_per_epoch())
    }

    pub fn block_root(&self) -> Hash256 {
        self.signed_block_header.message.tree_hash_root()
    }

    pub fn block_parent_root(&self) -> Hash256 {
        self.signed_block_header.message.parent_root
    }

    pub fn block_proposer_index(&self) -> u64 {
        self.signed_block_header.message.proposer_index
    }

    /// Verifies the commitment-list inclusion merkle proof against the header's `body_root`.
    pub fn verify_blob_sidecar_inclusion_proof(&self, commitments_root: Hash256) -> bool {
        verify_merkle_proof(
            commitments_root,
            &self.kzg_commitments_inclusion_proof,
            E::kzg_commitments_inclusion_proof_depth(),
            BLOB_KZG_COMMITMENTS_INDEX,
            self.signed_block_header.message.body_root,
        )
    }
}
