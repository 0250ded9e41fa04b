use crate::beacon_block_body::{BLOB_KZG_COMMITMENTS_INDEX, BeaconBlockBody};
use crate::{BeaconBlockHeader, EthSpec, Hash256, SignedBeaconBlockHeader, Slot};
use crate::{Epoch, merkle_proof::merkle_proof_for_leaf};
use bls::Signature;
use kzg::KzgCommitment;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::FixedVector;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

/// A block of the beacon chain, reduced to the fields the operational core consumes: slot and
/// roots for chain placement, the proposer for deduplication triples, and the body's KZG
/// commitments for data-availability accounting.
///
/// The remaining body fields are opaque to this repo (the state-transition function is an
/// external collaborator) and are summarised by their subtree roots so that `body_root` and the
/// commitment inclusion proof stay verifiable.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, TreeHash, Default,
)]
#[serde(bound = "E: EthSpec")]
pub struct BeaconBlock<E: EthSpec> {
    pub slot: Slot,
    #[serde(with = "serde_utils::quoted_u64")]
    pub proposer_index: u64,
    pub parent_root: Hash256,
    pub state_root: Hash256,
    pub body: BeaconBlockBody<E>,
}

impl<E: EthSpec> BeaconBlock<E> {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> Epoch {
        self.slot.epoch(E::slots_per_epoch())
    }

    pub fn body(&self) -> &BeaconBlockBody<E> {
        &self.body
    }

    /// Returns the `tree_hash_root` of the block: the block root.
    pub fn canonical_root(&self) -> Hash256 {
        self.tree_hash_root()
    }

    /// Returns a full `BeaconBlockHeader` of this block.
    pub fn block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }
}

/// A `BeaconBlock` and the proposer signature over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "E: EthSpec")]
pub struct SignedBeaconBlock<E: EthSpec> {
    pub message: BeaconBlock<E>,
    pub signature: Signature,
}

impl<E: EthSpec> SignedBeaconBlock<E> {
    pub fn from_block(block: BeaconBlock<E>, signature: Signature) -> Self {
        Self {
            message: block,
            signature,
        }
    }

    pub fn message(&self) -> &BeaconBlock<E> {
        &self.message
    }

    pub fn slot(&self) -> Slot {
        self.message.slot
    }

    pub fn epoch(&self) -> Epoch {
        self.message.epoch()
    }

    pub fn parent_root(&self) -> Hash256 {
        self.message.parent_root
    }

    pub fn state_root(&self) -> Hash256 {
        self.message.state_root
    }

    /// Returns the `tree_hash_root` of the block.
    pub fn canonical_root(&self) -> Hash256 {
        self.message.canonical_root()
    }

    /// The number of blobs this block commits to.
    pub fn num_expected_blobs(&self) -> usize {
        self.message.body.blob_kzg_commitments.len()
    }

    pub fn kzg_commitments(&self) -> &[KzgCommitment] {
        &self.message.body.blob_kzg_commitments
    }

    /// Produce a signed beacon block header corresponding to this block.
    pub fn signed_block_header(&self) -> SignedBeaconBlockHeader {
        SignedBeaconBlockHeader {
            message: self.message.block_header(),
            signature: self.signature.clone(),
        }
    }

    /// Returns the signed block header alongside the merkle branch proving the inclusion of
    /// `blob_kzg_commitments` in the block body. Used when building sidecars locally.
    pub fn signed_block_header_and_kzg_commitments_proof(
        &self,
    ) -> (
        SignedBeaconBlockHeader,
        FixedVector<Hash256, E::KzgCommitmentsInclusionProofDepth>,
    ) {
        let leaves = self.message.body.merkle_leaves();
        let proof = merkle_proof_for_leaf(&leaves, BLOB_KZG_COMMITMENTS_INDEX);
        (
            self.signed_block_header(),
            FixedVector::from(proof),
        )
    }
}
