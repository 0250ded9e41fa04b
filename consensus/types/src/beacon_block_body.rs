use crate::merkle_proof::merkleize_leaves;
use crate::{EthSpec, Hash256};
use kzg::KzgCommitment;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{FixedVector, VariableList, typenum::U11};
use tree_hash::TreeHash;

/// The index of the `blob_kzg_commitments` leaf in the block-body merkle tree (12 fields since
/// Deneb, padded to 16 leaves).
pub const BLOB_KZG_COMMITMENTS_INDEX: usize = 11;

/// The number of body fields preceding `blob_kzg_commitments`.
pub const OPAQUE_BODY_FIELDS: usize = BLOB_KZG_COMMITMENTS_INDEX;

/// The number of leaves the body merkleizes over (next power of two above 12 fields).
const BODY_MERKLE_LEAVES: usize = 16;

pub type KzgCommitments<E> =
    VariableList<KzgCommitment, <E as EthSpec>::MaxBlobCommitmentsPerBlock>;

/// The body of a `BeaconBlock`, as seen by the operational core.
///
/// The eleven body fields before `blob_kzg_commitments` (randao reveal, eth1 data, operations,
/// sync aggregate, execution payload, ...) belong to the state-transition function and are
/// carried here as their subtree roots only. This keeps `body_root` and the commitment
/// inclusion proof identical to the full container's.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode, Default,
)]
#[serde(bound = "E: EthSpec")]
pub struct BeaconBlockBody<E: EthSpec> {
    /// Subtree roots of the body fields this crate does not interpret, in field order.
    pub opaque_field_roots: FixedVector<Hash256, U11>,
    pub blob_kzg_commitments: KzgCommitments<E>,
}

impl<E: EthSpec> BeaconBlockBody<E> {
    /// The padded leaf layer the body merkleizes over.
    pub fn merkle_leaves(&self) -> Vec<Hash256> {
        let mut leaves = Vec::with_capacity(BODY_MERKLE_LEAVES);
        leaves.extend(self.opaque_field_roots.iter().copied());
        leaves.push(self.blob_kzg_commitments.tree_hash_root());
        leaves.resize(BODY_MERKLE_LEAVES, Hash256::ZERO);
        leaves
    }
}

impl<E: EthSpec> TreeHash for BeaconBlockBody<E> {
    fn tree_hash_type() -> tree_hash::TreeHashType {
        tree_hash::TreeHashType::Container
    }

    fn tree_hash_packed_encoding(&self) -> tree_hash::PackedEncoding {
        unreachable!("Container should never be packed.")
    }

    fn tree_hash_packing_factor() -> usize {
        unreachable!("Container should never be packed.")
    }

    fn tree_hash_root(&self) -> Hash256 {
        merkleize_leaves(&self.merkle_leaves())
    }
}
