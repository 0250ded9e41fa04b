mod kzg_commitment;
mod kzg_proof;

pub use crate::kzg_commitment::{KzgCommitment, VERSIONED_HASH_VERSION_KZG};
pub use crate::kzg_proof::KzgProof;
pub use c_kzg::{
    BYTES_PER_BLOB, BYTES_PER_COMMITMENT, BYTES_PER_FIELD_ELEMENT, BYTES_PER_PROOF, Blob, Bytes32,
    Bytes48, FIELD_ELEMENTS_PER_BLOB,
};
pub use rust_eth_kzg::{
    Cell, CellIndex, CellRef, TrustedSetup as PeerDASTrustedSetup,
    constants::{BYTES_PER_CELL, CELLS_PER_EXT_BLOB},
};

use rust_eth_kzg::DASContext;

#[derive(Debug)]
pub enum Error {
    /// An error from the c-kzg library.
    Kzg(c_kzg::Error),
    /// A cell-level error from the rust_eth_kzg library.
    PeerDASKZG(rust_eth_kzg::Error),
    /// The KZG proof included in the processing was not valid.
    KzgVerificationFailed,
    /// Misc indexing error.
    InconsistentArrayLength(String),
}

impl From<c_kzg::Error> for Error {
    fn from(e: c_kzg::Error) -> Error {
        Error::Kzg(e)
    }
}

/// The result of computing or recovering the extended cells of a blob: one cell and one proof
/// per column of the extended matrix.
pub type CellsAndKzgProofs = ([Cell; CELLS_PER_EXT_BLOB], [KzgProof; CELLS_PER_EXT_BLOB]);

/// A wrapper over the two KZG backends: `c-kzg` for blob-level proofs (Deneb/Electra) and
/// `rust_eth_kzg` for PeerDAS cell operations (Fulu).
pub struct Kzg {
    trusted_setup: &'static c_kzg::KzgSettings,
    context: DASContext,
}

impl std::fmt::Debug for Kzg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kzg").finish_non_exhaustive()
    }
}

impl Default for Kzg {
    fn default() -> Self {
        Self::new_from_ethereum_trusted_setup()
    }
}

impl Kzg {
    /// Load the official Ethereum mainnet trusted setup in both backends.
    pub fn new_from_ethereum_trusted_setup() -> Self {
        Self {
            trusted_setup: c_kzg::ethereum_kzg_settings(0),
            context: DASContext::default(),
        }
    }

    /// Verify a KZG proof for the given blob against its commitment.
    pub fn verify_blob_kzg_proof(
        &self,
        blob: &Blob,
        kzg_commitment: KzgCommitment,
        kzg_proof: KzgProof,
    ) -> Result<(), Error> {
        if self
            .trusted_setup
            .verify_blob_kzg_proof(blob, &kzg_commitment.into(), &kzg_proof.into())
            .map_err(Error::Kzg)?
        {
            Ok(())
        } else {
            Err(Error::KzgVerificationFailed)
        }
    }

    /// Verify an aggregate KZG proof for the given blobs and commitments.
    pub fn verify_blob_kzg_proof_batch(
        &self,
        blobs: &[Blob],
        kzg_commitments: &[KzgCommitment],
        kzg_proofs: &[KzgProof],
    ) -> Result<(), Error> {
        let commitments_bytes = kzg_commitments
            .iter()
            .map(|comm| Bytes48::from(*comm))
            .collect::<Vec<_>>();
        let proofs_bytes = kzg_proofs
            .iter()
            .map(|proof| Bytes48::from(*proof))
            .collect::<Vec<_>>();

        if self
            .trusted_setup
            .verify_blob_kzg_proof_batch(blobs, &commitments_bytes, &proofs_bytes)
            .map_err(Error::Kzg)?
        {
            Ok(())
        } else {
            Err(Error::KzgVerificationFailed)
        }
    }

    /// Computes the commitment for a given blob.
    pub fn blob_to_kzg_commitment(&self, blob: &Blob) -> Result<KzgCommitment, Error> {
        self.trusted_setup
            .blob_to_kzg_commitment(blob)
            .map(|commitment| KzgCommitment(commitment.to_bytes().into_inner()))
            .map_err(Error::Kzg)
    }

    /// Computes the cells and their proofs for the extended blob matrix column-by-column.
    pub fn compute_cells_and_proofs(&self, blob: &Blob) -> Result<CellsAndKzgProofs, Error> {
        let blob_bytes: &[u8; BYTES_PER_BLOB] = blob
            .as_ref()
            .try_into()
            .map_err(|_| Error::InconsistentArrayLength("blob len != BYTES_PER_BLOB".into()))?;

        let (cells, proofs) = self
            .context
            .compute_cells_and_kzg_proofs(blob_bytes)
            .map_err(Error::PeerDASKZG)?;

        let proofs: Box<[KzgProof; CELLS_PER_EXT_BLOB]> = proofs
            .iter()
            .map(|proof| KzgProof(*proof))
            .collect::<Vec<_>>()
            .into_boxed_slice()
            .try_into()
            .map_err(|_| {
                Error::InconsistentArrayLength("proof count != CELLS_PER_EXT_BLOB".into())
            })?;

        Ok((cells, *proofs))
    }

    /// Recovers all cells and their proofs from `cells`, which must cover at least half of the
    /// extended matrix. The recovered set is independent of which half was supplied.
    pub fn recover_cells_and_compute_kzg_proofs(
        &self,
        cell_ids: &[u64],
        cells: &[CellRef<'_>],
    ) -> Result<CellsAndKzgProofs, Error> {
        let (recovered_cells, recovered_proofs) = self
            .context
            .recover_cells_and_kzg_proofs(cell_ids.to_vec(), cells.to_vec())
            .map_err(Error::PeerDASKZG)?;

        let proofs: Box<[KzgProof; CELLS_PER_EXT_BLOB]> = recovered_proofs
            .iter()
            .map(|proof| KzgProof(*proof))
            .collect::<Vec<_>>()
            .into_boxed_slice()
            .try_into()
            .map_err(|_| {
                Error::InconsistentArrayLength("proof count != CELLS_PER_EXT_BLOB".into())
            })?;

        Ok((recovered_cells, *proofs))
    }

    /// Verifies a batch of cell-proof triplets, e.g. all the cells of a column sidecar at once.
    pub fn verify_cell_proof_batch(
        &self,
        cells: &[CellRef<'_>],
        kzg_proofs: &[KzgProof],
        cell_indices: &[u64],
        kzg_commitments: &[KzgCommitment],
    ) -> Result<(), Error> {
        let proofs = kzg_proofs.iter().map(|proof| &proof.0).collect::<Vec<_>>();
        let commitments = kzg_commitments
            .iter()
            .map(|commitment| &commitment.0)
            .collect::<Vec<_>>();

        self.context
            .verify_cell_kzg_proof_batch(
                commitments,
                cell_indices,
                cells.to_vec(),
                proofs,
            )
            .map_err(Error::PeerDASKZG)
    }
}
