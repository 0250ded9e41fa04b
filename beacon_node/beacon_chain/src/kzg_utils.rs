//! Conversions between blobs and PeerDAS data columns: computing the extended cell matrix from
//! blobs (engine path) and recovering missing columns from at least half of the matrix
//! (reconstruction path).

use kzg::{CELLS_PER_EXT_BLOB, CellRef, Kzg, KzgProof};
use std::sync::Arc;
use types::{
    Blob, ChainSpec, DataColumn, DataColumnSidecar, DataColumnSidecarError,
    DataColumnSidecarList, EthSpec, FixedVector, KzgProofs, SignedBeaconBlock, VariableList,
};

/// Build one `DataColumnSidecar` per column of the extended matrix from a block's blobs.
///
/// `cell_proofs` are the flattened per-cell proofs (blob-major), as returned by
/// `engine_getBlobsV2`; the cells themselves are recomputed locally.
pub fn blobs_to_data_column_sidecars<E: EthSpec>(
    blobs: &[&Blob<E>],
    cell_proofs: Vec<KzgProof>,
    block: &SignedBeaconBlock<E>,
    kzg: &Kzg,
    spec: &ChainSpec,
) -> Result<DataColumnSidecarList<E>, DataColumnSidecarError> {
    if blobs.is_empty() {
        return Ok(vec![]);
    }
    let expected_proofs = blobs.len() * CELLS_PER_EXT_BLOB;
    if cell_proofs.len() != expected_proofs {
        return Err(DataColumnSidecarError::InvalidCellProofLength {
            expected: expected_proofs,
            actual: cell_proofs.len(),
        });
    }

    let kzg_commitments = block.kzg_commitments();
    if kzg_commitments.len() != blobs.len() {
        return Err(DataColumnSidecarError::BuildSidecarFailed(format!(
            "blob count {} does not match commitment count {}",
            blobs.len(),
            kzg_commitments.len(),
        )));
    }

    let (signed_block_header, kzg_commitments_inclusion_proof) =
        block.signed_block_header_and_kzg_commitments_proof();

    // One row of cells per blob.
    let mut rows = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let blob = c_kzg_blob_from_bytes::<E>(blob)?;
        let (cells, _proofs) = kzg.compute_cells_and_proofs(&blob)?;
        rows.push(cells);
    }

    build_sidecars_from_rows::<E>(
        &rows,
        |row, column| cell_proofs[row * CELLS_PER_EXT_BLOB + column],
        block.message().body.blob_kzg_commitments.clone(),
        signed_block_header,
        kzg_commitments_inclusion_proof,
        spec,
        None,
    )
}

/// Recover the complete column set from any subset covering at least half the matrix.
///
/// Property: the output is identical for any qualifying subset of the same block's columns.
pub fn reconstruct_data_columns<E: EthSpec>(
    kzg: &Kzg,
    cached_columns: &[Arc<DataColumnSidecar<E>>],
    spec: &ChainSpec,
) -> Result<DataColumnSidecarList<E>, DataColumnSidecarError> {
    let template = cached_columns
        .first()
        .ok_or(DataColumnSidecarError::MissingBlobSidecars)?;
    let num_blobs = template.column.len();

    let mut rows = Vec::with_capacity(num_blobs);
    let mut proof_rows = Vec::with_capacity(num_blobs);
    for blob_row in 0..num_blobs {
        let cell_ids = cached_columns
            .iter()
            .map(|column| column.index)
            .collect::<Vec<_>>();
        let mut cells: Vec<CellRef<'_>> = Vec::with_capacity(cached_columns.len());
        for column in cached_columns {
            let cell = column
                .column
                .get(blob_row)
                .ok_or(DataColumnSidecarError::DataColumnIndexOutOfBounds)?;
            let cell_ref: CellRef<'_> = cell
                .as_ref()
                .try_into()
                .map_err(|_| DataColumnSidecarError::DataColumnIndexOutOfBounds)?;
            cells.push(cell_ref);
        }

        let (recovered_cells, recovered_proofs) =
            kzg.recover_cells_and_compute_kzg_proofs(&cell_ids, &cells)?;
        rows.push(recovered_cells);
        proof_rows.push(recovered_proofs);
    }

    build_sidecars_from_rows::<E>(
        &rows,
        |row, column| proof_rows[row][column],
        template.kzg_commitments.clone(),
        template.signed_block_header.clone(),
        template.kzg_commitments_inclusion_proof.clone(),
        spec,
        None,
    )
}

/// Assemble sidecars from a blob-major cell matrix. `only_columns` restricts the output set.
fn build_sidecars_from_rows<E: EthSpec>(
    rows: &[[kzg::Cell; CELLS_PER_EXT_BLOB]],
    proof_at: impl Fn(usize, usize) -> KzgProof,
    kzg_commitments: types::KzgCommitments<E>,
    signed_block_header: types::SignedBeaconBlockHeader,
    kzg_commitments_inclusion_proof: FixedVector<
        types::Hash256,
        E::KzgCommitmentsInclusionProofDepth,
    >,
    spec: &ChainSpec,
    only_columns: Option<&[u64]>,
) -> Result<DataColumnSidecarList<E>, DataColumnSidecarError> {
    let mut sidecars = Vec::new();
    for column_index in 0..spec.number_of_columns {
        if only_columns.is_some_and(|wanted| !wanted.contains(&column_index)) {
            continue;
        }
        let mut column_cells = Vec::with_capacity(rows.len());
        let mut column_proofs = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let cell = row
                .get(column_index as usize)
                .ok_or(DataColumnSidecarError::DataColumnIndexOutOfBounds)?;
            column_cells.push(
                FixedVector::new(cell.to_vec())
                    .map_err(DataColumnSidecarError::SszError)?,
            );
            column_proofs.push(proof_at(row_index, column_index as usize));
        }

        sidecars.push(Arc::new(DataColumnSidecar {
            index: column_index,
            column: DataColumn::<E>::new(column_cells)
                .map_err(DataColumnSidecarError::SszError)?,
            kzg_commitments: kzg_commitments.clone(),
            kzg_proofs: KzgProofs::<E>::new(column_proofs)
                .map_err(DataColumnSidecarError::SszError)?,
            signed_block_header: signed_block_header.clone(),
            kzg_commitments_inclusion_proof: kzg_commitments_inclusion_proof.clone(),
        }));
    }
    Ok(sidecars)
}

fn c_kzg_blob_from_bytes<E: EthSpec>(
    blob: &Blob<E>,
) -> Result<kzg::Blob, DataColumnSidecarError> {
    kzg::Blob::from_bytes(blob)
        .map_err(|e| DataColumnSidecarError::BuildSidecarFailed(format!("invalid blob: {e:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use kzg::KzgCommitment;
    use types::{BeaconBlock, MainnetEthSpec, Slot};

    type E = MainnetEthSpec;

    fn block_with_commitments(count: usize) -> SignedBeaconBlock<E> {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(1);
        block.body.blob_kzg_commitments =
            VariableList::new(vec![KzgCommitment::empty_for_testing(); count]).unwrap();
        SignedBeaconBlock::from_block(block, Signature::empty())
    }

    #[test]
    fn empty_blob_set_yields_no_sidecars() {
        let kzg = Kzg::new_from_ethereum_trusted_setup();
        let spec = ChainSpec::mainnet();
        let block = block_with_commitments(0);
        let sidecars = blobs_to_data_column_sidecars::<E>(&[], vec![], &block, &kzg, &spec).unwrap();
        assert!(sidecars.is_empty());
    }

    #[test]
    fn proof_count_mismatch_is_rejected() {
        let kzg = Kzg::new_from_ethereum_trusted_setup();
        let spec = ChainSpec::mainnet();
        let block = block_with_commitments(1);
        let blob = Blob::<E>::default();
        let result =
            blobs_to_data_column_sidecars::<E>(&[&blob], vec![KzgProof::empty(); 3], &block, &kzg, &spec);
        assert!(matches!(
            result,
            Err(DataColumnSidecarError::InvalidCellProofLength {
                expected,
                actual: 3,
            }) if expected == CELLS_PER_EXT_BLOB
        ));
    }

    #[test]
    fn blobs_produce_full_column_set() {
        let kzg = Kzg::new_from_ethereum_trusted_setup();
        let spec = ChainSpec::mainnet();
        let block = block_with_commitments(1);
        let blob = Blob::<E>::default();
        let proofs = vec![KzgProof::empty(); CELLS_PER_EXT_BLOB];

        let sidecars =
            blobs_to_data_column_sidecars::<E>(&[&blob], proofs, &block, &kzg, &spec).unwrap();
        assert_eq!(sidecars.len() as u64, spec.number_of_columns);
        for (index, sidecar) in sidecars.iter().enumerate() {
            assert_eq!(sidecar.index, index as u64);
            assert_eq!(sidecar.column.len(), 1);
            assert_eq!(sidecar.block_root(), block.canonical_root());
        }
    }

    #[test]
    fn reconstruction_from_either_half_agrees() {
        let kzg = Kzg::new_from_ethereum_trusted_setup();
        let spec = ChainSpec::mainnet();
        let block = block_with_commitments(1);
        let blob = Blob::<E>::default();
        let proofs = vec![KzgProof::empty(); CELLS_PER_EXT_BLOB];
        let full =
            blobs_to_data_column_sidecars::<E>(&[&blob], proofs, &block, &kzg, &spec).unwrap();

        let half = spec.number_of_columns as usize / 2;
        let first_half = full[..half].to_vec();
        let second_half = full[half..].to_vec();

        let from_first = reconstruct_data_columns::<E>(&kzg, &first_half, &spec).unwrap();
        let from_second = reconstruct_data_columns::<E>(&kzg, &second_half, &spec).unwrap();

        assert_eq!(from_first.len() as u64, spec.number_of_columns);
        for (a, b) in from_first.iter().zip(from_second.iter()) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.column, b.column);
        }
    }
}
