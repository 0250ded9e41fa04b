use crate::{ChainSpec, ColumnIndex, Uint256};
use ethereum_hashing::hash;
use std::collections::HashSet;

pub type CustodyIndex = u64;

#[derive(Debug, PartialEq)]
pub enum DataColumnCustodyGroupError {
    CustodyGroupCountTooLarge(u64),
    InvalidCustodyGroup(CustodyIndex),
}

/// The `custody_groups` a node with `raw_node_id` is assigned, obtained by repeatedly hashing a
/// 256-bit counter seeded at the node id and reducing modulo `NUMBER_OF_CUSTODY_GROUPS`,
/// skipping duplicates until `custody_group_count` distinct groups are found.
///
/// The returned groups are sorted ascending and deterministic for a fixed
/// `(node_id, custody_group_count)`.
pub fn get_custody_groups(
    raw_node_id: [u8; 32],
    custody_group_count: u64,
    spec: &ChainSpec,
) -> Result<Vec<CustodyIndex>, DataColumnCustodyGroupError> {
    if custody_group_count > spec.number_of_custody_groups {
        return Err(DataColumnCustodyGroupError::CustodyGroupCountTooLarge(
            custody_group_count,
        ));
    }

    let mut custody_groups: HashSet<CustodyIndex> = HashSet::new();
    let mut current_id = Uint256::from_be_bytes(raw_node_id);
    while (custody_groups.len() as u64) < custody_group_count {
        let mut id_bytes = [0u8; 32];
        id_bytes.copy_from_slice(&current_id.to_be_bytes::<32>());
        let hash = hash(&id_bytes);
        let hash_prefix: [u8; 8] = hash[0..8]
            .try_into()
            .expect("hash produces at least 8 bytes");
        let hash_prefix_u64 = u64::from_le_bytes(hash_prefix);
        let custody_group = hash_prefix_u64 % spec.number_of_custody_groups;
        custody_groups.insert(custody_group);
        current_id = current_id.wrapping_add(Uint256::from(1u64));
    }

    let mut custody_groups = custody_groups.into_iter().collect::<Vec<_>>();
    custody_groups.sort_unstable();
    Ok(custody_groups)
}

/// Returns the columns the node should custody for a given custody group:
/// `{group + k * NUMBER_OF_CUSTODY_GROUPS : k in [0, columns_per_group)}`.
pub fn compute_columns_for_custody_group(
    custody_group: CustodyIndex,
    spec: &ChainSpec,
) -> Result<impl Iterator<Item = ColumnIndex> + use<>, DataColumnCustodyGroupError> {
    let number_of_custody_groups = spec.number_of_custody_groups;
    if custody_group >= number_of_custody_groups {
        return Err(DataColumnCustodyGroupError::InvalidCustodyGroup(
            custody_group,
        ));
    }

    let columns_per_group = spec.number_of_columns / number_of_custody_groups;
    Ok((0..columns_per_group)
        .map(move |i| (custody_group + i * number_of_custody_groups) as ColumnIndex))
}

/// The gossip subnet a column is published on.
pub fn compute_subnet_for_data_column_sidecar(column_index: ColumnIndex, spec: &ChainSpec) -> u64 {
    column_index % spec.data_column_sidecar_subnet_count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custody_groups_are_deterministic_and_exact_count() {
        let spec = ChainSpec::mainnet();
        let node_id = [42u8; 32];
        for count in [0, 1, 4, 64, 128] {
            let groups = get_custody_groups(node_id, count, &spec).unwrap();
            let again = get_custody_groups(node_id, count, &spec).unwrap();
            assert_eq!(groups.len() as u64, count);
            assert_eq!(groups, again);
            // No duplicates, all in range.
            assert!(groups.iter().all(|g| *g < spec.number_of_custody_groups));
        }
    }

    #[test]
    fn full_custody_covers_every_group() {
        let spec = ChainSpec::mainnet();
        let groups = get_custody_groups([7u8; 32], spec.number_of_custody_groups, &spec).unwrap();
        assert_eq!(
            groups,
            (0..spec.number_of_custody_groups).collect::<Vec<_>>()
        );
    }

    #[test]
    fn too_large_count_is_rejected() {
        let spec = ChainSpec::mainnet();
        assert_eq!(
            get_custody_groups([0u8; 32], spec.number_of_custody_groups + 1, &spec),
            Err(DataColumnCustodyGroupError::CustodyGroupCountTooLarge(129))
        );
    }

    #[test]
    fn columns_for_group_stride_by_group_count() {
        let spec = ChainSpec::mainnet();
        // 128 columns over 128 groups: exactly one column per group.
        let columns = compute_columns_for_custody_group(5, &spec)
            .unwrap()
            .collect::<Vec<_>>();
        assert_eq!(columns, vec![5]);

        assert!(compute_columns_for_custody_group(128, &spec).is_err());
    }

    #[test]
    fn subnet_is_column_mod_subnet_count() {
        let spec = ChainSpec::mainnet();
        assert_eq!(compute_subnet_for_data_column_sidecar(5, &spec), 5);
        assert_eq!(
            compute_subnet_for_data_column_sidecar(spec.data_column_sidecar_subnet_count + 3, &spec),
            3
        );
    }
}
