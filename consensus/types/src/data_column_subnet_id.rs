use crate::data_column_custody_group::compute_subnet_for_data_column_sidecar;
use crate::{ChainSpec, ColumnIndex};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A data-column gossip subnet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataColumnSubnetId(#[serde(with = "serde_utils::quoted_u64")] u64);

impl DataColumnSubnetId {
    pub fn new(id: u64) -> Self {
        DataColumnSubnetId(id)
    }

    /// The subnet a column sidecar with `column_index` is published on.
    pub fn from_column_index(column_index: ColumnIndex, spec: &ChainSpec) -> Self {
        Self::new(compute_subnet_for_data_column_sidecar(column_index, spec))
    }

    /// All column indices carried on this subnet.
    pub fn columns(&self, spec: &ChainSpec) -> impl Iterator<Item = ColumnIndex> + use<> {
        let subnet = self.0;
        let data_column_sidecar_subnet_count = spec.data_column_sidecar_subnet_count;
        let columns_per_subnet = spec.number_of_columns / data_column_sidecar_subnet_count;
        (0..columns_per_subnet).map(move |i| data_column_sidecar_subnet_count * i + subnet)
    }
}

impl fmt::Display for DataColumnSubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DataColumnSubnetId {
    fn from(x: u64) -> Self {
        DataColumnSubnetId(x)
    }
}

impl From<DataColumnSubnetId> for u64 {
    fn from(val: DataColumnSubnetId) -> Self {
        val.0
    }
}

impl std::ops::Deref for DataColumnSubnetId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_subnet_round_trip() {
        let spec = ChainSpec::mainnet();
        for column in [0u64, 1, 64, 127] {
            let subnet = DataColumnSubnetId::from_column_index(column, &spec);
            assert!(subnet.columns(&spec).any(|c| c == column));
        }
    }
}
