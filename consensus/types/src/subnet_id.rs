use crate::ChainSpec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An attestation gossip subnet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubnetId(#[serde(with = "serde_utils::quoted_u64")] u64);

impl SubnetId {
    pub fn new(id: u64) -> Self {
        SubnetId(id)
    }

    /// The subnet an unaggregated attestation for `committee_index` at `slot` is published on.
    pub fn compute_subnet(
        slot: crate::Slot,
        committee_index: u64,
        committees_per_slot: u64,
        spec: &ChainSpec,
    ) -> Self {
        let slots_since_epoch_start = slot.as_u64() % spec.attestation_subnet_count;
        let committees_since_epoch_start =
            committees_per_slot.saturating_mul(slots_since_epoch_start);
        Self::new(
            committees_since_epoch_start.saturating_add(committee_index)
                % spec.attestation_subnet_count,
        )
    }
}

impl fmt::Display for SubnetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubnetId {
    fn from(x: u64) -> Self {
        SubnetId(x)
    }
}

impl From<SubnetId> for u64 {
    fn from(val: SubnetId) -> Self {
        val.0
    }
}

impl std::ops::Deref for SubnetId {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
