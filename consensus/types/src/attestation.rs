use crate::{AttestationData, EthSpec, ForkName};
use bls::AggregateSignature;
use derivative::Derivative;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitList, BitVector};
use superstruct::superstruct;
use tree_hash_derive::TreeHash;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    SszTypesError(ssz_types::Error),
    BitfieldError(ssz::BitfieldError),
    IncorrectStateVariant,
    InvalidCommitteeLength,
    InvalidCommitteeIndex,
}

impl From<ssz_types::Error> for Error {
    fn from(e: ssz_types::Error) -> Self {
        Error::SszTypesError(e)
    }
}

impl From<ssz::BitfieldError> for Error {
    fn from(e: ssz::BitfieldError) -> Self {
        Error::BitfieldError(e)
    }
}

/// A validator vote, aggregated over a committee (pre-Electra) or several committees (Electra
/// on-chain aggregation, EIP-7549).
#[superstruct(
    variants(Base, Electra),
    variant_attributes(
        derive(
            Debug,
            Clone,
            Serialize,
            Deserialize,
            Encode,
            Decode,
            TreeHash,
            Derivative,
        ),
        derivative(PartialEq, Eq, Hash(bound = "E: EthSpec")),
        serde(bound = "E: EthSpec", deny_unknown_fields),
    ),
    ref_attributes(derive(Debug)),
    cast_error(ty = "Error", expr = "Error::IncorrectStateVariant"),
    partial_getter_error(ty = "Error", expr = "Error::IncorrectStateVariant")
)]
#[derive(Debug, Clone, Serialize, Deserialize, Encode, TreeHash, Derivative)]
#[derivative(PartialEq, Eq, Hash(bound = "E: EthSpec"))]
#[serde(untagged)]
#[serde(bound = "E: EthSpec")]
#[ssz(enum_behaviour = "transparent")]
#[tree_hash(enum_behaviour = "transparent")]
pub struct Attestation<E: EthSpec> {
    #[superstruct(only(Base), partial_getter(rename = "aggregation_bits_base"))]
    pub aggregation_bits: BitList<E::MaxValidatorsPerCommittee>,
    #[superstruct(only(Electra), partial_getter(rename = "aggregation_bits_electra"))]
    pub aggregation_bits: BitList<E::MaxValidatorsPerSlot>,
    pub data: AttestationData,
    pub signature: AggregateSignature,
    #[superstruct(only(Electra))]
    pub committee_bits: BitVector<E::MaxCommitteesPerSlot>,
}

impl<E: EthSpec> Attestation<E> {
    /// Produce an empty attestation for the given fork, sized to `committee_len` participants.
    pub fn empty_for_fork(
        fork_name: ForkName,
        data: AttestationData,
        committee_len: usize,
    ) -> Result<Self, Error> {
        if fork_name.electra_enabled() {
            let mut committee_bits: BitVector<E::MaxCommitteesPerSlot> = BitVector::default();
            committee_bits.set(data.index as usize, true)?;
            Ok(Attestation::Electra(AttestationElectra {
                aggregation_bits: BitList::with_capacity(committee_len)?,
                data: AttestationData {
                    index: 0,
                    ..data
                },
                committee_bits,
                signature: AggregateSignature::infinity(),
            }))
        } else {
            Ok(Attestation::Base(AttestationBase {
                aggregation_bits: BitList::with_capacity(committee_len)?,
                data,
                signature: AggregateSignature::infinity(),
            }))
        }
    }

    /// The committee this attestation covers: pre-Electra the `data.index` field, post-Electra
    /// the lowest set bit of `committee_bits`.
    ///
    /// Returns `None` for an Electra attestation with no committee bits set.
    pub fn committee_index(&self) -> Option<u64> {
        match self {
            Attestation::Base(att) => Some(att.data.index),
            Attestation::Electra(att) => att.committee_index(),
        }
    }

    /// All committees this attestation covers, in ascending order.
    pub fn get_committee_indices(&self) -> Vec<u64> {
        match self {
            Attestation::Base(att) => vec![att.data.index],
            Attestation::Electra(att) => att.get_committee_indices(),
        }
    }

    pub fn num_set_aggregation_bits(&self) -> usize {
        match self {
            Attestation::Base(att) => att.aggregation_bits.num_set_bits(),
            Attestation::Electra(att) => att.aggregation_bits.num_set_bits(),
        }
    }

    pub fn get_aggregation_bit(&self, index: usize) -> Result<bool, ssz::BitfieldError> {
        match self {
            Attestation::Base(att) => att.aggregation_bits.get(index),
            Attestation::Electra(att) => att.aggregation_bits.get(index),
        }
    }

    pub fn aggregation_bits_len(&self) -> usize {
        match self {
            Attestation::Base(att) => att.aggregation_bits.len(),
            Attestation::Electra(att) => att.aggregation_bits.len(),
        }
    }

    /// Aggregate `other` into `self`, OR-ing the participation bits and aggregating the
    /// signatures. The attestations must be for the same fork variant and `AttestationData`.
    pub fn aggregate(&mut self, other: &Self) -> Result<(), Error> {
        match (self, other) {
            (Attestation::Base(att), Attestation::Base(other)) => {
                debug_assert_eq!(att.data, other.data);
                att.aggregation_bits = att.aggregation_bits.union(&other.aggregation_bits);
                att.signature.add_assign_aggregate(&other.signature);
                Ok(())
            }
            (Attestation::Electra(att), Attestation::Electra(other)) => {
                debug_assert_eq!(att.data, other.data);
                att.aggregation_bits = att.aggregation_bits.union(&other.aggregation_bits);
                att.signature.add_assign_aggregate(&other.signature);
                Ok(())
            }
            _ => Err(Error::IncorrectStateVariant),
        }
    }
}

impl<E: EthSpec> AttestationElectra<E> {
    /// All committees this attestation covers, in ascending order.
    pub fn get_committee_indices(&self) -> Vec<u64> {
        self.committee_bits
            .iter()
            .enumerate()
            .filter_map(|(index, bit)| if bit { Some(index as u64) } else { None })
            .collect()
    }

    /// The single committee covered, if exactly determined by the lowest set bit.
    pub fn committee_index(&self) -> Option<u64> {
        self.get_committee_indices().first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MainnetEthSpec;

    type E = MainnetEthSpec;

    fn electra_att(committee: usize, committee_len: usize) -> Attestation<E> {
        Attestation::<E>::empty_for_fork(
            ForkName::Electra,
            AttestationData {
                index: committee as u64,
                ..AttestationData::default()
            },
            committee_len,
        )
        .unwrap()
    }

    #[test]
    fn electra_attestation_zeroes_data_index() {
        let att = electra_att(5, 8);
        assert_eq!(att.data().index, 0);
        assert_eq!(att.committee_index(), Some(5));
        assert_eq!(att.get_committee_indices(), vec![5]);
    }

    #[test]
    fn base_attestation_uses_data_index() {
        let att = Attestation::<E>::empty_for_fork(
            ForkName::Deneb,
            AttestationData {
                index: 3,
                ..AttestationData::default()
            },
            4,
        )
        .unwrap();
        assert_eq!(att.committee_index(), Some(3));
        assert_eq!(att.aggregation_bits_len(), 4);
    }

    #[test]
    fn aggregate_merges_bits() {
        let mut a = electra_att(0, 4);
        let mut b = electra_att(0, 4);
        if let Attestation::Electra(inner) = &mut a {
            inner.aggregation_bits.set(0, true).unwrap();
        }
        if let Attestation::Electra(inner) = &mut b {
            inner.aggregation_bits.set(3, true).unwrap();
        }
        a.aggregate(&b).unwrap();
        assert_eq!(a.num_set_aggregation_bits(), 2);
        assert!(a.get_aggregation_bit(0).unwrap());
        assert!(a.get_aggregation_bit(3).unwrap());
    }

    #[test]
    fn cross_variant_aggregation_is_rejected() {
        let mut a = electra_att(0, 4);
        let b = Attestation::<E>::empty_for_fork(ForkName::Deneb, AttestationData::default(), 4)
            .unwrap();
        assert_eq!(a.aggregate(&b), Err(Error::IncorrectStateVariant));
    }
}
