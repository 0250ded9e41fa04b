use crate::{Error, INFINITY_SIGNATURE, SIGNATURE_BYTES_LEN, Signature, impl_serde_ssz_tree_hash};
use blst::min_pk as blst_core;
use std::fmt;

/// An aggregate of BLS signatures over the same or distinct messages.
///
/// The point at infinity (`None`) is the aggregation identity: aggregating a signature onto an
/// infinity aggregate yields that signature's aggregate.
#[derive(Clone)]
pub struct AggregateSignature {
    point: Option<blst_core::AggregateSignature>,
}

impl AggregateSignature {
    /// Instantiates `Self` at the point at infinity.
    pub fn infinity() -> Self {
        Self { point: None }
    }

    pub fn is_infinity(&self) -> bool {
        self.point.is_none()
    }

    /// Aggregates a single signature into `self`.
    ///
    /// The infinity signature contributes nothing and is skipped, preserving the identity law.
    pub fn add_assign(&mut self, other: &Signature) {
        let Some(other_point) = other.point() else {
            return;
        };
        match &mut self.point {
            Some(agg) => {
                // Subgroup membership was checked at deserialization.
                let _ = agg.add_signature(other_point, false);
            }
            None => {
                self.point = Some(blst_core::AggregateSignature::from_signature(other_point));
            }
        }
    }

    /// Aggregates an aggregate signature into `self`.
    pub fn add_assign_aggregate(&mut self, other: &AggregateSignature) {
        let Some(other_agg) = &other.point else {
            return;
        };
        match &mut self.point {
            Some(agg) => agg.add_aggregate(other_agg),
            None => self.point = Some(other_agg.clone()),
        }
    }

    /// Serialize `self` as compressed bytes.
    pub fn serialize(&self) -> [u8; SIGNATURE_BYTES_LEN] {
        match &self.point {
            Some(point) => point.to_signature().compress(),
            None => INFINITY_SIGNATURE,
        }
    }

    /// Deserialize `self` from compressed bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        let signature = Signature::deserialize(bytes)?;
        let point = signature
            .point()
            .map(blst_core::AggregateSignature::from_signature);
        Ok(Self { point })
    }
}

impl PartialEq for AggregateSignature {
    fn eq(&self, other: &Self) -> bool {
        self.serialize()[..] == other.serialize()[..]
    }
}

impl Eq for AggregateSignature {}

impl std::hash::Hash for AggregateSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serialize().hash(state);
    }
}

impl fmt::Debug for AggregateSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.serialize()))
    }
}

impl_serde_ssz_tree_hash!(AggregateSignature);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinity_is_the_aggregation_identity() {
        let mut agg = AggregateSignature::infinity();
        agg.add_assign(&Signature::empty());
        assert!(agg.is_infinity());

        let mut other = AggregateSignature::infinity();
        other.add_assign_aggregate(&agg);
        assert!(other.is_infinity());
    }

    #[test]
    fn serialize_round_trip() {
        let agg = AggregateSignature::infinity();
        let decoded = AggregateSignature::deserialize(&agg.serialize()).unwrap();
        assert_eq!(agg, decoded);
    }
}
