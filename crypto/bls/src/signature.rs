use crate::{Error, INFINITY_SIGNATURE, SIGNATURE_BYTES_LEN, impl_serde_ssz_tree_hash};
use blst::min_pk as blst_core;
use std::fmt;

/// A single BLS signature in G2, compressed to 96 bytes on the wire.
///
/// `None` represents the point at infinity, which blst refuses to hold as a deserialized point.
#[derive(Clone)]
pub struct Signature {
    point: Option<blst_core::Signature>,
}

impl Signature {
    /// Instantiates `Self` as the point at infinity.
    pub fn empty() -> Self {
        Self { point: None }
    }

    pub fn is_infinity(&self) -> bool {
        self.point.is_none()
    }

    pub(crate) fn point(&self) -> Option<&blst_core::Signature> {
        self.point.as_ref()
    }

    /// Serialize `self` as compressed bytes.
    pub fn serialize(&self) -> [u8; SIGNATURE_BYTES_LEN] {
        match &self.point {
            Some(point) => point.compress(),
            None => INFINITY_SIGNATURE,
        }
    }

    /// Deserialize `self` from compressed bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != SIGNATURE_BYTES_LEN {
            return Err(Error::InvalidByteLength {
                got: bytes.len(),
                expected: SIGNATURE_BYTES_LEN,
            });
        }
        if bytes == INFINITY_SIGNATURE {
            return Ok(Self::empty());
        }
        let point = blst_core::Signature::uncompress(bytes).map_err(Error::BlstError)?;
        // Reject points not in the G2 subgroup; aggregation assumes subgroup membership.
        point.validate(false).map_err(Error::BlstError)?;
        Ok(Self { point: Some(point) })
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.serialize()[..] == other.serialize()[..]
    }
}

impl Eq for Signature {}

impl std::hash::Hash for Signature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.serialize().hash(state);
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.serialize()))
    }
}

impl_serde_ssz_tree_hash!(Signature);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_rejects_short_input() {
        assert_eq!(
            Signature::deserialize(&[0u8; 95]),
            Err(Error::InvalidByteLength {
                got: 95,
                expected: SIGNATURE_BYTES_LEN
            })
        );
    }

    #[test]
    fn infinity_round_trip() {
        let sig = Signature::deserialize(&INFINITY_SIGNATURE).unwrap();
        assert!(sig.is_infinity());
        assert_eq!(sig.serialize(), INFINITY_SIGNATURE);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        assert!(Signature::deserialize(&[0xff; SIGNATURE_BYTES_LEN]).is_err());
    }
}
