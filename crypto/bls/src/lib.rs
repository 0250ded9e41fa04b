//! A wrapper around the `blst` BLS12-381 implementation, exposing the narrow signature
//! aggregation surface the beacon node core relies upon.
//!
//! The cryptographic contract is opaque: signatures deserialize from their 96-byte compressed
//! form, aggregate commutatively, and the point at infinity acts as the aggregation identity.
//! Signature *verification* happens on the worker pool at the network edge and is not exposed
//! here.

mod aggregate_signature;
mod signature;

pub use aggregate_signature::AggregateSignature;
pub use signature::Signature;

/// The byte-length of a BLS signature when serialized in compressed form.
pub const SIGNATURE_BYTES_LEN: usize = 96;

/// Represents the compressed serialization of the point-at-infinity for a BLS signature.
pub const INFINITY_SIGNATURE: [u8; SIGNATURE_BYTES_LEN] = {
    let mut bytes = [0u8; SIGNATURE_BYTES_LEN];
    bytes[0] = 0xc0;
    bytes
};

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// An error was raised from the `blst` library.
    BlstError(blst::BLST_ERROR),
    /// The provided bytes were an incorrect length.
    InvalidByteLength { got: usize, expected: usize },
}

impl From<blst::BLST_ERROR> for Error {
    fn from(e: blst::BLST_ERROR) -> Error {
        Error::BlstError(e)
    }
}

/// Implements SSZ `Encode`/`Decode`, `TreeHash` and hex-string `serde` for a fixed-length
/// byte-serializable signature type.
macro_rules! impl_serde_ssz_tree_hash {
    ($type:ty) => {
        impl ssz::Encode for $type {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $crate::SIGNATURE_BYTES_LEN
            }

            fn ssz_bytes_len(&self) -> usize {
                $crate::SIGNATURE_BYTES_LEN
            }

            fn ssz_append(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.serialize())
            }
        }

        impl ssz::Decode for $type {
            fn is_ssz_fixed_len() -> bool {
                true
            }

            fn ssz_fixed_len() -> usize {
                $crate::SIGNATURE_BYTES_LEN
            }

            fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, ssz::DecodeError> {
                Self::deserialize(bytes).map_err(|e| {
                    ssz::DecodeError::BytesInvalid(format!("invalid signature: {:?}", e))
                })
            }
        }

        impl tree_hash::TreeHash for $type {
            fn tree_hash_type() -> tree_hash::TreeHashType {
                tree_hash::TreeHashType::Vector
            }

            fn tree_hash_packed_encoding(&self) -> tree_hash::PackedEncoding {
                unreachable!("Vector should never be packed.")
            }

            fn tree_hash_packing_factor() -> usize {
                unreachable!("Vector should never be packed.")
            }

            fn tree_hash_root(&self) -> tree_hash::Hash256 {
                let values_per_chunk = tree_hash::BYTES_PER_CHUNK;
                let minimum_chunk_count =
                    ($crate::SIGNATURE_BYTES_LEN + values_per_chunk - 1) / values_per_chunk;
                tree_hash::merkle_root(&self.serialize(), minimum_chunk_count)
            }
        }

        impl serde::Serialize for $type {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&format!("0x{}", hex::encode(self.serialize())))
            }
        }

        impl<'de> serde::Deserialize<'de> for $type {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> Result<Self, D::Error> {
                let bytes = deserializer.deserialize_str(serde_utils::hex::PrefixedHexVisitor)?;
                Self::deserialize(&bytes).map_err(|e| {
                    serde::de::Error::custom(format!("invalid signature: {:?}", e))
                })
            }
        }
    };
}

pub(crate) use impl_serde_ssz_tree_hash;

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};

    #[test]
    fn infinity_round_trips_through_ssz() {
        let sig = AggregateSignature::infinity();
        let bytes = sig.as_ssz_bytes();
        assert_eq!(bytes, INFINITY_SIGNATURE.to_vec());
        let decoded = AggregateSignature::from_ssz_bytes(&bytes).unwrap();
        assert_eq!(sig, decoded);
        assert!(decoded.is_infinity());
    }

    #[test]
    fn empty_signature_serializes_to_infinity() {
        let sig = Signature::empty();
        assert_eq!(sig.serialize(), INFINITY_SIGNATURE);
    }

    #[test]
    fn aggregating_onto_infinity_replaces_it() {
        let sig = Signature::empty();
        let mut agg = AggregateSignature::infinity();
        agg.add_assign(&sig);
        // Aggregating the infinity signature leaves the aggregate at infinity.
        assert_eq!(agg.serialize(), INFINITY_SIGNATURE);
    }
}
