use crate::consts::altair::NUM_FLAG_INDICES;
use serde::{Deserialize, Serialize};
use ssz::{Decode, DecodeError, Encode};

/// Per-validator participation flags for an epoch (altair accounting).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipationFlags {
    #[serde(with = "serde_utils::quoted_u8")]
    bits: u8,
}

impl ParticipationFlags {
    pub fn add_flag(&mut self, flag_index: usize) -> Result<(), String> {
        if flag_index >= NUM_FLAG_INDICES {
            return Err(format!("flag index out of bounds: {}", flag_index));
        }
        self.bits |= 1u8 << flag_index;
        Ok(())
    }

    pub fn has_flag(&self, flag_index: usize) -> Result<bool, String> {
        if flag_index >= NUM_FLAG_INDICES {
            return Err(format!("flag index out of bounds: {}", flag_index));
        }
        Ok(self.bits & (1u8 << flag_index) != 0)
    }

    pub fn into_u8(self) -> u8 {
        self.bits
    }
}

impl From<u8> for ParticipationFlags {
    fn from(bits: u8) -> Self {
        Self { bits }
    }
}

impl Encode for ParticipationFlags {
    fn is_ssz_fixed_len() -> bool {
        <u8 as Encode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <u8 as Encode>::ssz_fixed_len()
    }

    fn ssz_bytes_len(&self) -> usize {
        self.bits.ssz_bytes_len()
    }

    fn ssz_append(&self, buf: &mut Vec<u8>) {
        self.bits.ssz_append(buf)
    }
}

impl Decode for ParticipationFlags {
    fn is_ssz_fixed_len() -> bool {
        <u8 as Decode>::is_ssz_fixed_len()
    }

    fn ssz_fixed_len() -> usize {
        <u8 as Decode>::ssz_fixed_len()
    }

    fn from_ssz_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        u8::from_ssz_bytes(bytes).map(|bits| Self { bits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::altair::{TIMELY_SOURCE_FLAG_INDEX, TIMELY_TARGET_FLAG_INDEX};

    #[test]
    fn flags_are_independent() {
        let mut flags = ParticipationFlags::default();
        flags.add_flag(TIMELY_TARGET_FLAG_INDEX).unwrap();
        assert!(flags.has_flag(TIMELY_TARGET_FLAG_INDEX).unwrap());
        assert!(!flags.has_flag(TIMELY_SOURCE_FLAG_INDEX).unwrap());
        assert!(flags.has_flag(NUM_FLAG_INDICES).is_err());
    }
}
