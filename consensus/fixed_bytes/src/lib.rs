use alloy_primitives::FixedBytes;

pub type Hash64 = alloy_primitives::B64;
pub type Hash256 = alloy_primitives::B256;
pub type Uint256 = alloy_primitives::U256;

pub trait UintExtended: Sized {
    fn to_i64(self) -> i64;
}

pub trait FixedBytesExtended {
    fn from_low_u64_be(value: u64) -> Self;
    fn from_low_u64_le(value: u64) -> Self;
    fn zero() -> Self;
}

impl<const N: usize> FixedBytesExtended for FixedBytes<N> {
    fn from_low_u64_be(value: u64) -> Self {
        let value_bytes = value.to_be_bytes();
        let mut buffer = [0x0; N];
        let bytes_to_copy = value_bytes.len().min(buffer.len());
        // Panic-free because bytes_to_copy <= buffer.len()
        let start_index = buffer.len().saturating_sub(bytes_to_copy);
        // Panic-free because start_index <= buffer.len()
        // and bytes_to_copy <= value_bytes.len()
        buffer
            .get_mut(start_index..)
            .expect("start_index <= buffer.len()")
            .copy_from_slice(
                value_bytes
                    .get(value_bytes.len().saturating_sub(bytes_to_copy)..)
                    .expect("bytes_to_copy <= value_byte.len()"),
            );
        Self::from(buffer)
    }

    fn from_low_u64_le(value: u64) -> Self {
        let value_bytes = value.to_le_bytes();
        let mut buffer = [0x0; N];
        let bytes_to_copy = value_bytes.len().min(buffer.len());
        buffer
            .get_mut(..bytes_to_copy)
            .expect("bytes_to_copy <= buffer.len()")
            .copy_from_slice(
                value_bytes
                    .get(..bytes_to_copy)
                    .expect("bytes_to_copy <= value_byte.len()"),
            );
        Self::from(buffer)
    }

    fn zero() -> Self {
        Self::ZERO
    }
}

impl UintExtended for Uint256 {
    /// Trims the `Uint256` to its lowest 8 bytes and converts to an i64.
    fn to_i64(self) -> i64 {
        i64::from_le_bytes(self.to_le_bytes::<32>()[0..8].try_into().unwrap())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_low_u64_be_roundtrip() {
        let hash = Hash256::from_low_u64_be(0xdead_beef);
        assert_eq!(&hash.as_slice()[..28], &[0u8; 28]);
        assert_eq!(&hash.as_slice()[28..], &0xdead_beef_u32.to_be_bytes());
    }

    #[test]
    fn from_low_u64_le_roundtrip() {
        let hash = Hash256::from_low_u64_le(0xdead_beef);
        assert_eq!(&hash.as_slice()[..8], &0xdead_beef_u64.to_le_bytes());
        assert_eq!(&hash.as_slice()[8..], &[0u8; 24]);
    }

    #[test]
    fn zero_is_default() {
        assert_eq!(Hash256::zero(), Hash256::default());
    }
}
