use crate::{Epoch, Hash256};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use std::fmt;
use tree_hash_derive::TreeHash;

/// Casper FFG checkpoint, used in attestations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Encode,
    Decode,
    TreeHash,
)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Hash256,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.epoch, self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ssz::{Decode, Encode};

    #[test]
    fn ssz_round_trip() {
        let checkpoint = Checkpoint {
            epoch: Epoch::new(42),
            root: Hash256::repeat_byte(3),
        };
        let bytes = checkpoint.as_ssz_bytes();
        assert_eq!(bytes.len(), 40);
        assert_eq!(Checkpoint::from_ssz_bytes(&bytes).unwrap(), checkpoint);
    }
}
