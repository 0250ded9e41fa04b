use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// The name of a hard fork of the beacon chain, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkName {
    Base,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
    Electra,
    Fulu,
}

impl ForkName {
    pub fn list_all() -> Vec<ForkName> {
        vec![
            ForkName::Base,
            ForkName::Altair,
            ForkName::Bellatrix,
            ForkName::Capella,
            ForkName::Deneb,
            ForkName::Electra,
            ForkName::Fulu,
        ]
    }

    pub fn latest() -> ForkName {
        ForkName::Fulu
    }

    /// Returns true if this fork is at or after Deneb (blob sidecars exist).
    pub fn deneb_enabled(self) -> bool {
        self >= ForkName::Deneb
    }

    /// Returns true if this fork is at or after Electra (on-chain aggregation).
    pub fn electra_enabled(self) -> bool {
        self >= ForkName::Electra
    }

    /// Returns true if this fork is at or after Fulu (PeerDAS data columns).
    pub fn fulu_enabled(self) -> bool {
        self >= ForkName::Fulu
    }
}

impl FromStr for ForkName {
    type Err = String;

    fn from_str(fork_name: &str) -> Result<Self, String> {
        Ok(match fork_name.to_lowercase().as_ref() {
            "phase0" | "base" => ForkName::Base,
            "altair" => ForkName::Altair,
            "bellatrix" | "merge" => ForkName::Bellatrix,
            "capella" => ForkName::Capella,
            "deneb" => ForkName::Deneb,
            "electra" => ForkName::Electra,
            "fulu" => ForkName::Fulu,
            _ => return Err(format!("unknown fork name: {}", fork_name)),
        })
    }
}

impl Display for ForkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            ForkName::Base => "phase0".fmt(f),
            ForkName::Altair => "altair".fmt(f),
            ForkName::Bellatrix => "bellatrix".fmt(f),
            ForkName::Capella => "capella".fmt(f),
            ForkName::Deneb => "deneb".fmt(f),
            ForkName::Electra => "electra".fmt(f),
            ForkName::Fulu => "fulu".fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fork_ordering() {
        assert!(ForkName::Base < ForkName::Deneb);
        assert!(ForkName::Deneb < ForkName::Electra);
        assert!(ForkName::Electra < ForkName::Fulu);
        assert!(ForkName::Fulu.deneb_enabled());
        assert!(!ForkName::Deneb.fulu_enabled());
    }

    #[test]
    fn fork_name_string_round_trip() {
        for fork in ForkName::list_all() {
            assert_eq!(ForkName::from_str(&fork.to_string()), Ok(fork));
        }
    }
}
