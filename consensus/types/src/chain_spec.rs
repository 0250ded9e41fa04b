use crate::{Epoch, EthSpec, ForkName, Slot};
use serde::{Deserialize, Serialize};

/// Runtime configuration for the beacon chain: fork schedule, data-availability windows and
/// PeerDAS custody parameters.
///
/// Values with no network-level variance live on [`crate::EthSpec`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSpec {
    /*
     * Time parameters
     */
    pub genesis_slot: Slot,
    pub seconds_per_slot: u64,

    /*
     * Fork schedule. `None` means the fork never activates.
     */
    pub altair_fork_epoch: Option<Epoch>,
    pub bellatrix_fork_epoch: Option<Epoch>,
    pub capella_fork_epoch: Option<Epoch>,
    pub deneb_fork_epoch: Option<Epoch>,
    pub electra_fork_epoch: Option<Epoch>,
    pub fulu_fork_epoch: Option<Epoch>,

    /*
     * Attestation inclusion
     */
    pub min_attestation_inclusion_delay: u64,
    pub max_attestations: usize,
    pub max_attestations_electra: usize,
    pub effective_balance_increment: u64,

    /*
     * Blob / data-column retention and limits
     */
    pub min_epochs_for_blob_sidecars_requests: u64,
    pub min_epochs_for_data_column_sidecars_requests: u64,
    pub max_blobs_per_block_deneb: u64,
    pub max_blobs_per_block_electra: u64,
    pub max_blobs_per_block_fulu: u64,

    /*
     * Networking
     */
    pub max_request_blocks: u64,
    pub max_request_blocks_deneb: u64,
    pub max_request_blob_sidecars: u64,
    pub max_request_data_column_sidecars: u64,
    pub attestation_subnet_count: u64,
    pub data_column_sidecar_subnet_count: u64,

    /*
     * PeerDAS custody
     */
    pub number_of_columns: u64,
    pub number_of_custody_groups: u64,
    pub custody_requirement: u64,
    pub validator_custody_requirement: u64,
    pub balance_per_additional_custody_group: u64,
    pub samples_per_slot: u64,
}

impl ChainSpec {
    /// Returns the name of the fork which is active at `slot`.
    pub fn fork_name_at_slot<E: EthSpec>(&self, slot: Slot) -> ForkName {
        self.fork_name_at_epoch(slot.epoch(E::slots_per_epoch()))
    }

    /// Returns the name of the fork which is active at `epoch`.
    pub fn fork_name_at_epoch(&self, epoch: Epoch) -> ForkName {
        match self.fulu_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Fulu,
            _ => (),
        }
        match self.electra_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Electra,
            _ => (),
        }
        match self.deneb_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Deneb,
            _ => (),
        }
        match self.capella_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Capella,
            _ => (),
        }
        match self.bellatrix_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Bellatrix,
            _ => (),
        }
        match self.altair_fork_epoch {
            Some(fork_epoch) if epoch >= fork_epoch => return ForkName::Altair,
            _ => (),
        }
        ForkName::Base
    }

    /// Returns true if PeerDAS (Fulu) is active at `epoch`.
    pub fn is_peer_das_enabled_for_epoch(&self, epoch: Epoch) -> bool {
        self.fulu_fork_epoch
            .is_some_and(|fulu_epoch| epoch >= fulu_epoch)
    }

    /// Returns the maximum number of blobs per block at `epoch`.
    pub fn max_blobs_per_block(&self, epoch: Epoch) -> u64 {
        match self.fork_name_at_epoch(epoch) {
            ForkName::Fulu => self.max_blobs_per_block_fulu,
            ForkName::Electra => self.max_blobs_per_block_electra,
            _ => self.max_blobs_per_block_deneb,
        }
    }

    /// Returns the maximum `count` a `BeaconBlocksByRange` request may carry at `fork`.
    pub fn max_request_blocks(&self, fork_name: ForkName) -> u64 {
        if fork_name.deneb_enabled() {
            self.max_request_blocks_deneb
        } else {
            self.max_request_blocks
        }
    }

    /// The number of custody groups a node must sample per slot, given its custody group count.
    ///
    /// Errors if `custody_group_count` exceeds the number of custody groups.
    pub fn sampling_size_custody_groups(&self, custody_group_count: u64) -> Result<u64, String> {
        if custody_group_count > self.number_of_custody_groups {
            return Err(format!(
                "custody_group_count {} exceeds number_of_custody_groups {}",
                custody_group_count, self.number_of_custody_groups
            ));
        }
        Ok(std::cmp::max(custody_group_count, self.samples_per_slot)
            .min(self.number_of_custody_groups))
    }

    /// The number of columns a node must sample per slot, given its custody group count.
    pub fn sampling_size_columns<E: EthSpec>(
        &self,
        custody_group_count: u64,
    ) -> Result<usize, String> {
        let groups = self.sampling_size_custody_groups(custody_group_count)?;
        let columns_per_group = self.number_of_columns / self.number_of_custody_groups;
        Ok((groups * columns_per_group) as usize)
    }

    /// Returns a `ChainSpec` compatible with the Ethereum Foundation mainnet, with every fork
    /// enabled from genesis (the configuration used across this workspace's tests).
    pub fn mainnet() -> Self {
        Self {
            genesis_slot: Slot::new(0),
            seconds_per_slot: 12,
            altair_fork_epoch: Some(Epoch::new(0)),
            bellatrix_fork_epoch: Some(Epoch::new(0)),
            capella_fork_epoch: Some(Epoch::new(0)),
            deneb_fork_epoch: Some(Epoch::new(0)),
            electra_fork_epoch: Some(Epoch::new(0)),
            fulu_fork_epoch: None,
            min_attestation_inclusion_delay: 1,
            max_attestations: 128,
            max_attestations_electra: 8,
            effective_balance_increment: 1_000_000_000,
            min_epochs_for_blob_sidecars_requests: 4096,
            min_epochs_for_data_column_sidecars_requests: 4096,
            max_blobs_per_block_deneb: 6,
            max_blobs_per_block_electra: 9,
            max_blobs_per_block_fulu: 12,
            max_request_blocks: 1024,
            max_request_blocks_deneb: 128,
            max_request_blob_sidecars: 768,
            max_request_data_column_sidecars: 16384,
            attestation_subnet_count: 64,
            data_column_sidecar_subnet_count: 128,
            number_of_columns: 128,
            number_of_custody_groups: 128,
            custody_requirement: 4,
            validator_custody_requirement: 8,
            balance_per_additional_custody_group: 32_000_000_000,
            samples_per_slot: 8,
        }
    }

    /// Returns a `ChainSpec` compatible with the specification suitable for test suites.
    pub fn minimal() -> Self {
        Self {
            max_request_blocks: 1024,
            max_request_blocks_deneb: 128,
            custody_requirement: 4,
            samples_per_slot: 8,
            ..Self::mainnet()
        }
    }
}

impl Default for ChainSpec {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MainnetEthSpec;

    fn fulu_spec() -> ChainSpec {
        let mut spec = ChainSpec::mainnet();
        spec.fulu_fork_epoch = Some(Epoch::new(10));
        spec
    }

    #[test]
    fn fork_name_follows_schedule() {
        let spec = fulu_spec();
        assert_eq!(spec.fork_name_at_epoch(Epoch::new(0)), ForkName::Electra);
        assert_eq!(spec.fork_name_at_epoch(Epoch::new(9)), ForkName::Electra);
        assert_eq!(spec.fork_name_at_epoch(Epoch::new(10)), ForkName::Fulu);
        assert_eq!(
            spec.fork_name_at_slot::<MainnetEthSpec>(Slot::new(10 * 32)),
            ForkName::Fulu
        );
    }

    #[test]
    fn peer_das_gating() {
        let spec = fulu_spec();
        assert!(!spec.is_peer_das_enabled_for_epoch(Epoch::new(9)));
        assert!(spec.is_peer_das_enabled_for_epoch(Epoch::new(10)));
    }

    #[test]
    fn sampling_size_has_floor_and_ceiling() {
        let spec = ChainSpec::mainnet();
        // Minimum is SAMPLES_PER_SLOT.
        assert_eq!(spec.sampling_size_custody_groups(4).unwrap(), 8);
        // Above the floor, it is the custody group count.
        assert_eq!(spec.sampling_size_custody_groups(64).unwrap(), 64);
        // Never more than the number of custody groups.
        assert_eq!(spec.sampling_size_custody_groups(128).unwrap(), 128);
        assert!(spec.sampling_size_custody_groups(129).is_err());
    }

    #[test]
    fn max_blobs_per_block_by_fork() {
        let spec = fulu_spec();
        assert_eq!(spec.max_blobs_per_block(Epoch::new(0)), 9);
        assert_eq!(spec.max_blobs_per_block(Epoch::new(10)), 12);
    }
}
