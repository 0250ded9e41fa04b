//! Heartbeat-time peer prioritization: decide which peers to drop, how many to dial, and
//! which subnets and custody groups to query discovery for.

use crate::peer_manager::peerdb::PeerDB;
use crate::rpc::methods::GoodbyeReason;
use libp2p_identity::PeerId;
use slot_clock::SlotClock;
use std::collections::HashMap;
use types::{CustodyIndex, EthSpec, Slot};

/// A subnet a peer can serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subnet {
    Attestation(u64),
    SyncCommittee(u64),
}

/// A discovery query for peers on a subnet, valid until `to_unix_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubnetDiscovery {
    pub subnet: Subnet,
    pub to_unix_ms: Option<u64>,
}

/// A discovery query for peers custodying a group, valid until `to_unix_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct CustodyGroupDiscovery {
    pub custody_group: CustodyIndex,
    pub to_unix_ms: Option<u64>,
}

/// A demanded subnet with the slot until which peers on it are needed.
#[derive(Debug, Clone, Copy)]
pub struct SubnetDemand {
    pub subnet: Subnet,
    pub until_slot: Slot,
}

#[derive(Debug, Clone)]
pub struct PriorityOptions {
    pub max_peers: usize,
    pub target_peers: usize,
    pub max_peers_to_discover: usize,
    /// When discovery is disabled the prioritizer still identifies disconnects; query vectors
    /// come back empty.
    pub discovery_enabled: bool,
}

/// The heartbeat's decisions.
#[derive(Debug, Default)]
pub struct PrioritizationOutcome {
    pub peers_to_disconnect: Vec<(PeerId, GoodbyeReason)>,
    /// How many additional peers discovery should try to find.
    pub peers_to_connect: usize,
    pub attnet_queries: Vec<SubnetDiscovery>,
    pub syncnet_queries: Vec<SubnetDiscovery>,
    pub custody_group_queries: Vec<CustodyGroupDiscovery>,
}

/// Compute the disconnect/connect sets and discovery queries for one heartbeat.
///
/// Excess peers are dropped worst-first, where "worst" combines score and how little of the
/// demanded subnet/custody coverage the peer uniquely provides; scarce coverage is retained.
pub fn prioritize_peers<E: EthSpec, S: SlotClock>(
    db: &PeerDB<E>,
    demanded_subnets: &[SubnetDemand],
    demanded_custody_groups: &[CustodyIndex],
    clock: &S,
    options: &PriorityOptions,
) -> PrioritizationOutcome {
    let mut outcome = PrioritizationOutcome::default();
    let connected = db.connected_peers().collect::<Vec<_>>();

    // How many connected peers cover each demand; zero-coverage demands become queries.
    let mut subnet_coverage: HashMap<Subnet, usize> = HashMap::new();
    for demand in demanded_subnets {
        subnet_coverage.insert(demand.subnet, 0);
    }
    let mut custody_coverage: HashMap<CustodyIndex, usize> = HashMap::new();
    for group in demanded_custody_groups {
        custody_coverage.insert(*group, 0);
    }

    for (_, info) in &connected {
        for demand in demanded_subnets {
            let covered = match demand.subnet {
                Subnet::Attestation(subnet) => info.on_attnet(subnet),
                Subnet::SyncCommittee(subnet) => info.on_syncnet(subnet),
            };
            if covered {
                *subnet_coverage.entry(demand.subnet).or_default() += 1;
            }
        }
        for group in demanded_custody_groups {
            if info.custodies_group(*group) {
                *custody_coverage.entry(*group).or_default() += 1;
            }
        }
    }

    // Disconnects: shed down to `target_peers`, never exceeding `max_peers`.
    let keep = options.target_peers.min(options.max_peers);
    let excess = connected.len().saturating_sub(keep);
    if excess > 0 {
        // A peer's retention value: its score plus the scarcity-weighted coverage it
        // provides.
        let mut valued = connected
            .iter()
            .map(|(peer_id, info)| {
                let mut coverage_value = 0.0f64;
                for demand in demanded_subnets {
                    let covered = match demand.subnet {
                        Subnet::Attestation(subnet) => info.on_attnet(subnet),
                        Subnet::SyncCommittee(subnet) => info.on_syncnet(subnet),
                    };
                    if covered {
                        let covering = subnet_coverage
                            .get(&demand.subnet)
                            .copied()
                            .unwrap_or(1)
                            .max(1);
                        coverage_value += 1.0 / covering as f64;
                    }
                }
                for group in demanded_custody_groups {
                    if info.custodies_group(*group) {
                        let covering =
                            custody_coverage.get(group).copied().unwrap_or(1).max(1);
                        coverage_value += 1.0 / covering as f64;
                    }
                }
                let value = info.score().score() + coverage_value;
                (**peer_id, value)
            })
            .collect::<Vec<_>>();

        valued.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        outcome.peers_to_disconnect = valued
            .into_iter()
            .take(excess)
            .map(|(peer_id, _)| (peer_id, GoodbyeReason::TooManyPeers))
            .collect();
    }

    // Connects: refill towards the target with healthy peers only.
    let healthy = connected
        .iter()
        .filter(|(_, info)| {
            info.score().state() == crate::peer_manager::score::ScoreState::Healthy
        })
        .count();
    outcome.peers_to_connect = options
        .target_peers
        .saturating_sub(healthy)
        .min(options.max_peers_to_discover);

    if !options.discovery_enabled {
        return outcome;
    }

    // Discovery queries for every uncovered demand.
    let to_unix_ms = |slot: Slot| {
        clock
            .start_of(slot)
            .map(|duration| duration.as_millis() as u64)
    };
    for demand in demanded_subnets {
        if subnet_coverage.get(&demand.subnet).copied().unwrap_or(0) == 0 {
            let query = SubnetDiscovery {
                subnet: demand.subnet,
                to_unix_ms: to_unix_ms(demand.until_slot),
            };
            match demand.subnet {
                Subnet::Attestation(_) => outcome.attnet_queries.push(query),
                Subnet::SyncCommittee(_) => outcome.syncnet_queries.push(query),
            }
        }
    }
    for group in demanded_custody_groups {
        if custody_coverage.get(group).copied().unwrap_or(0) == 0 {
            outcome.custody_group_queries.push(CustodyGroupDiscovery {
                custody_group: *group,
                to_unix_ms: None,
            });
        }
    }

    outcome
}
