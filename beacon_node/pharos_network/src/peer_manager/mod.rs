//! The per-peer PING/STATUS/METADATA/GOODBYE lifecycle, periodic timers, score-driven
//! disconnects and heartbeat prioritization.
//!
//! The libp2p swarm and discv5 worker live at the node's edge: the manager consumes their
//! notifications and emits [`PeerManagerEvent`]s for them to execute.

pub mod peerdb;
pub mod prioritizer;
pub mod score;

use crate::metrics;
use crate::rpc::methods::{GoodbyeReason, MetaData, StatusMessage};
use fork_choice::SharedForkChoice;
use libp2p_identity::PeerId;
use peerdb::{ConnectionDirection, PeerDB, RelevantStatus};
use prioritizer::{
    CustodyGroupDiscovery, PriorityOptions, SubnetDemand, SubnetDiscovery, prioritize_peers,
};
use score::{PeerAction, ScoreState};
use slot_clock::SlotClock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use types::{ChainSpec, CustodyIndex, EthSpec, Slot};

/// Interval of the timeout sweep requesting PINGs and STATUSes.
pub const CHECK_TIMEOUTS_INTERVAL: Duration = Duration::from_secs(10);
/// The heartbeat performs score decay, pruning and prioritization.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Inbound peers ping us; we ping them less eagerly.
const PING_INTERVAL_INBOUND: Duration = Duration::from_secs(20);
const PING_INTERVAL_OUTBOUND: Duration = Duration::from_secs(15);
/// How often a fresh STATUS exchange is requested per peer.
const STATUS_INTERVAL: Duration = Duration::from_secs(300);
/// If the head has not advanced for this many slots the fleet is considered starved.
pub const STARVATION_THRESHOLD_SLOTS_FACTOR: u64 = 2;
/// The share of peers aggressively pruned per heartbeat while starved.
const STARVATION_PRUNE_RATIO: f64 = 0.05;

/// Instructions for the network driver.
#[derive(Debug, PartialEq)]
pub enum PeerManagerEvent {
    /// Request a PING from the peer.
    Ping(PeerId),
    /// Request a STATUS exchange with the peer.
    Status(PeerId),
    /// Request the peer's METADATA.
    MetaData(PeerId),
    /// Send a GOODBYE with the reason and disconnect.
    Goodbye(PeerId, GoodbyeReason),
    /// The peer passed the handshake and is usable; committed only after its STATUS passed
    /// relevance checks.
    PeerConnected(PeerId),
    /// The peer disconnected at the transport level.
    PeerDisconnected(PeerId),
    /// Dispatch subnet queries to the discovery worker.
    DiscoverSubnetPeers(Vec<SubnetDiscovery>),
    /// Dispatch custody-group queries to the discovery worker.
    DiscoverCustodyPeers(Vec<CustodyGroupDiscovery>),
    /// Dial this many new peers from the discovery pool.
    DialPeers(usize),
}

pub struct PeerManagerConfig {
    pub target_peers: usize,
    pub max_peers: usize,
    pub max_peers_to_discover: usize,
    pub discovery_enabled: bool,
    /// Our fork digest, matched against peers' STATUS.
    pub fork_digest: [u8; 4],
}

impl Default for PeerManagerConfig {
    fn default() -> Self {
        Self {
            target_peers: 50,
            max_peers: 55,
            max_peers_to_discover: 16,
            discovery_enabled: true,
            fork_digest: [0; 4],
        }
    }
}

/// The peer manager: owns the peer DB (single writer) and the per-peer protocol lifecycle.
pub struct PeerManager<E: EthSpec, S: SlotClock> {
    db: PeerDB<E>,
    config: PeerManagerConfig,
    fork_choice: SharedForkChoice,
    slot_clock: S,
    spec: ChainSpec,
    events: VecDeque<PeerManagerEvent>,
    /// Subnet demand fed by the attestation/sync services.
    demanded_subnets: Vec<SubnetDemand>,
    /// Custody-group demand fed by the custody context.
    demanded_custody_groups: Vec<CustodyIndex>,
    /// The head slot at the last heartbeat, for starvation detection.
    last_head_slot: Slot,
    last_head_advance: Instant,
}

impl<E: EthSpec, S: SlotClock> PeerManager<E, S> {
    pub fn new(
        config: PeerManagerConfig,
        fork_choice: SharedForkChoice,
        slot_clock: S,
        spec: ChainSpec,
    ) -> Self {
        Self {
            db: PeerDB::new(config.target_peers),
            config,
            fork_choice,
            slot_clock,
            spec,
            events: VecDeque::new(),
            demanded_subnets: vec![],
            demanded_custody_groups: vec![],
            last_head_slot: Slot::new(0),
            last_head_advance: Instant::now(),
        }
    }

    pub fn peer_db(&self) -> &PeerDB<E> {
        &self.db
    }

    /// Drain the pending instructions for the network driver.
    pub fn poll_events(&mut self) -> Vec<PeerManagerEvent> {
        self.events.drain(..).collect()
    }

    pub fn set_demanded_subnets(&mut self, demands: Vec<SubnetDemand>) {
        self.demanded_subnets = demands;
    }

    pub fn set_demanded_custody_groups(&mut self, groups: Vec<CustodyIndex>) {
        self.demanded_custody_groups = groups;
    }

    /*
     * Connection lifecycle
     */

    /// A transport connection opened. Outbound peers are immediately PINGed and STATUSed.
    pub fn on_connection_established(
        &mut self,
        peer_id: PeerId,
        direction: ConnectionDirection,
        node_id: Option<[u8; 32]>,
    ) {
        if !self.db.register_connection(peer_id, direction, node_id) {
            debug!(%peer_id, "Rejecting connection from banned peer");
            self.events
                .push_back(PeerManagerEvent::Goodbye(peer_id, GoodbyeReason::Banned));
            return;
        }
        metrics::inc_counter(&metrics::PEER_CONNECT_EVENT_COUNT);
        if direction == ConnectionDirection::Outgoing {
            self.events.push_back(PeerManagerEvent::Ping(peer_id));
            self.events.push_back(PeerManagerEvent::Status(peer_id));
        }
    }

    /// A transport connection closed.
    pub fn on_connection_closed(&mut self, peer_id: &PeerId) {
        self.db.register_disconnection(peer_id);
        metrics::inc_counter(&metrics::PEER_DISCONNECT_EVENT_COUNT);
        self.events
            .push_back(PeerManagerEvent::PeerDisconnected(*peer_id));
    }

    /*
     * RPC message handling. Every inbound message refreshes the peer's liveness.
     */

    /// An inbound or outbound STATUS completed for this peer.
    pub fn on_status(&mut self, peer_id: &PeerId, status: StatusMessage) {
        let relevant = self.assess_relevance(&status);
        let newly_relevant = {
            let Some(info) = self.db.peer_info_mut(peer_id) else {
                return;
            };
            info.last_received_msg = Some(Instant::now());
            info.last_status = Some(Instant::now());
            info.status = Some(status);

            // The relevance verdict is committed before announcing the peer.
            if relevant {
                let newly_relevant = info.relevant_status != RelevantStatus::Relevant;
                info.relevant_status = RelevantStatus::Relevant;
                newly_relevant
            } else {
                info.relevant_status = RelevantStatus::Irrelevant;
                false
            }
        };

        if relevant {
            if newly_relevant {
                self.events
                    .push_back(PeerManagerEvent::PeerConnected(*peer_id));
            }
        } else {
            debug!(%peer_id, "Peer is on an irrelevant network");
            self.goodbye_peer(peer_id, GoodbyeReason::IrrelevantNetwork);
        }
    }

    /// A PING or PONG carrying the peer's metadata sequence number.
    pub fn on_ping(&mut self, peer_id: &PeerId, seq: u64) {
        let needs_metadata = {
            let Some(info) = self.db.peer_info_mut(peer_id) else {
                return;
            };
            info.last_received_msg = Some(Instant::now());
            // A sequence number ahead of the cached metadata means it is stale.
            info.seq_number().is_none_or(|cached| seq > cached)
        };
        if needs_metadata {
            self.events.push_back(PeerManagerEvent::MetaData(*peer_id));
        }
    }

    /// The peer answered a METADATA request.
    pub fn on_metadata_response(&mut self, peer_id: &PeerId, metadata: MetaData<E>) {
        if let Some(info) = self.db.peer_info_mut(peer_id) {
            info.last_received_msg = Some(Instant::now());
        }
        let spec = self.spec.clone();
        self.db.update_metadata(peer_id, metadata, &spec);
    }

    /// The peer said GOODBYE.
    pub fn on_goodbye_received(&mut self, peer_id: &PeerId, reason: GoodbyeReason) {
        debug!(%peer_id, %reason, "Peer sent Goodbye");
        self.db.mark_disconnecting(peer_id);
    }

    /// Report a peer for misbehaviour. Scores every ReqResp and gossip offence; repeated
    /// offences escalate to bans.
    pub fn report_peer(&mut self, peer_id: &PeerId, action: PeerAction, msg: &'static str) {
        let state = self.db.apply_peer_action(peer_id, action);
        metrics::inc_counter_vec(&metrics::PEER_ACTION_EVENTS_PER_CLIENT, &[msg]);
        match state {
            ScoreState::Banned => self.goodbye_peer(peer_id, GoodbyeReason::Banned),
            ScoreState::Disconnected => self.goodbye_peer(peer_id, GoodbyeReason::BadScore),
            ScoreState::Healthy => {}
        }
    }

    /// Fresh gossipsub scores arrived (called per gossipsub decay interval).
    pub fn update_gossipsub_scores(
        &mut self,
        gossipsub_scores: &std::collections::HashMap<PeerId, f64>,
    ) {
        self.db.update_gossipsub_scores(gossipsub_scores);
    }

    /*
     * Timers
     */

    /// Runs every `CHECK_TIMEOUTS_INTERVAL`: request PINGs from quiet peers and refresh stale
    /// STATUSes.
    pub fn check_timeouts(&mut self) {
        let now = Instant::now();
        let mut to_ping = vec![];
        let mut to_status = vec![];
        for (peer_id, info) in self.db.connected_peers() {
            let ping_interval = match info.direction {
                ConnectionDirection::Incoming => PING_INTERVAL_INBOUND,
                ConnectionDirection::Outgoing => PING_INTERVAL_OUTBOUND,
            };
            let quiet_for = info
                .last_received_msg
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_else(|| now.saturating_duration_since(info.connected_at));
            if quiet_for > ping_interval {
                to_ping.push(*peer_id);
            }

            let status_age = info
                .last_status
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_else(|| now.saturating_duration_since(info.connected_at));
            if status_age > STATUS_INTERVAL {
                to_status.push(*peer_id);
            }
        }
        for peer_id in to_ping {
            self.events.push_back(PeerManagerEvent::Ping(peer_id));
        }
        for peer_id in to_status {
            self.events.push_back(PeerManagerEvent::Status(peer_id));
        }
    }

    /// Runs every `HEARTBEAT_INTERVAL`: decay scores, shed bad peers, detect starvation and
    /// invoke the prioritizer.
    pub fn heartbeat(&mut self) {
        self.db.update_scores();

        // Disconnect or ban peers whose decayed score crossed a threshold.
        let to_shed = self
            .db
            .connected_peers()
            .filter_map(|(peer_id, info)| match info.score().state() {
                ScoreState::Banned => Some((*peer_id, GoodbyeReason::Banned)),
                ScoreState::Disconnected => Some((*peer_id, GoodbyeReason::BadScore)),
                ScoreState::Healthy => None,
            })
            .collect::<Vec<_>>();
        for (peer_id, reason) in to_shed {
            self.goodbye_peer(&peer_id, reason);
        }

        self.starvation_prune();

        let outcome = prioritize_peers(
            &self.db,
            &self.demanded_subnets,
            &self.demanded_custody_groups,
            &self.slot_clock,
            &PriorityOptions {
                max_peers: self.config.max_peers,
                target_peers: self.config.target_peers,
                max_peers_to_discover: self.config.max_peers_to_discover,
                discovery_enabled: self.config.discovery_enabled,
            },
        );
        for (peer_id, reason) in outcome.peers_to_disconnect {
            self.goodbye_peer(&peer_id, reason);
        }
        if outcome.peers_to_connect > 0 {
            self.events
                .push_back(PeerManagerEvent::DialPeers(outcome.peers_to_connect));
        }
        let mut subnet_queries = outcome.attnet_queries;
        subnet_queries.extend(outcome.syncnet_queries);
        if !subnet_queries.is_empty() {
            self.events
                .push_back(PeerManagerEvent::DiscoverSubnetPeers(subnet_queries));
        }
        if !outcome.custody_group_queries.is_empty() {
            self.events.push_back(PeerManagerEvent::DiscoverCustodyPeers(
                outcome.custody_group_queries,
            ));
        }

        metrics::set_gauge(
            &metrics::PEERS_CONNECTED,
            self.db.connected_peer_count() as i64,
        );
    }

    /// GOODBYE every peer and clear state, for node shutdown.
    pub fn close(&mut self) {
        let peers = self
            .db
            .connected_peers()
            .map(|(peer_id, _)| *peer_id)
            .collect::<Vec<_>>();
        for peer_id in peers {
            self.goodbye_peer(&peer_id, GoodbyeReason::ClientShutdown);
        }
    }

    /// The chain processor reports head advances here; starvation is measured against the
    /// last advance.
    pub fn update_head_slot(&mut self, head_slot: Slot) {
        if head_slot > self.last_head_slot {
            self.last_head_slot = head_slot;
            self.last_head_advance = Instant::now();
        }
    }

    /// If the head has stalled for `2 * SLOTS_PER_EPOCH` slots, aggressively prune 5% of
    /// peers per heartbeat to make room for discovery to find better ones.
    fn starvation_prune(&mut self) {
        let starvation_threshold = Duration::from_secs(
            STARVATION_THRESHOLD_SLOTS_FACTOR
                * E::slots_per_epoch()
                * self.spec.seconds_per_slot,
        );
        if self.last_head_advance.elapsed() < starvation_threshold {
            return;
        }

        let prune_count = ((self.db.connected_peer_count() as f64 * STARVATION_PRUNE_RATIO)
            .ceil()) as usize;
        if prune_count == 0 {
            return;
        }
        warn!(
            head_slot = %self.last_head_slot,
            prune_count, "Chain appears starved, pruning peers to refresh the fleet"
        );
        let to_prune = self
            .db
            .worst_connected_peers()
            .into_iter()
            .take(prune_count)
            .map(|(peer_id, _)| *peer_id)
            .collect::<Vec<_>>();
        for peer_id in to_prune {
            self.goodbye_peer(&peer_id, GoodbyeReason::TooManyPeers);
        }
    }

    fn goodbye_peer(&mut self, peer_id: &PeerId, reason: GoodbyeReason) {
        if self
            .db
            .peer_info(peer_id)
            .is_some_and(|info| info.is_connected())
        {
            self.db.mark_disconnecting(peer_id);
            self.events
                .push_back(PeerManagerEvent::Goodbye(*peer_id, reason));
        }
    }

    /// Fork-digest alignment plus finalized-checkpoint ancestry up to the current clock slot.
    fn assess_relevance(&self, status: &StatusMessage) -> bool {
        if status.fork_digest() != self.config.fork_digest {
            return false;
        }
        let Some(clock_slot) = self.slot_clock.now() else {
            return true;
        };
        let clock_epoch = clock_slot.epoch(E::slots_per_epoch());
        // A peer claiming finality ahead of the wall clock is lying about its chain.
        if status.finalized_epoch() > clock_epoch {
            return false;
        }

        let fork_choice = self.fork_choice.read();
        let local_finalized = fork_choice.finalized_checkpoint();
        if status.finalized_epoch() == local_finalized.epoch
            && local_finalized.epoch > types::Epoch::new(0)
            && status.finalized_root() != local_finalized.root
        {
            // Same finalized epoch with a conflicting root: provably a different chain.
            return false;
        }
        if status.finalized_epoch() < local_finalized.epoch
            && !fork_choice.is_empty()
            && fork_choice.contains_block(&status.head_root())
        {
            // We know their head; ancestry is fine.
            return true;
        }
        // Otherwise we cannot prove irrelevance; give the benefit of the doubt.
        true
    }
}
