//! The canonical store of everything known about each peer: connection state, handshake
//! artefacts (STATUS, METADATA), derived custody groups, and scores.
//!
//! Single-writer discipline: only the `PeerManager` mutates the DB; other components read
//! snapshots through the shared handle.

use crate::peer_manager::score::{PeerAction, Score, ScoreState};
use crate::rpc::methods::{GoodbyeReason, MetaData, StatusMessage};
use libp2p_identity::PeerId;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use types::data_column_custody_group::get_custody_groups;
use types::{ChainSpec, CustodyIndex, EthSpec};

/// How long a banned peer remains banned before its ban expires and it may reconnect.
pub const BAN_TIMEOUT_SECS: u64 = 60 * 60;
/// The fraction of peers with the worst gossipsub scores whose negative score is ignored when
/// blending, to prevent a noisy gossip environment from banning otherwise-useful peers.
pub const IGNORED_NEGATIVE_GOSSIPSUB_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Incoming,
    Outgoing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerConnectionStatus {
    /// The peer is connected.
    Connected,
    /// The peer is being disconnected (GOODBYE sent, awaiting the transport).
    Disconnecting,
    /// The peer has disconnected.
    Disconnected { since: Instant },
    /// The peer is banned and not connected.
    Banned { since: Instant },
}

/// Whether the peer's STATUS places it on our network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelevantStatus {
    #[default]
    Unknown,
    Relevant,
    Irrelevant,
}

/// Everything tracked for one peer.
#[derive(Debug)]
pub struct PeerInfo<E: EthSpec> {
    pub direction: ConnectionDirection,
    pub connection_status: PeerConnectionStatus,
    pub status: Option<StatusMessage>,
    pub metadata: Option<MetaData<E>>,
    pub agent_version: Option<String>,
    pub relevant_status: RelevantStatus,
    /// The peer's discv5 node id, when discovery supplied it. Required for custody-group
    /// derivation.
    pub node_id: Option<[u8; 32]>,
    /// Custody groups derived from `node_id` and the metadata's `custody_group_count`.
    pub custody_groups: Vec<CustodyIndex>,
    pub last_received_msg: Option<Instant>,
    pub last_status: Option<Instant>,
    pub connected_at: Instant,
    score: Score,
}

impl<E: EthSpec> PeerInfo<E> {
    fn new(direction: ConnectionDirection) -> Self {
        Self {
            direction,
            connection_status: PeerConnectionStatus::Connected,
            status: None,
            metadata: None,
            agent_version: None,
            relevant_status: RelevantStatus::Unknown,
            node_id: None,
            custody_groups: vec![],
            last_received_msg: None,
            last_status: None,
            connected_at: Instant::now(),
            score: Score::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_status, PeerConnectionStatus::Connected)
    }

    pub fn is_banned(&self) -> bool {
        matches!(self.connection_status, PeerConnectionStatus::Banned { .. })
            || self.score.state() == ScoreState::Banned
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    pub fn seq_number(&self) -> Option<u64> {
        self.metadata.as_ref().map(|metadata| metadata.seq_number())
    }

    /// True if the peer's metadata advertises a subscription to attestation subnet `subnet`.
    pub fn on_attnet(&self, subnet: u64) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.attnets().get(subnet as usize).ok())
            .unwrap_or(false)
    }

    /// True if the peer's metadata advertises a subscription to sync subnet `subnet`.
    pub fn on_syncnet(&self, subnet: u64) -> bool {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.syncnets())
            .and_then(|syncnets| syncnets.get(subnet as usize).ok())
            .unwrap_or(false)
    }

    pub fn custodies_group(&self, group: CustodyIndex) -> bool {
        self.custody_groups.contains(&group)
    }
}

/// The peer database, plus the score store surface (decay, blending, state and cool-down
/// queries).
pub struct PeerDB<E: EthSpec> {
    peers: HashMap<PeerId, PeerInfo<E>>,
    target_peers: usize,
}

impl<E: EthSpec> PeerDB<E> {
    pub fn new(target_peers: usize) -> Self {
        Self {
            peers: HashMap::new(),
            target_peers,
        }
    }

    pub fn target_peers(&self) -> usize {
        self.target_peers
    }

    pub fn peer_info(&self, peer_id: &PeerId) -> Option<&PeerInfo<E>> {
        self.peers.get(peer_id)
    }

    pub fn peer_info_mut(&mut self, peer_id: &PeerId) -> Option<&mut PeerInfo<E>> {
        self.peers.get_mut(peer_id)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = (&PeerId, &PeerInfo<E>)> {
        self.peers.iter().filter(|(_, info)| info.is_connected())
    }

    pub fn connected_peer_count(&self) -> usize {
        self.connected_peers().count()
    }

    /// Register a new connection. Returns `false` when the peer is banned and the connection
    /// should be rejected.
    pub fn register_connection(
        &mut self,
        peer_id: PeerId,
        direction: ConnectionDirection,
        node_id: Option<[u8; 32]>,
    ) -> bool {
        if let Some(info) = self.peers.get(&peer_id)
            && info.is_banned()
            && !ban_expired(&info.connection_status)
        {
            return false;
        }
        let mut info = PeerInfo::new(direction);
        info.node_id = node_id;
        self.peers.insert(peer_id, info);
        true
    }

    /// Register a transport-level disconnection.
    pub fn register_disconnection(&mut self, peer_id: &PeerId) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.connection_status = if info.score.state() == ScoreState::Banned {
                PeerConnectionStatus::Banned {
                    since: Instant::now(),
                }
            } else {
                PeerConnectionStatus::Disconnected {
                    since: Instant::now(),
                }
            };
        }
    }

    pub fn mark_disconnecting(&mut self, peer_id: &PeerId) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            info.connection_status = PeerConnectionStatus::Disconnecting;
        }
    }

    /// Store the peer's metadata, deriving custody groups when the node id is known.
    pub fn update_metadata(&mut self, peer_id: &PeerId, metadata: MetaData<E>, spec: &ChainSpec) {
        if let Some(info) = self.peers.get_mut(peer_id) {
            let custody_group_count = metadata
                .custody_group_count()
                .unwrap_or(spec.custody_requirement)
                .min(spec.number_of_custody_groups);
            if let Some(node_id) = info.node_id {
                info.custody_groups = get_custody_groups(node_id, custody_group_count, spec)
                    .unwrap_or_default();
            }
            info.metadata = Some(metadata);
        }
    }

    /*
     * Score store
     */

    /// Apply a reprimand. Returns the resulting score state.
    pub fn apply_peer_action(&mut self, peer_id: &PeerId, action: PeerAction) -> ScoreState {
        let Some(info) = self.peers.get_mut(peer_id) else {
            return ScoreState::Healthy;
        };
        info.score.apply_peer_action(action);
        let state = info.score.state();
        debug!(%peer_id, %action, score = info.score.score(), "Peer score adjusted");
        state
    }

    /// Decay all scores, expire old bans, and drop stale disconnected peers.
    pub fn update_scores(&mut self) {
        for info in self.peers.values_mut() {
            info.score.update();
        }
        // Unban peers whose ban has timed out and whose score recovered.
        for info in self.peers.values_mut() {
            if let PeerConnectionStatus::Banned { since } = info.connection_status
                && since.elapsed().as_secs() > BAN_TIMEOUT_SECS
                && info.score.state() != ScoreState::Banned
            {
                info.connection_status = PeerConnectionStatus::Disconnected { since };
            }
        }
        // Prune long-disconnected peers we hold no grudge against.
        self.peers.retain(|_, info| match info.connection_status {
            PeerConnectionStatus::Disconnected { since } => {
                since.elapsed().as_secs() <= BAN_TIMEOUT_SECS
                    || info.score.state() != ScoreState::Healthy
            }
            _ => true,
        });
    }

    /// The peer's current score state.
    pub fn score_state(&self, peer_id: &PeerId) -> ScoreState {
        self.peers
            .get(peer_id)
            .map(|info| info.score.state())
            .unwrap_or(ScoreState::Healthy)
    }

    /// How long a peer disconnected for `reason` must wait before we accept it again.
    pub fn reconnection_cooldown(&self, reason: GoodbyeReason) -> Duration {
        let minutes = match reason {
            GoodbyeReason::Banned | GoodbyeReason::BadScore => 60,
            GoodbyeReason::IrrelevantNetwork => 30,
            GoodbyeReason::TooManyPeers | GoodbyeReason::InboundDisconnect => 5,
            _ => 1,
        };
        Duration::from_secs(minutes * 60)
    }

    /// Blend fresh gossipsub scores into the peers' scores, ignoring the negative scores of
    /// the worst `ceil(target_peers / 10)` peers.
    pub fn update_gossipsub_scores(&mut self, gossipsub_scores: &HashMap<PeerId, f64>) {
        let mut to_ignore =
            ((self.target_peers as f64 * IGNORED_NEGATIVE_GOSSIPSUB_FRACTION).ceil()) as i32;

        // Worst-scored first, so the shield covers the bottom of the table.
        let mut peers = gossipsub_scores.iter().collect::<Vec<_>>();
        peers.sort_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        for (peer_id, new_score) in peers {
            if let Some(info) = self.peers.get_mut(peer_id) {
                let ignore = *new_score < 0.0 && to_ignore > 0;
                if ignore {
                    to_ignore -= 1;
                }
                info.score.update_gossipsub_score(*new_score, ignore);
            }
        }
    }

    /// Connected peers sorted worst-score first.
    pub fn worst_connected_peers(&self) -> Vec<(&PeerId, &PeerInfo<E>)> {
        let mut connected = self.connected_peers().collect::<Vec<_>>();
        connected.sort_by(|(_, a), (_, b)| {
            a.score()
                .partial_cmp(b.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        connected
    }
}

fn ban_expired(status: &PeerConnectionStatus) -> bool {
    match status {
        PeerConnectionStatus::Banned { since } => since.elapsed().as_secs() > BAN_TIMEOUT_SECS,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::MainnetEthSpec;

    type E = MainnetEthSpec;

    fn db() -> PeerDB<E> {
        PeerDB::new(50)
    }

    #[test]
    fn banned_peers_cannot_reconnect() {
        let mut db = db();
        let peer_id = PeerId::random();
        assert!(db.register_connection(peer_id, ConnectionDirection::Incoming, None));

        db.apply_peer_action(&peer_id, PeerAction::Fatal);
        db.register_disconnection(&peer_id);
        assert!(matches!(
            db.peer_info(&peer_id).unwrap().connection_status,
            PeerConnectionStatus::Banned { .. }
        ));
        assert!(!db.register_connection(peer_id, ConnectionDirection::Incoming, None));
    }

    #[test]
    fn gossipsub_blend_shields_the_worst_tenth() {
        let mut db = db();
        let peers = (0..3).map(|_| PeerId::random()).collect::<Vec<_>>();
        for peer_id in &peers {
            db.register_connection(*peer_id, ConnectionDirection::Incoming, None);
        }

        // target_peers = 50 → ceil(5) = 5 shielded; with only 3 peers all negative scores are
        // shielded.
        let scores = peers
            .iter()
            .map(|peer_id| (*peer_id, crate::peer_manager::score::GOSSIPSUB_GREYLIST_THRESHOLD))
            .collect::<HashMap<_, _>>();
        db.update_gossipsub_scores(&scores);
        for peer_id in &peers {
            assert_eq!(db.score_state(peer_id), ScoreState::Healthy);
        }

        // With a tiny target, only one peer is shielded and the rest go under.
        let mut small = PeerDB::<E>::new(1);
        for peer_id in &peers {
            small.register_connection(*peer_id, ConnectionDirection::Incoming, None);
        }
        small.update_gossipsub_scores(&scores);
        let unhealthy = peers
            .iter()
            .filter(|peer_id| small.score_state(peer_id) != ScoreState::Healthy)
            .count();
        assert_eq!(unhealthy, 2);
    }

    #[test]
    fn metadata_derives_custody_groups() {
        let mut db = db();
        let spec = ChainSpec::mainnet();
        let peer_id = PeerId::random();
        db.register_connection(peer_id, ConnectionDirection::Outgoing, Some([3u8; 32]));

        db.update_metadata(
            &peer_id,
            MetaData::V3(crate::rpc::methods::MetaDataV3 {
                seq_number: 1,
                attnets: Default::default(),
                syncnets: Default::default(),
                custody_group_count: 8,
            }),
            &spec,
        );

        let info = db.peer_info(&peer_id).unwrap();
        assert_eq!(info.custody_groups.len(), 8);
        assert_eq!(info.seq_number(), Some(1));
    }

    #[test]
    fn cooldown_scales_with_reason() {
        let db = db();
        assert!(
            db.reconnection_cooldown(GoodbyeReason::Banned)
                > db.reconnection_cooldown(GoodbyeReason::TooManyPeers)
        );
        assert!(
            db.reconnection_cooldown(GoodbyeReason::TooManyPeers)
                > db.reconnection_cooldown(GoodbyeReason::ClientShutdown)
        );
    }
}
