//! The peer-facing control plane of the beacon node: peer database and scoring, the
//! PING/STATUS/GOODBYE/METADATA lifecycle, heartbeat prioritization and the ReqResp wire
//! types.
//!
//! The libp2p transport, gossipsub and discv5 execute at the node's edge; this crate owns the
//! decisions they carry out.

pub mod metrics;
pub mod peer_manager;
pub mod rpc;

pub use libp2p_identity::PeerId;
pub use peer_manager::peerdb::{
    ConnectionDirection, PeerConnectionStatus, PeerDB, PeerInfo, RelevantStatus,
};
pub use peer_manager::prioritizer::{
    CustodyGroupDiscovery, PrioritizationOutcome, PriorityOptions, Subnet, SubnetDemand,
    SubnetDiscovery, prioritize_peers,
};
pub use peer_manager::score::{PeerAction, Score, ScoreState};
pub use peer_manager::{
    CHECK_TIMEOUTS_INTERVAL, HEARTBEAT_INTERVAL, PeerManager, PeerManagerConfig, PeerManagerEvent,
};
pub use rpc::methods::{GoodbyeReason, MetaData, Ping, StatusMessage};
