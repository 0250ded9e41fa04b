//! Resolution of blocks referenced by gossip but missing from fork choice: walk unknown
//! parents and roots through peers until the chain links up, with a bounded pending set.

use crate::metrics;
use beacon_chain::BlockInput;
use fork_choice::SharedForkChoice;
use lru_cache::LRUTimeCache;
use pharos_network::rpc::methods::BlocksByRootRequest;
use pharos_network::{PeerAction, PeerDB, PeerId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use types::{ChainSpec, EthSpec, Hash256, SignedBeaconBlock, Slot};

/// The maximum number of roots kept pending resolution. New requests beyond the cap are
/// dropped: lookup sync recovers them later via descendants.
pub const MAX_PENDING_BLOCKS: usize = 64;
/// How long a chain that failed processing is remembered so its blocks are not re-fetched.
const FAILED_CHAINS_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
enum LookupState {
    AwaitingDownload,
    Downloading(PeerId),
}

#[derive(Debug)]
struct PendingLookup<E: EthSpec> {
    state: LookupState,
    /// Peers claiming to know this root.
    available_peers: HashSet<PeerId>,
    /// Peers that failed or are serving another lookup right now.
    in_flight_or_failed: HashSet<PeerId>,
    /// The child input waiting on this root, when the lookup came from an unknown-parent
    /// observation.
    child: Option<BlockInput<E>>,
}

/// A `BeaconBlocksByRoot` request the worker should issue.
#[derive(Debug, PartialEq)]
pub struct ResolverRequest {
    pub peer_id: PeerId,
    pub request: BlocksByRootRequest,
}

/// The verdict on a by-root response.
#[derive(Debug)]
pub enum ResolutionOutcome<E: EthSpec> {
    /// The block's parent is known: send the block to the chain processor, followed by the
    /// child that was parked waiting on it, if any.
    Process {
        block: Arc<SignedBeaconBlock<E>>,
        parked_child: Option<BlockInput<E>>,
    },
    /// The parent is also unknown: it has been enqueued and the block is parked.
    ParentUnknown { parent_root: Hash256 },
    /// The response did not advance the lookup; the listed action, if any, punishes the peer.
    Ignored { peer_action: Option<PeerAction> },
}

/// Walks unknown parents/roots through peers. Single-writer: owned by the sync task.
pub struct UnknownBlockResolver<E: EthSpec> {
    fork_choice: SharedForkChoice,
    pending: HashMap<Hash256, PendingLookup<E>>,
    /// Chains that failed processing; their roots are not re-queued for a while.
    failed_chains: LRUTimeCache<Hash256>,
    spec: ChainSpec,
}

impl<E: EthSpec> UnknownBlockResolver<E> {
    pub fn new(fork_choice: SharedForkChoice, spec: ChainSpec) -> Self {
        Self {
            fork_choice,
            pending: HashMap::new(),
            failed_chains: LRUTimeCache::new(FAILED_CHAINS_TTL),
            spec,
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, block_root: &Hash256) -> bool {
        self.pending.contains_key(block_root)
    }

    /// An attestation or sidecar referenced `block_root` and fork choice does not know it.
    pub fn search_unknown_block_root(&mut self, block_root: Hash256, peer_id: PeerId) {
        self.enqueue(block_root, peer_id, None);
    }

    /// A gossip block arrived whose parent is unknown: park the child and look the parent up.
    pub fn search_unknown_parent(&mut self, child: BlockInput<E>, peer_id: PeerId) {
        let Some(parent_root) = child.parent_root() else {
            return;
        };
        self.enqueue(parent_root, peer_id, Some(child));
    }

    fn enqueue(&mut self, block_root: Hash256, peer_id: PeerId, child: Option<BlockInput<E>>) {
        if self.fork_choice.read().contains_block(&block_root) {
            return;
        }
        if self.failed_chains.raw_contains(&block_root) {
            debug!(?block_root, "Ignoring lookup for failed chain");
            return;
        }
        if let Some(lookup) = self.pending.get_mut(&block_root) {
            lookup.available_peers.insert(peer_id);
            return;
        }
        if self.pending.len() >= MAX_PENDING_BLOCKS {
            metrics::inc_counter(&metrics::SYNC_LOOKUPS_DROPPED);
            debug!(?block_root, "Lookup queue full, dropping block root");
            return;
        }
        self.pending.insert(
            block_root,
            PendingLookup {
                state: LookupState::AwaitingDownload,
                available_peers: HashSet::from([peer_id]),
                in_flight_or_failed: HashSet::new(),
                child,
            },
        );
    }

    /// Select a peer for every idle lookup and emit its by-root request.
    ///
    /// Post-Fulu the block's data also has to be fetched, so the peer must custody the
    /// columns we sample: peers advertising more custody groups are preferred.
    pub fn poll_requests(&mut self, peer_db: &PeerDB<E>) -> Vec<ResolverRequest> {
        let mut requests = vec![];
        for (block_root, lookup) in self.pending.iter_mut() {
            if lookup.state != LookupState::AwaitingDownload {
                continue;
            }
            let Some(peer_id) = Self::select_peer(lookup, peer_db) else {
                continue;
            };
            lookup.state = LookupState::Downloading(peer_id);
            requests.push(ResolverRequest {
                peer_id,
                request: BlocksByRootRequest {
                    block_roots: vec![*block_root],
                },
            });
        }
        requests
    }

    fn select_peer(lookup: &PendingLookup<E>, peer_db: &PeerDB<E>) -> Option<PeerId> {
        lookup
            .available_peers
            .iter()
            .filter(|peer_id| !lookup.in_flight_or_failed.contains(peer_id))
            .filter(|peer_id| {
                peer_db
                    .peer_info(peer_id)
                    .is_some_and(|info| info.is_connected())
            })
            .max_by_key(|peer_id| {
                peer_db
                    .peer_info(peer_id)
                    .map(|info| info.custody_groups.len())
                    .unwrap_or(0)
            })
            .copied()
    }

    /// Handle a `BeaconBlocksByRoot` response for `requested_root` from `peer_id`.
    pub fn on_block_response(
        &mut self,
        requested_root: Hash256,
        peer_id: PeerId,
        block: Option<Arc<SignedBeaconBlock<E>>>,
    ) -> ResolutionOutcome<E> {
        let Some(lookup) = self.pending.get_mut(&requested_root) else {
            return ResolutionOutcome::Ignored { peer_action: None };
        };
        if lookup.state != LookupState::Downloading(peer_id) {
            return ResolutionOutcome::Ignored { peer_action: None };
        }

        let Some(block) = block else {
            // Empty response: the peer did not have it after all; try another.
            lookup.in_flight_or_failed.insert(peer_id);
            lookup.state = LookupState::AwaitingDownload;
            return ResolutionOutcome::Ignored { peer_action: None };
        };

        // A block that doesn't hash to the requested root is discarded silently; it must not
        // be processed.
        if block.canonical_root() != requested_root {
            lookup.in_flight_or_failed.insert(peer_id);
            lookup.state = LookupState::AwaitingDownload;
            return ResolutionOutcome::Ignored { peer_action: None };
        }

        let (finalized_slot, parent_known) = {
            let fork_choice = self.fork_choice.read();
            (
                fork_choice.finalized_slot::<E>(),
                fork_choice.contains_block(&block.parent_root()),
            )
        };

        // A block at or before finality cannot extend the chain; the sender is faulty.
        if block.slot() <= finalized_slot && finalized_slot > Slot::new(0) {
            self.pending.remove(&requested_root);
            return ResolutionOutcome::Ignored {
                peer_action: Some(PeerAction::LowToleranceError),
            };
        }

        if parent_known {
            let lookup = self
                .pending
                .remove(&requested_root)
                .expect("lookup is present");
            ResolutionOutcome::Process {
                block,
                parked_child: lookup.child,
            }
        } else {
            // Recurse on the parent, re-using the serving peer as a candidate.
            let parent_root = block.parent_root();
            let fork_name = self.spec.fork_name_at_slot::<E>(block.slot());
            let child = BlockInput::pre_data(block, fork_name);
            self.pending.remove(&requested_root);
            self.enqueue(parent_root, peer_id, Some(child));
            ResolutionOutcome::ParentUnknown { parent_root }
        }
    }

    /// The chain processor failed this chain; forget its lookups for a while.
    pub fn on_chain_failure(&mut self, block_root: Hash256) {
        self.failed_chains.raw_insert(block_root);
        self.pending.remove(&block_root);
    }

    /// Drop lookups that fork choice has since learned about.
    pub fn prune_resolved(&mut self) {
        let fork_choice = self.fork_choice.read();
        self.pending
            .retain(|block_root, _| !fork_choice.contains_block(block_root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bls::Signature;
    use fork_choice::ForkChoice;
    use parking_lot::RwLock;
    use pharos_network::ConnectionDirection;
    use types::{BeaconBlock, FixedBytesExtended, MainnetEthSpec};

    type E = MainnetEthSpec;

    fn make_block(slot: u64, parent_root: Hash256) -> Arc<SignedBeaconBlock<E>> {
        let mut block = BeaconBlock::<E>::empty();
        block.slot = Slot::new(slot);
        block.parent_root = parent_root;
        Arc::new(SignedBeaconBlock::from_block(block, Signature::empty()))
    }

    fn setup() -> (UnknownBlockResolver<E>, SharedForkChoice, PeerDB<E>, Arc<SignedBeaconBlock<E>>)
    {
        let mut fork_choice = ForkChoice::default();
        let anchor = make_block(1, Hash256::zero());
        fork_choice.on_block(&anchor).unwrap();
        let fork_choice = Arc::new(RwLock::new(fork_choice));

        let mut peer_db = PeerDB::new(50);
        let peer_id = PeerId::random();
        peer_db.register_connection(peer_id, ConnectionDirection::Outgoing, None);

        (
            UnknownBlockResolver::new(fork_choice.clone(), types::ChainSpec::mainnet()),
            fork_choice,
            peer_db,
            anchor,
        )
    }

    fn connected_peer(peer_db: &PeerDB<E>) -> PeerId {
        *peer_db.connected_peers().next().unwrap().0
    }

    #[test]
    fn resolves_block_with_known_parent() {
        let (mut resolver, _fc, peer_db, anchor) = setup();
        let peer_id = connected_peer(&peer_db);

        let block = make_block(2, anchor.canonical_root());
        let block_root = block.canonical_root();
        resolver.search_unknown_block_root(block_root, peer_id);

        let requests = resolver.poll_requests(&peer_db);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].peer_id, peer_id);
        assert_eq!(requests[0].request.block_roots, vec![block_root]);

        match resolver.on_block_response(block_root, peer_id, Some(block)) {
            ResolutionOutcome::Process {
                block: processed,
                parked_child,
            } => {
                assert_eq!(processed.canonical_root(), block_root);
                assert!(parked_child.is_none());
            }
            other => panic!("expected Process: {other:?}"),
        }
        assert_eq!(resolver.pending_len(), 0);
    }

    #[test]
    fn recurses_on_unknown_parent() {
        let (mut resolver, _fc, peer_db, _anchor) = setup();
        let peer_id = connected_peer(&peer_db);

        // A block whose parent we do not have.
        let orphan_parent = make_block(5, Hash256::from_low_u64_be(404));
        let block = make_block(6, orphan_parent.canonical_root());
        let block_root = block.canonical_root();

        resolver.search_unknown_block_root(block_root, peer_id);
        resolver.poll_requests(&peer_db);

        match resolver.on_block_response(block_root, peer_id, Some(block)) {
            ResolutionOutcome::ParentUnknown { parent_root } => {
                assert_eq!(parent_root, orphan_parent.canonical_root());
            }
            other => panic!("expected ParentUnknown: {other:?}"),
        }
        // The parent is now pending with the same peer as a candidate.
        assert!(resolver.contains(&orphan_parent.canonical_root()));
        let requests = resolver.poll_requests(&peer_db);
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn wrong_root_is_discarded_silently() {
        let (mut resolver, _fc, peer_db, anchor) = setup();
        let peer_id = connected_peer(&peer_db);

        let wanted = Hash256::from_low_u64_be(7);
        resolver.search_unknown_block_root(wanted, peer_id);
        resolver.poll_requests(&peer_db);

        let wrong = make_block(3, anchor.canonical_root());
        match resolver.on_block_response(wanted, peer_id, Some(wrong)) {
            ResolutionOutcome::Ignored { peer_action: None } => {}
            other => panic!("expected silent ignore: {other:?}"),
        }
        // The lookup survives for another peer.
        assert!(resolver.contains(&wanted));
    }

    #[test]
    fn finalized_blocks_penalize_the_sender() {
        let (mut resolver, fc, peer_db, anchor) = setup();
        let peer_id = connected_peer(&peer_db);

        // Finalize epoch 1 (slot 32).
        {
            let mut fork_choice = fc.write();
            let mut parent = anchor.canonical_root();
            for slot in 2..=33u64 {
                let block = make_block(slot, parent);
                parent = block.canonical_root();
                fork_choice.on_block(&block).unwrap();
            }
            fork_choice.update_finalized::<E>(types::Checkpoint {
                epoch: types::Epoch::new(1),
                root: parent,
            });
        }

        let stale = make_block(30, Hash256::from_low_u64_be(1));
        let stale_root = stale.canonical_root();
        resolver.search_unknown_block_root(stale_root, peer_id);
        resolver.poll_requests(&peer_db);

        match resolver.on_block_response(stale_root, peer_id, Some(stale)) {
            ResolutionOutcome::Ignored {
                peer_action: Some(PeerAction::LowToleranceError),
            } => {}
            other => panic!("expected low-tolerance penalty: {other:?}"),
        }
    }

    #[test]
    fn pending_queue_is_bounded() {
        let (mut resolver, _fc, peer_db, _anchor) = setup();
        let peer_id = connected_peer(&peer_db);

        for i in 0..(MAX_PENDING_BLOCKS as u64 + 10) {
            resolver.search_unknown_block_root(Hash256::from_low_u64_be(i + 1000), peer_id);
        }
        assert_eq!(resolver.pending_len(), MAX_PENDING_BLOCKS);
    }

    #[test]
    fn failed_chains_are_not_requeued() {
        let (mut resolver, _fc, _peer_db, _anchor) = setup();
        let peer_id = PeerId::random();
        let root = Hash256::from_low_u64_be(55);

        resolver.on_chain_failure(root);
        resolver.search_unknown_block_root(root, peer_id);
        assert!(!resolver.contains(&root));
    }
}
