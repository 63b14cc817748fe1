//! Chain synchronization with peers
//!
//! A sync round visits every known peer and:
//! 1. queries its status, dropping it from the registry if unreachable
//! 2. registers this node with it, once
//! 3. imports any blocks it holds beyond our latest block
//! 4. adds the peers it knows to our registry
//!
//! Rounds run on a fixed interval until cancelled. No lock is held across
//! an outbound request; every fetched block is re-validated by the ledger.

use crate::core::LedgerError;
use crate::network::client::{PeerClient, PeerError};
use crate::network::message::StatusResponse;
use crate::network::node::SharedState;
use crate::network::peer::PeerNode;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Delay between sync rounds
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(45);

/// Block catch-up errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to fetch blocks: {0}")]
    Fetch(#[from] PeerError),
    #[error("Imported {imported} blocks, then rejected one: {source}")]
    Import {
        imported: usize,
        #[source]
        source: LedgerError,
    },
}

impl SyncError {
    /// Blocks committed before the failure
    pub fn imported(&self) -> usize {
        match self {
            SyncError::Fetch(_) => 0,
            SyncError::Import { imported, .. } => *imported,
        }
    }
}

/// Outcome of one sync round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub peers_queried: usize,
    pub peers_removed: usize,
    pub peers_joined: usize,
    pub blocks_imported: usize,
    pub peers_discovered: usize,
}

/// How many blocks a peer is ahead of us, or `None` if there is nothing to
/// fetch.
///
/// A peer reporting the zero hash has no blocks. While we have no stored
/// block, any block the peer has is new, including a height-0 one.
pub fn blocks_ahead(local_number: u64, has_genesis: bool, status: &StatusResponse) -> Option<u64> {
    if status.block_hash.is_empty() {
        return None;
    }

    if !has_genesis {
        return Some(status.block_number.max(1));
    }

    if status.block_number <= local_number {
        return None;
    }

    Some(status.block_number - local_number)
}

/// Periodic peer synchronization
pub struct SyncEngine {
    state: SharedState,
    client: PeerClient,
    local_ip: String,
    local_port: u16,
    interval: Duration,
}

impl SyncEngine {
    pub fn new(
        state: SharedState,
        client: PeerClient,
        local_ip: String,
        local_port: u16,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            client,
            local_ip,
            local_port,
            interval,
        }
    }

    /// Run sync rounds until `cancel` fires. The first round starts one
    /// interval after the call; a round in progress always completes.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("Sync engine started (every {:?})", self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("Sync engine stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sync_round().await;
                    log::debug!("Sync round finished: {:?}", report);
                }
            }
        }
    }

    /// Run one pass over a snapshot of the registry. Never fails: each
    /// peer's problems are logged and handled locally.
    pub async fn sync_round(&self) -> SyncReport {
        let mut report = SyncReport::default();

        let peers: Vec<PeerNode> = {
            let state = self.state.read().await;
            state
                .peers
                .all()
                .into_values()
                .filter(|peer| !state.peers.is_local(peer))
                .collect()
        };

        for peer in peers {
            let address = peer.tcp_address();
            log::info!("Searching for new peers and blocks at '{}'", address);
            report.peers_queried += 1;

            let status = match self.client.status(&peer).await {
                Ok(status) => status,
                Err(e) => {
                    log::warn!("Peer '{}' was removed from known peers: {}", address, e);
                    self.state.write().await.peers.remove(&peer);
                    report.peers_removed += 1;
                    continue;
                }
            };

            let connected = {
                let state = self.state.read().await;
                state.peers.get(&address).map(|p| p.connected).unwrap_or(false)
            };

            if !connected {
                match self.join_peer(&peer).await {
                    Ok(()) => report.peers_joined += 1,
                    Err(e) => {
                        log::warn!("Failed to join known peers of '{}': {}", address, e);
                        continue;
                    }
                }
            }

            match self.sync_blocks(&peer, &status).await {
                Ok(imported) => report.blocks_imported += imported,
                Err(e) => {
                    report.blocks_imported += e.imported();
                    log::warn!("Block sync with '{}' aborted: {}", address, e);
                }
            }

            report.peers_discovered += self.sync_known_peers(&status).await;
        }

        report
    }

    async fn join_peer(&self, peer: &PeerNode) -> Result<(), PeerError> {
        self.client
            .join(peer, &self.local_ip, self.local_port)
            .await?;

        let address = peer.tcp_address();
        if self.state.write().await.peers.mark_connected(&address) {
            log::info!("Joined known peers of '{}'", address);
        }
        Ok(())
    }

    /// Import every block the peer holds beyond our latest block
    async fn sync_blocks(&self, peer: &PeerNode, status: &StatusResponse) -> Result<usize, SyncError> {
        let (local_number, local_hash, has_genesis) = {
            let state = self.state.read().await;
            (
                state.ledger.latest_number(),
                state.ledger.latest_hash(),
                state.ledger.has_genesis(),
            )
        };

        let Some(ahead) = blocks_ahead(local_number, has_genesis, status) else {
            return Ok(0);
        };
        log::info!("Found {} new blocks from peer {}", ahead, peer.tcp_address());

        let blocks = self.client.fetch_blocks(peer, &local_hash).await?;

        let mut state = self.state.write().await;
        let mut imported = 0;
        for block in blocks {
            if let Err(source) = state.ledger.add_block(block) {
                return Err(SyncError::Import { imported, source });
            }
            imported += 1;
        }

        Ok(imported)
    }

    /// Add peers the remote knows about and we do not. They are joined in a
    /// later round.
    async fn sync_known_peers(&self, status: &StatusResponse) -> usize {
        let mut state = self.state.write().await;
        let mut discovered = 0;

        for peer in status.peers_known.values() {
            if state.peers.is_known(peer) {
                continue;
            }
            log::info!("Found new peer {}", peer.tcp_address());
            state
                .peers
                .add(PeerNode::new(peer.ip.clone(), peer.port, peer.is_bootstrap, false));
            discovered += 1;
        }

        discovered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, ApiState};
    use crate::core::{Account, Genesis, Ledger, Transaction};
    use crate::crypto::Hash;
    use crate::network::node::NodeState;
    use crate::network::peer::PeerRegistry;
    use crate::storage::DataDir;
    use std::collections::HashMap;
    use std::path::Path;
    use tokio::net::TcpListener;

    fn open_ledger(dir: &Path, balances: &[(&str, u64)]) -> Ledger {
        let balances = balances
            .iter()
            .map(|(account, value)| (Account::from(*account), *value))
            .collect();
        DataDir::new(dir)
            .init(&Genesis::with_balances(balances))
            .unwrap();
        Ledger::open(dir).unwrap()
    }

    /// Serve a node's API on an ephemeral port
    async fn spawn_node(dir: &Path, balances: &[(&str, u64)]) -> (SharedState, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let ledger = open_ledger(dir, balances);
        let state = NodeState::new(ledger, PeerRegistry::new("127.0.0.1", port)).into_shared();

        let app = create_router(ApiState::new(state.clone()));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (state, port)
    }

    /// A free port with nothing listening on it
    async fn dead_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    fn engine_for(state: SharedState, port: u16) -> SyncEngine {
        let client = PeerClient::new(Duration::from_secs(5)).unwrap();
        SyncEngine::new(
            state,
            client,
            "127.0.0.1".to_string(),
            port,
            DEFAULT_SYNC_INTERVAL,
        )
    }

    fn status(hash: Hash, number: u64) -> StatusResponse {
        StatusResponse {
            block_hash: hash,
            block_number: number,
            peers_known: HashMap::new(),
        }
    }

    #[test]
    fn test_blocks_ahead() {
        let tip = Hash::digest(b"tip");

        assert_eq!(blocks_ahead(0, false, &status(Hash::zero(), 0)), None);
        assert_eq!(blocks_ahead(0, false, &status(tip, 0)), Some(1));
        assert_eq!(blocks_ahead(0, false, &status(tip, 3)), Some(3));
        assert_eq!(blocks_ahead(2, true, &status(tip, 2)), None);
        assert_eq!(blocks_ahead(3, true, &status(tip, 2)), None);
        assert_eq!(blocks_ahead(2, true, &status(tip, 5)), Some(3));
        assert_eq!(blocks_ahead(0, true, &status(tip, 0)), None);
    }

    #[tokio::test]
    async fn test_second_node_catches_up() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let (state_a, port_a) = spawn_node(dir_a.path(), &[("A", 1000)]).await;
        {
            let mut state = state_a.write().await;
            state
                .ledger
                .submit(Transaction::new("A", "B", 100, ""))
                .unwrap();
            state.ledger.persist_mempool().unwrap();
            assert_eq!(state.ledger.latest_number(), 1);
        }

        let port_b = dead_port().await;
        let ledger_b = open_ledger(dir_b.path(), &[("A", 1000)]);
        let bootstrap = PeerNode::new("127.0.0.1", port_a, true, false);
        let state_b = NodeState::new(
            ledger_b,
            PeerRegistry::with_bootstrap("127.0.0.1", port_b, bootstrap),
        )
        .into_shared();

        let report = engine_for(state_b.clone(), port_b).sync_round().await;
        assert_eq!(report.peers_queried, 1);
        assert_eq!(report.peers_joined, 1);
        assert_eq!(report.blocks_imported, 1);
        assert_eq!(report.peers_removed, 0);

        let a = state_a.read().await;
        let b = state_b.read().await;
        assert_eq!(b.ledger.balances(), a.ledger.balances());
        assert_eq!(b.ledger.latest_hash(), a.ledger.latest_hash());
        assert_eq!(b.ledger.latest_number(), 1);
        assert_eq!(b.ledger.balance_of(&Account::from("A")), 900);
        assert_eq!(b.ledger.balance_of(&Account::from("B")), 100);

        // B is connected to A, and A now knows B
        assert!(b.peers.get(&format!("127.0.0.1:{}", port_a)).unwrap().connected);
        let b_address = format!("127.0.0.1:{}", port_b);
        assert!(a.peers.get(&b_address).is_some());
    }

    #[tokio::test]
    async fn test_repeated_round_is_a_no_op() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let (state_a, port_a) = spawn_node(dir_a.path(), &[("A", 1000)]).await;
        state_a
            .write()
            .await
            .ledger
            .commit_transaction(Transaction::reward("A", 10))
            .unwrap();

        let port_b = dead_port().await;
        let state_b = NodeState::new(
            open_ledger(dir_b.path(), &[("A", 1000)]),
            PeerRegistry::with_bootstrap(
                "127.0.0.1",
                port_b,
                PeerNode::new("127.0.0.1", port_a, true, false),
            ),
        )
        .into_shared();
        let engine = engine_for(state_b.clone(), port_b);

        let first = engine.sync_round().await;
        assert_eq!(first.blocks_imported, 1);

        let second = engine.sync_round().await;
        assert_eq!(second.peers_joined, 0);
        assert_eq!(second.blocks_imported, 0);
        assert_eq!(state_b.read().await.ledger.latest_number(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let port = dead_port().await;
        let missing = PeerNode::new("127.0.0.1", dead_port().await, true, false);

        let state = NodeState::new(
            open_ledger(dir.path(), &[("A", 1000)]),
            PeerRegistry::with_bootstrap("127.0.0.1", port, missing.clone()),
        )
        .into_shared();

        let report = engine_for(state.clone(), port).sync_round().await;

        assert_eq!(report.peers_removed, 1);
        assert!(!state.read().await.peers.is_known(&missing));
    }

    #[tokio::test]
    async fn test_known_peers_are_merged() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let (state_a, port_a) = spawn_node(dir_a.path(), &[("A", 1000)]).await;
        let third = PeerNode::new("10.1.2.3", 9000, false, true);
        state_a.write().await.peers.add(third.clone());

        let port_b = dead_port().await;
        let state_b = NodeState::new(
            open_ledger(dir_b.path(), &[("A", 1000)]),
            PeerRegistry::with_bootstrap(
                "127.0.0.1",
                port_b,
                PeerNode::new("127.0.0.1", port_a, true, false),
            ),
        )
        .into_shared();

        let report = engine_for(state_b.clone(), port_b).sync_round().await;
        assert_eq!(report.blocks_imported, 0);

        let b = state_b.read().await;
        let merged = b.peers.get(&third.tcp_address()).unwrap();
        assert!(!merged.connected);
        assert_eq!(report.peers_discovered, 1);
        assert_eq!(b.peers.len(), 2);
    }

    #[tokio::test]
    async fn test_conflicting_chain_keeps_local_state() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let (state_a, port_a) = spawn_node(dir_a.path(), &[("A", 1000)]).await;
        {
            let mut a = state_a.write().await;
            a.ledger
                .commit_transaction(Transaction::new("A", "B", 1, ""))
                .unwrap();
            a.ledger
                .commit_transaction(Transaction::new("A", "B", 2, ""))
                .unwrap();
        }

        // B has its own block 1, so A's block 2 does not extend it
        let port_b = dead_port().await;
        let mut ledger_b = open_ledger(dir_b.path(), &[("A", 1000)]);
        ledger_b
            .commit_transaction(Transaction::new("A", "C", 5, ""))
            .unwrap();
        let b_hash = ledger_b.latest_hash();
        let state_b = NodeState::new(
            ledger_b,
            PeerRegistry::with_bootstrap(
                "127.0.0.1",
                port_b,
                PeerNode::new("127.0.0.1", port_a, true, false),
            ),
        )
        .into_shared();

        let report = engine_for(state_b.clone(), port_b).sync_round().await;
        assert_eq!(report.blocks_imported, 0);
        assert_eq!(report.peers_removed, 0);

        let b = state_b.read().await;
        assert_eq!(b.ledger.latest_hash(), b_hash);
        assert_eq!(b.ledger.balance_of(&Account::from("C")), 5);
    }

    #[tokio::test]
    async fn test_round_skips_own_address() {
        let dir = tempfile::tempdir().unwrap();
        let port = dead_port().await;

        // Bootstrapping from ourselves leaves nothing to query
        let state = NodeState::new(
            open_ledger(dir.path(), &[("A", 1000)]),
            PeerRegistry::with_bootstrap(
                "127.0.0.1",
                port,
                PeerNode::new("127.0.0.1", port, true, false),
            ),
        )
        .into_shared();

        let report = engine_for(state.clone(), port).sync_round().await;
        assert_eq!(report, SyncReport::default());
        assert_eq!(state.read().await.peers.len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let state = NodeState::new(
            open_ledger(dir.path(), &[("A", 1)]),
            PeerRegistry::new("127.0.0.1", 1),
        )
        .into_shared();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(engine_for(state, 1).run(cancel.clone()));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
