//! Peer Delivery Health
//!
//! Tracks, per peer, how replication deliveries have been going. Purely
//! observational: a failing peer is still sent every envelope.

use std::collections::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Delivery health of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Nothing delivered yet
    Unknown,
    /// Last delivery succeeded
    Healthy,
    /// Last delivery failed after all attempts
    Failing,
}

impl std::fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerStatus::Unknown => write!(f, "UNKNOWN"),
            PeerStatus::Healthy => write!(f, "HEALTHY"),
            PeerStatus::Failing => write!(f, "FAILING"),
        }
    }
}

/// Delivery state of a single peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerState {
    /// Peer base URL
    pub address: String,
    pub status: PeerStatus,
    /// Envelopes the peer accepted
    pub delivered: u64,
    /// Envelopes given up on
    pub failed: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<chrono::DateTime<chrono::Utc>>,
    pub last_failure: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

impl PeerState {
    /// Create the state of a peer nothing has been sent to
    pub fn new(address: String) -> Self {
        Self {
            address,
            status: PeerStatus::Unknown,
            delivered: 0,
            failed: 0,
            consecutive_failures: 0,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }
}

/// Set of known peers and their delivery health
pub struct PeerRegistry {
    /// Configured order, used for fan-out
    addresses: Vec<String>,
    peers: RwLock<HashMap<String, PeerState>>,
}

impl PeerRegistry {
    /// Create a registry for the configured peer base URLs
    pub fn new(addresses: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let addresses: Vec<String> = addresses
            .into_iter()
            .map(|a| a.trim_end_matches('/').to_string())
            .filter(|a| seen.insert(a.clone()))
            .collect();

        let peers = addresses
            .iter()
            .map(|a| (a.clone(), PeerState::new(a.clone())))
            .collect();

        Self {
            addresses,
            peers: RwLock::new(peers),
        }
    }

    /// Peer base URLs in configured order
    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Record an accepted delivery
    pub async fn record_success(&self, address: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(address) {
            peer.status = PeerStatus::Healthy;
            peer.delivered += 1;
            peer.consecutive_failures = 0;
            peer.last_success = Some(chrono::Utc::now());
        }
    }

    /// Record a delivery that was given up on
    pub async fn record_failure(&self, address: &str, error: &str) {
        let mut peers = self.peers.write().await;
        if let Some(peer) = peers.get_mut(address) {
            peer.status = PeerStatus::Failing;
            peer.failed += 1;
            peer.consecutive_failures += 1;
            peer.last_failure = Some(chrono::Utc::now());
            peer.last_error = Some(error.to_string());
        }
    }

    /// State of one peer
    pub async fn get(&self, address: &str) -> Option<PeerState> {
        self.peers.read().await.get(address.trim_end_matches('/')).cloned()
    }

    /// State of every peer in configured order
    pub async fn all(&self) -> Vec<PeerState> {
        let peers = self.peers.read().await;
        self.addresses
            .iter()
            .filter_map(|a| peers.get(a).cloned())
            .collect()
    }
}
