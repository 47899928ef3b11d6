//! Peer registry
//!
//! In-memory set of live relay endpoints. The discovery service is the only
//! writer; the sweeper removes peers whose last heartbeat is older than the
//! configured timeout. Readers always get a point-in-time copy.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::telemetry;

/// A registered peer, keyed by `(address, port)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub address: IpAddr,
    pub port: u16,
    pub last_seen: Instant,
}

impl PeerEndpoint {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

#[derive(Clone)]
pub struct PeerRegistry {
    peers: Arc<RwLock<HashMap<SocketAddr, PeerEndpoint>>>,
    timeout: Duration,
}

impl PeerRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    /// Build a registry whose timeout tolerates at least one missed heartbeat
    pub fn with_heartbeat(heartbeat: Duration, timeout: Duration) -> AppResult<Self> {
        if timeout < heartbeat.saturating_mul(2) {
            return Err(AppError::invalid_config(&format!(
                "peer timeout {:?} is shorter than two heartbeat intervals of {:?}",
                timeout, heartbeat
            )));
        }
        Ok(Self::new(timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn register(&self, endpoint: SocketAddr) -> bool {
        self.register_at(endpoint, Instant::now()).await
    }

    /// Insert or refresh `endpoint`. Returns true when the peer is new.
    pub async fn register_at(&self, endpoint: SocketAddr, now: Instant) -> bool {
        let mut peers = self.peers.write().await;
        let is_new = match peers.get_mut(&endpoint) {
            Some(peer) => {
                refresh(peer, now);
                false
            }
            None => {
                peers.insert(
                    endpoint,
                    PeerEndpoint {
                        address: endpoint.ip(),
                        port: endpoint.port(),
                        last_seen: now,
                    },
                );
                true
            }
        };
        telemetry::set_registry_size(peers.len());

        if is_new {
            info!(peer = %endpoint, peers_count = peers.len(), "New peer registered");
        } else {
            debug!(peer = %endpoint, "Known peer registered again");
        }
        is_new
    }

    pub async fn heartbeat(&self, endpoint: SocketAddr) -> bool {
        self.heartbeat_at(endpoint, Instant::now()).await
    }

    /// Refresh a registered peer. Unknown peers are ignored, a heartbeat
    /// never registers anyone.
    pub async fn heartbeat_at(&self, endpoint: SocketAddr, now: Instant) -> bool {
        let mut peers = self.peers.write().await;
        match peers.get_mut(&endpoint) {
            Some(peer) => {
                refresh(peer, now);
                true
            }
            None => {
                debug!(peer = %endpoint, "Heartbeat from unregistered peer ignored");
                false
            }
        }
    }

    /// Remove every peer not seen within the timeout and return them
    pub async fn expire(&self, now: Instant) -> Vec<PeerEndpoint> {
        let mut peers = self.peers.write().await;
        let stale: Vec<SocketAddr> = peers
            .iter()
            .filter(|(_, peer)| now.saturating_duration_since(peer.last_seen) > self.timeout)
            .map(|(addr, _)| *addr)
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for addr in stale {
            if let Some(peer) = peers.remove(&addr) {
                info!(peer = %addr, peers_count_after = peers.len(), "Peer timed out and removed");
                removed.push(peer);
            }
        }
        if !removed.is_empty() {
            telemetry::record_expired(removed.len());
            telemetry::set_registry_size(peers.len());
        }
        removed
    }

    /// Consistent copy of the current peers, ordered by endpoint
    pub async fn snapshot(&self) -> Vec<PeerEndpoint> {
        let peers = self.peers.read().await;
        let mut list: Vec<PeerEndpoint> = peers.values().cloned().collect();
        list.sort_by_key(|peer| peer.addr());
        list
    }

    pub async fn endpoints(&self) -> Vec<SocketAddr> {
        self.snapshot().await.iter().map(PeerEndpoint::addr).collect()
    }

    pub async fn contains(&self, endpoint: SocketAddr) -> bool {
        self.peers.read().await.contains_key(&endpoint)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

// last_seen only moves forward
fn refresh(peer: &mut PeerEndpoint, now: Instant) {
    if now > peer.last_seen {
        peer.last_seen = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        assert!(registry.register(addr(9001)).await);
        assert!(!registry.register(addr(9001)).await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_register() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        assert!(!registry.heartbeat(addr(9001)).await);
        assert!(registry.is_empty().await);

        registry.register(addr(9001)).await;
        assert!(registry.heartbeat(addr(9001)).await);
    }

    #[tokio::test]
    async fn test_peers_keyed_by_address_and_port() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        registry.register(SocketAddr::from(([127, 0, 0, 1], 9001))).await;
        registry.register(SocketAddr::from(([127, 0, 0, 2], 9001))).await;
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_last_seen_never_moves_backwards() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        let start = Instant::now();
        let later = start + Duration::from_secs(5);

        registry.register_at(addr(9001), later).await;
        registry.heartbeat_at(addr(9001), start).await;
        registry.register_at(addr(9001), start).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot[0].last_seen, later);
    }

    #[tokio::test]
    async fn test_expire_removes_only_stale_peers() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        let start = Instant::now();

        registry.register_at(addr(9001), start).await;
        registry.register_at(addr(9002), start).await;
        registry
            .heartbeat_at(addr(9001), start + Duration::from_secs(20))
            .await;

        // Exactly at the timeout is still alive
        assert!(registry
            .expire(start + Duration::from_secs(30))
            .await
            .is_empty());

        let removed = registry.expire(start + Duration::from_secs(31)).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].addr(), addr(9002));
        assert_eq!(registry.endpoints().await, vec![addr(9001)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_expires_after_timeout() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        registry.register(addr(9001)).await;
        registry.register(addr(9002)).await;

        for _ in 0..4 {
            tokio::time::advance(Duration::from_secs(10)).await;
            registry.heartbeat(addr(9001)).await;
        }

        registry.expire(Instant::now()).await;
        assert!(registry.contains(addr(9001)).await);
        assert!(!registry.contains(addr(9002)).await);
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted_copy() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        registry.register(addr(9003)).await;
        registry.register(addr(9001)).await;
        registry.register(addr(9002)).await;

        let snapshot = registry.endpoints().await;
        registry.register(addr(9004)).await;

        assert_eq!(snapshot, vec![addr(9001), addr(9002), addr(9003)]);
        assert_eq!(registry.len().await, 4);
    }

    #[tokio::test]
    async fn test_concurrent_registrations_are_all_visible() {
        let registry = PeerRegistry::new(Duration::from_secs(30));
        let tasks: Vec<_> = (0..50u16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.register(addr(10_000 + i)).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            assert!(task.unwrap());
        }
        assert_eq!(registry.snapshot().await.len(), 50);
    }

    #[test]
    fn test_timeout_must_exceed_two_heartbeats() {
        assert!(PeerRegistry::with_heartbeat(Duration::from_secs(10), Duration::from_secs(19)).is_err());
        let registry =
            PeerRegistry::with_heartbeat(Duration::from_secs(10), Duration::from_secs(30)).unwrap();
        assert_eq!(registry.timeout(), Duration::from_secs(30));
    }
}
