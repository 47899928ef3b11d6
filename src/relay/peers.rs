use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::RwLock;

/// The relay's copy of the peer set, replaced by every announcement
#[derive(Clone)]
pub struct PeerView {
    own: SocketAddr,
    peers: Arc<RwLock<Vec<SocketAddr>>>,
}

impl PeerView {
    pub fn new(own: SocketAddr) -> Self {
        Self {
            own,
            peers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Replace the view, dropping this relay's own endpoint and duplicates.
    /// Returns the number of peers kept.
    pub async fn replace(&self, clients: &[SocketAddr]) -> usize {
        let mut next: Vec<SocketAddr> = clients.iter().copied().filter(|c| *c != self.own).collect();
        next.sort();
        next.dedup();

        let mut peers = self.peers.write().await;
        *peers = next;
        peers.len()
    }

    pub async fn snapshot(&self) -> Vec<SocketAddr> {
        self.peers.read().await.clone()
    }
}
