//! Peer inspection endpoint

use std::net::{IpAddr, SocketAddr};

use axum::extract::State;
use serde::Serialize;
use tokio::time::Instant;

use crate::api::response::ApiResponse;
use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct PeerInfo {
    pub address: IpAddr,
    pub port: u16,
    pub last_seen_secs_ago: u64,
}

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub discovery_authority: bool,
    /// Registry content, empty unless this process is the authority
    pub registry: Vec<PeerInfo>,
    /// Peers this relay currently fans out to
    pub relay_view: Vec<SocketAddr>,
}

pub async fn list(State(state): State<AppState>) -> ApiResponse<PeersResponse> {
    let now = Instant::now();
    let registry = match &state.registry {
        Some(registry) => registry
            .snapshot()
            .await
            .into_iter()
            .map(|peer| PeerInfo {
                address: peer.address,
                port: peer.port,
                last_seen_secs_ago: now.saturating_duration_since(peer.last_seen).as_secs(),
            })
            .collect(),
        None => Vec::new(),
    };

    ApiResponse::success(PeersResponse {
        discovery_authority: state.registry.is_some(),
        registry,
        relay_view: state.peers.snapshot().await,
    })
}
