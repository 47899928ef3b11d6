pub mod health;
pub mod metrics;
pub mod peers;
pub mod response;

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::registry::PeerRegistry;
use crate::relay::PeerView;
use crate::sample::SharedBoard;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Present only when this process is the discovery authority
    pub registry: Option<PeerRegistry>,
    pub peers: PeerView,
    pub board: SharedBoard,
    pub relay_addr: SocketAddr,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        registry: Option<PeerRegistry>,
        peers: PeerView,
        board: SharedBoard,
        relay_addr: SocketAddr,
    ) -> Self {
        Self {
            registry,
            peers,
            board,
            relay_addr,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<PrometheusHandle>) -> Self {
        self.metrics = metrics;
        self
    }
}
