//! Process wiring
//!
//! Starts every long-running task of one peer and hands back a [`NodeHandle`]
//! that owns their join handles and the shutdown trigger.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::ClientAgent;
use crate::api::AppState;
use crate::collector::MetricSource;
use crate::config::Config;
use crate::discovery::DiscoveryService;
use crate::error::{AppError, AppResult};
use crate::registry::PeerRegistry;
use crate::relay::{MetricRelay, PeerView};
use crate::sample::{MetricBoard, SharedBoard};
use crate::shutdown::{self, ShutdownTrigger};

/// Adjusts the agent's sampling interval while it runs
#[derive(Clone)]
pub struct IntervalControl {
    tx: Arc<watch::Sender<Duration>>,
}

impl IntervalControl {
    pub fn set(&self, interval: Duration) {
        let _ = self.tx.send(interval);
    }
}

pub struct NodeHandle {
    relay_addr: SocketAddr,
    discovery_addr: SocketAddr,
    http_addr: Option<SocketAddr>,
    registry: Option<PeerRegistry>,
    peers: PeerView,
    board: SharedBoard,
    interval: IntervalControl,
    trigger: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

pub struct Node;

impl Node {
    pub async fn start<S: MetricSource>(config: &Config, source: S) -> AppResult<NodeHandle> {
        Self::start_with_metrics(config, source, None).await
    }

    /// Start every task. Only a relay or HTTP bind failure aborts the start;
    /// a taken discovery port means another process is the authority.
    pub async fn start_with_metrics<S: MetricSource>(
        config: &Config,
        source: S,
        metrics: Option<PrometheusHandle>,
    ) -> AppResult<NodeHandle> {
        config.validate()?;

        let (trigger, shutdown) = shutdown::channel();
        let mut tasks = Vec::new();

        let board = MetricBoard::shared();
        let relay = MetricRelay::bind(config.relay_addr(), board.clone())
            .await?
            .with_display(config.display);
        let relay_addr = relay.advertised();
        let peers = relay.peer_view();

        let registry =
            PeerRegistry::with_heartbeat(config.heartbeat_interval(), config.peer_timeout())?;
        let discovery = DiscoveryService::bind(
            config.discovery_bind_addr(),
            registry.clone(),
            config.heartbeat_interval(),
        )
        .await?;

        let (discovery_addr, registry) = match discovery {
            Some(service) => {
                let addr = service.local_addr()?;
                tasks.extend(service.spawn(shutdown.clone()));
                (addr, Some(registry))
            }
            None => (config.discovery_addr(), None),
        };

        tasks.push(tokio::spawn(relay.run(shutdown.clone())));

        let (interval_tx, interval_rx) = watch::channel(config.sample_interval());
        let agent = ClientAgent::new(source, relay_addr, discovery_addr)
            .heartbeat_interval(config.heartbeat_interval())
            .sample_interval(interval_rx);
        tasks.extend(agent.start(shutdown.clone()).await?);

        let mut http_addr = None;
        if let Some(port) = config.http_port {
            let requested = SocketAddr::new(config.bind_host, port);
            let listener = TcpListener::bind(requested)
                .await
                .map_err(|e| AppError::bind("http", requested, e))?;
            let addr = listener.local_addr()?;
            http_addr = Some(addr);

            let state = AppState::new(registry.clone(), peers.clone(), board.clone(), relay_addr)
                .with_metrics(metrics);
            let mut http_shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                let app = crate::create_router(state);
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { http_shutdown.wait().await })
                    .await;
                if let Err(e) = result {
                    warn!(error = %e, "HTTP server error");
                }
            }));
            info!(addr = %addr, "Inspection API listening");
        }

        info!(
            relay = %relay_addr,
            discovery = %discovery_addr,
            authority = registry.is_some(),
            "Node started"
        );

        Ok(NodeHandle {
            relay_addr,
            discovery_addr,
            http_addr,
            registry,
            peers,
            board,
            interval: IntervalControl {
                tx: Arc::new(interval_tx),
            },
            trigger,
            tasks,
        })
    }
}

impl NodeHandle {
    pub fn relay_addr(&self) -> SocketAddr {
        self.relay_addr
    }

    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    pub fn is_discovery_authority(&self) -> bool {
        self.registry.is_some()
    }

    /// The registry, present only on the discovery authority
    pub fn registry(&self) -> Option<&PeerRegistry> {
        self.registry.as_ref()
    }

    pub fn peer_view(&self) -> &PeerView {
        &self.peers
    }

    pub fn board(&self) -> &SharedBoard {
        &self.board
    }

    pub fn interval_control(&self) -> IntervalControl {
        self.interval.clone()
    }

    /// Signal every task and wait for them to finish
    pub async fn shutdown(self) {
        self.trigger.trigger();
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Task ended abnormally");
            }
        }
        info!(relay = %self.relay_addr, "Node stopped");
    }
}
