//! Metric relay
//!
//! Receives samples from the local agent and from other peers, suppresses
//! unchanged samples, shows them on the console board and fans locally
//! produced samples out to every other peer.
//!
//! Fan-out is one unicast per peer from the relay socket. Copies sent to
//! peers are flagged `relayed`, and a relayed copy is displayed but never
//! forwarded again, so a sample travels at most one hop.

mod dedup;
mod peers;

pub use dedup::DedupCache;
pub use peers::PeerView;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::protocol::{self, Message, MetricMessage, MAX_DATAGRAM};
use crate::sample::SharedBoard;
use crate::shutdown::Shutdown;
use crate::telemetry;

/// A decoded datagram from the relay socket
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Metric(MetricMessage),
    /// Peer set announced by the discovery authority
    Peers(Vec<SocketAddr>),
    /// Well-formed message that does not belong on this channel
    Unexpected(&'static str),
}

/// Outcome of one fan-out
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    pub delivered: Vec<SocketAddr>,
    pub failed: Vec<SocketAddr>,
}

pub struct MetricRelay {
    socket: UdpSocket,
    advertised: SocketAddr,
    peers: PeerView,
    dedup: DedupCache,
    board: SharedBoard,
    display: bool,
    buf: Vec<u8>,
}

impl MetricRelay {
    /// Bind the relay listener. Failure here is fatal for the node.
    pub async fn bind(addr: SocketAddr, board: SharedBoard) -> AppResult<Self> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| AppError::bind("relay", addr, e))?;
        let local = socket.local_addr()?;
        info!(addr = %local, "Relay server started");

        let advertised = advertised_endpoint(local);
        Ok(Self {
            socket,
            advertised,
            peers: PeerView::new(advertised),
            dedup: DedupCache::default(),
            board,
            display: false,
            buf: vec![0u8; MAX_DATAGRAM],
        })
    }

    pub fn with_display(mut self, display: bool) -> Self {
        self.display = display;
        self
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Endpoint other peers use to reach this relay
    pub fn advertised(&self) -> SocketAddr {
        self.advertised
    }

    pub fn peer_view(&self) -> PeerView {
        self.peers.clone()
    }

    /// Wait for the next datagram and decode it
    pub async fn receive(&mut self) -> AppResult<(Inbound, SocketAddr)> {
        let (len, from) = self.socket.recv_from(&mut self.buf).await?;
        telemetry::record_received("relay");

        let inbound = match protocol::decode(&self.buf[..len]) {
            Ok(Message::Metrics(message)) => Inbound::Metric(message),
            Ok(Message::ClientList { clients }) => Inbound::Peers(clients),
            Ok(other) => Inbound::Unexpected(other.kind()),
            Err(e) => {
                telemetry::record_malformed("relay");
                return Err(e);
            }
        };
        Ok((inbound, from))
    }

    /// False when `message` repeats the last payload from its source
    pub fn admit(&mut self, message: &MetricMessage) -> bool {
        self.dedup.admit(message)
    }

    /// Send `message` to every peer except its source and this relay.
    /// A failed send is logged and does not stop the remaining sends.
    pub async fn forward(&self, message: &MetricMessage, peers: &[SocketAddr]) -> FanoutReport {
        let mut report = FanoutReport::default();
        let data = match protocol::encode(&Message::Metrics(message.relayed_copy())) {
            Ok(data) => data,
            Err(e) => {
                error!(error = %e, "Error encoding metrics for forwarding");
                return report;
            }
        };

        for peer in peers {
            if *peer == message.source || *peer == self.advertised {
                continue;
            }
            match self.socket.send_to(&data, *peer).await {
                Ok(_) => report.delivered.push(*peer),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Error sending metrics to peer");
                    report.failed.push(*peer);
                }
            }
        }

        telemetry::record_fanout(report.delivered.len(), report.failed.len());
        debug!(
            source = %message.source,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Fan-out complete"
        );
        report
    }

    pub async fn handle(&mut self, inbound: Inbound, from: SocketAddr) {
        match inbound {
            Inbound::Peers(clients) => {
                let count = self.peers.replace(&clients).await;
                info!(peers = count, "Updated client list");
            }
            Inbound::Metric(message) => self.handle_metric(message).await,
            Inbound::Unexpected(kind) => {
                warn!(from = %from, kind, "Unexpected message on relay channel");
            }
        }
    }

    async fn handle_metric(&mut self, message: MetricMessage) {
        if !self.admit(&message) {
            telemetry::record_duplicate();
            debug!(source = %message.source, seq = ?message.seq, "Unchanged sample dropped");
            return;
        }

        {
            let mut board = self.board.write().await;
            board.record(&message);
            if self.display {
                println!("{}", board.render());
            }
        }

        if !message.relayed {
            let peers = self.peers.snapshot().await;
            self.forward(&message, &peers).await;
        }
    }

    pub async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Relay server stopping");
                    break;
                }
                received = self.receive() => match received {
                    Ok((inbound, from)) => self.handle(inbound, from).await,
                    Err(AppError::Codec(e)) => warn!(error = %e, "Error parsing message"),
                    Err(e) => error!(error = %e, "Error receiving data"),
                }
            }
        }
    }
}

fn advertised_endpoint(local: SocketAddr) -> SocketAddr {
    let ip = match local.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, local.port())
}
