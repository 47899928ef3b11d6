//! Client agent
//!
//! Registers the local relay with the discovery authority, keeps it alive
//! with heartbeats and feeds the relay one sample per interval.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::collector::MetricSource;
use crate::error::{AppError, AppResult};
use crate::protocol::{self, Message, MetricMessage, MAX_DATAGRAM};
use crate::shutdown::Shutdown;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

pub struct ClientAgent<S> {
    source: S,
    relay: SocketAddr,
    discovery: SocketAddr,
    bind_host: IpAddr,
    heartbeat_interval: Duration,
    sample_interval: watch::Receiver<Duration>,
}

impl<S: MetricSource> ClientAgent<S> {
    /// `relay` is the advertised endpoint of this node's relay
    pub fn new(source: S, relay: SocketAddr, discovery: SocketAddr) -> Self {
        let (_, sample_interval) = watch::channel(Duration::from_secs(5));
        Self {
            source,
            relay,
            discovery,
            bind_host: relay.ip(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            sample_interval,
        }
    }

    pub fn heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    /// Sampling interval, re-read before every wait
    pub fn sample_interval(mut self, sample_interval: watch::Receiver<Duration>) -> Self {
        self.sample_interval = sample_interval;
        self
    }

    /// Register, then spawn the heartbeat, reply listener and sampling tasks
    pub async fn start(self, shutdown: Shutdown) -> AppResult<Vec<JoinHandle<()>>> {
        let bind_addr = SocketAddr::new(self.bind_host, 0);
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| AppError::bind("agent", bind_addr, e))?;
        let socket = Arc::new(socket);

        let port = self.relay.port();
        send(&socket, &Message::Register { port }, self.discovery).await;
        info!(relay_port = port, discovery = %self.discovery, "Sent register message");

        let heartbeat = tokio::spawn(run_heartbeat(
            socket.clone(),
            self.discovery,
            port,
            self.heartbeat_interval,
            shutdown.clone(),
        ));
        let replies = tokio::spawn(run_reply_listener(socket.clone(), shutdown.clone()));
        let sampling = tokio::spawn(run_sampling(
            self.source,
            socket,
            self.relay,
            self.sample_interval,
            shutdown,
        ));

        Ok(vec![heartbeat, replies, sampling])
    }
}

async fn run_heartbeat(
    socket: Arc<UdpSocket>,
    discovery: SocketAddr,
    port: u16,
    period: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let message = Message::Heartbeat { port };

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                send(&socket, &message, discovery).await;
                debug!(relay_port = port, "Heartbeat sent");
            }
        }
    }
}

async fn run_reply_listener(socket: Arc<UdpSocket>, mut shutdown: Shutdown) {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => match protocol::decode(&buf[..len]) {
                    Ok(Message::ClientList { clients }) => {
                        info!(from = %from, peers = clients.len(), "Discovery replied with client list");
                    }
                    Ok(other) => debug!(from = %from, kind = other.kind(), "Ignoring message on agent socket"),
                    Err(e) => warn!(from = %from, error = %e, "Error parsing discovery reply"),
                },
                // ICMP port unreachable surfaces here while no authority is up
                Err(e) => debug!(error = %e, "Error receiving discovery reply"),
            }
        }
    }
}

async fn run_sampling<S: MetricSource>(
    source: S,
    socket: Arc<UdpSocket>,
    relay: SocketAddr,
    sample_interval: watch::Receiver<Duration>,
    mut shutdown: Shutdown,
) {
    let mut seq: u64 = 0;

    loop {
        let collected = tokio::select! {
            _ = shutdown.wait() => break,
            collected = source.sample() => collected,
        };

        match collected {
            Ok(payload) => {
                seq += 1;
                let message = MetricMessage::new(relay, source.kind(), payload).with_seq(seq);
                send(&socket, &Message::Metrics(message), relay).await;
            }
            Err(e) => error!(error = %e, "Error collecting metrics"),
        }

        let wait = *sample_interval.borrow();
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

async fn send(socket: &UdpSocket, message: &Message, to: SocketAddr) {
    match protocol::encode(message) {
        Ok(data) => {
            if let Err(e) = socket.send_to(&data, to).await {
                warn!(to = %to, kind = message.kind(), error = %e, "Error sending data");
            }
        }
        Err(e) => error!(kind = message.kind(), error = %e, "Error encoding message"),
    }
}

/// Parse an interval command such as `:15` typed on the console
pub fn parse_interval_command(line: &str) -> Option<Duration> {
    let line = line.trim();
    line.match_indices(':').find_map(|(idx, _)| {
        let rest = &line[idx + 1..];
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let secs: u64 = rest[..digits_end].parse().ok()?;
        (secs > 0).then(|| Duration::from_secs(secs))
    })
}
