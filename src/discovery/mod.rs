//! Discovery service
//!
//! UDP rendezvous for the peers of one host. Agents register their relay port
//! once and then heartbeat; the service keeps the [`PeerRegistry`] current,
//! answers registrations with the peer list and announces membership changes
//! to every registered relay.
//!
//! At most one process per host owns the discovery port. [`DiscoveryService::bind`]
//! returns `None` when another instance already holds it.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::protocol::{self, Message, MAX_DATAGRAM};
use crate::registry::PeerRegistry;
use crate::shutdown::Shutdown;
use crate::telemetry;

pub struct DiscoveryService {
    socket: Arc<UdpSocket>,
    registry: PeerRegistry,
    sweep_interval: Duration,
}

impl DiscoveryService {
    /// Bind the discovery port. `Ok(None)` means another local instance is
    /// already the discovery authority.
    pub async fn bind(
        addr: SocketAddr,
        registry: PeerRegistry,
        sweep_interval: Duration,
    ) -> AppResult<Option<Self>> {
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                info!(addr = %addr, "Discovery server started");
                Ok(Some(Self {
                    socket: Arc::new(socket),
                    registry,
                    sweep_interval,
                }))
            }
            Err(e) if e.kind() == ErrorKind::AddrInUse => {
                info!(addr = %addr, "Discovery port already bound, another instance is the authority");
                Ok(None)
            }
            Err(e) => Err(AppError::bind("discovery", addr, e)),
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Spawn the listener and the expiry sweeper
    pub fn spawn(self, shutdown: Shutdown) -> Vec<JoinHandle<()>> {
        let sweeper = tokio::spawn(run_sweeper(
            self.registry.clone(),
            self.socket.clone(),
            self.sweep_interval,
            shutdown.clone(),
        ));
        let listener = tokio::spawn(self.run(shutdown));
        vec![listener, sweeper]
    }

    pub async fn run(self, mut shutdown: Shutdown) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Discovery server stopping");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(e) => error!(error = %e, "Error receiving discovery message"),
                }
            }
        }
    }

    pub async fn handle_datagram(&self, datagram: &[u8], from: SocketAddr) {
        telemetry::record_received("discovery");

        let message = match protocol::decode(datagram) {
            Ok(message) => message,
            Err(e) => {
                telemetry::record_malformed("discovery");
                warn!(from = %from, error = %e, "Dropping malformed discovery message");
                return;
            }
        };

        match message {
            Message::Register { port } => self.handle_register(from, port).await,
            Message::Heartbeat { port } => {
                let endpoint = SocketAddr::new(from.ip(), port);
                if self.registry.heartbeat(endpoint).await {
                    debug!(peer = %endpoint, "Heartbeat");
                }
            }
            other => {
                warn!(from = %from, kind = other.kind(), "Unexpected message on discovery channel");
            }
        }
    }

    #[instrument(skip(self))]
    async fn handle_register(&self, from: SocketAddr, port: u16) {
        let endpoint = SocketAddr::new(from.ip(), port);
        let is_new = self.registry.register(endpoint).await;
        telemetry::record_registration();

        let clients = self.registry.endpoints().await;
        let reply = Message::ClientList {
            clients: clients.clone(),
        };
        send(&self.socket, &reply, from).await;

        // Existing relays learn about the newcomer, the newcomer about them
        if is_new {
            announce(&self.socket, &clients).await;
        }
    }
}

/// Periodically drop stale peers and tell the survivors
pub async fn run_sweeper(
    registry: PeerRegistry,
    socket: Arc<UdpSocket>,
    period: Duration,
    mut shutdown: Shutdown,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                let removed = registry.expire(Instant::now()).await;
                if !removed.is_empty() {
                    let clients = registry.endpoints().await;
                    info!(removed = removed.len(), remaining = clients.len(), "Expiry sweep removed peers");
                    announce(&socket, &clients).await;
                }
            }
        }
    }
}

async fn announce(socket: &UdpSocket, clients: &[SocketAddr]) {
    let message = Message::ClientList {
        clients: clients.to_vec(),
    };
    for client in clients {
        send(socket, &message, *client).await;
    }
}

async fn send(socket: &UdpSocket, message: &Message, to: SocketAddr) {
    let data = match protocol::encode(message) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, "Error encoding discovery message");
            return;
        }
    };
    if let Err(e) = socket.send_to(&data, to).await {
        warn!(to = %to, error = %e, "Error sending discovery message");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    async fn service() -> DiscoveryService {
        DiscoveryService::bind(
            local(0),
            PeerRegistry::new(Duration::from_secs(30)),
            Duration::from_secs(10),
        )
        .await
        .unwrap()
        .expect("ephemeral port is never taken")
    }

    #[tokio::test]
    async fn test_bind_on_taken_port_defers_to_authority() {
        let taken = UdpSocket::bind(local(0)).await.unwrap();
        let addr = taken.local_addr().unwrap();

        let result = DiscoveryService::bind(
            addr,
            PeerRegistry::new(Duration::from_secs(30)),
            Duration::from_secs(10),
        )
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_from_unknown_peer_is_ignored() {
        let service = service().await;
        let data = protocol::encode(&Message::Heartbeat { port: 9002 }).unwrap();
        service.handle_datagram(&data, local(40000)).await;
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let service = service().await;
        service.handle_datagram(b"register-9001", local(40000)).await;
        service
            .handle_datagram(br#"{"type":"metrics"}"#, local(40000))
            .await;
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_register_uses_sender_address_and_announced_port() {
        let service = service().await;
        let agent = UdpSocket::bind(local(0)).await.unwrap();
        let agent_addr = agent.local_addr().unwrap();

        let data = protocol::encode(&Message::Register { port: 9001 }).unwrap();
        service.handle_datagram(&data, agent_addr).await;

        assert_eq!(service.registry().endpoints().await, vec![local(9001)]);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, _) = agent.recv_from(&mut buf).await.unwrap();
        assert_eq!(
            protocol::decode(&buf[..len]).unwrap(),
            Message::ClientList {
                clients: vec![local(9001)]
            }
        );
    }

    #[tokio::test]
    async fn test_wrong_message_kind_leaves_registry_unchanged() {
        let service = service().await;
        let register = protocol::encode(&Message::Register { port: 9001 }).unwrap();
        service.handle_datagram(&register, local(40000)).await;

        let stray = protocol::encode(&Message::ClientList {
            clients: vec![local(9002), local(9003)],
        })
        .unwrap();
        service.handle_datagram(&stray, local(40001)).await;

        assert_eq!(service.registry().endpoints().await, vec![local(9001)]);
    }

    #[tokio::test]
    async fn test_only_new_peer_is_announced() {
        let service = service().await;
        let agent = UdpSocket::bind(local(0)).await.unwrap();
        let relay = UdpSocket::bind(local(0)).await.unwrap();
        let register = protocol::encode(&Message::Register {
            port: relay.local_addr().unwrap().port(),
        })
        .unwrap();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        service.handle_datagram(&register, agent.local_addr().unwrap()).await;
        let (len, _) = relay.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            protocol::decode(&buf[..len]).unwrap(),
            Message::ClientList { .. }
        ));

        // A known peer registering again gets a reply but triggers no announcement
        service.handle_datagram(&register, agent.local_addr().unwrap()).await;
        let announced = tokio::time::timeout(Duration::from_millis(200), relay.recv_from(&mut buf)).await;
        assert!(announced.is_err());

        for _ in 0..2 {
            let (len, _) = agent.recv_from(&mut buf).await.unwrap();
            assert!(matches!(
                protocol::decode(&buf[..len]).unwrap(),
                Message::ClientList { .. }
            ));
        }
        assert_eq!(service.registry().len().await, 1);
    }
}
