//! Wire protocol
//!
//! Every datagram carries exactly one JSON object tagged by `type`. UDP keeps
//! message boundaries, so no extra framing is needed. Messages are decoded
//! once here and the rest of the crate only sees [`Message`].

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{AppError, AppResult};

/// Receive buffer size, large enough for any UDP payload
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Kind of external measurement that produced a metrics payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MetricKind {
    /// Per-process scheduler invocation counts
    Cpu,
}

impl MetricKind {
    /// Parse an operator supplied selector such as `" CPU\n"`
    pub fn parse(input: &str) -> AppResult<Self> {
        let normalized = input.trim().to_lowercase();
        normalized
            .parse()
            .map_err(|_| AppError::UnknownMetricKind(input.trim().to_string()))
    }

    /// Marker shown next to the samples of this kind
    pub fn marker(&self) -> &'static str {
        match self {
            MetricKind::Cpu => "SCHEDULE_METRIC",
        }
    }
}

/// A metrics payload in flight between an agent, its relay and the peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMessage {
    /// Relay endpoint of the peer whose agent produced the sample
    pub source: SocketAddr,
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Set on copies produced by fan-out; those are never forwarded again
    #[serde(default)]
    pub relayed: bool,
    #[serde(rename = "metrics")]
    pub payload: String,
}

impl MetricMessage {
    pub fn new(source: SocketAddr, kind: MetricKind, payload: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            seq: None,
            relayed: false,
            payload: payload.into(),
        }
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }

    /// Copy sent to the other peers
    pub fn relayed_copy(&self) -> Self {
        Self {
            relayed: true,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Join the peer set; `port` is the sender's relay port
    Register { port: u16 },
    /// Liveness refresh for an already registered relay port
    Heartbeat { port: u16 },
    /// Current peer set, sent as a register reply and as an announcement
    ClientList { clients: Vec<SocketAddr> },
    Metrics(MetricMessage),
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Register { .. } => "register",
            Message::Heartbeat { .. } => "heartbeat",
            Message::ClientList { .. } => "client_list",
            Message::Metrics(_) => "metrics",
        }
    }
}

pub fn encode(message: &Message) -> AppResult<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode(datagram: &[u8]) -> AppResult<Message> {
    Ok(serde_json::from_slice(datagram)?)
}
