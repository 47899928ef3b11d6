//! Metric payload parsing and the console table
//!
//! A payload is the raw text printed by the collector, e.g.
//!
//! ```text
//! Attaching 2 probes...
//! @[bash]: 4
//! @[kworker/0:1]: 12
//! ```
//!
//! Metadata lines are stripped, every remaining line becomes a
//! `(name, count)` entry or is kept verbatim as unparsed.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::protocol::{MetricKind, MetricMessage};

const NAME_WIDTH: usize = 30;
const RULE_WIDTH: usize = 40;
const KIND_MARKER: &str = ":T:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricEntry {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricSample {
    pub entries: Vec<MetricEntry>,
    /// Lines that are neither metadata nor `name: count`
    pub unparsed: Vec<String>,
    /// Trailing `:T:<KIND>` marker, when the payload carried one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

impl MetricSample {
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| e.count).sum()
    }
}

pub fn parse_payload(payload: &str) -> MetricSample {
    let (body, marker) = split_marker(payload.trim());
    let mut sample = MetricSample {
        marker,
        ..MetricSample::default()
    };

    for line in body.lines().map(str::trim) {
        if is_metadata(line) {
            continue;
        }
        match parse_line(line) {
            Some(entry) => sample.entries.push(entry),
            None => sample.unparsed.push(line.to_string()),
        }
    }
    sample
}

fn split_marker(payload: &str) -> (&str, Option<String>) {
    if let Some(idx) = payload.rfind(KIND_MARKER) {
        let tag = &payload[idx + KIND_MARKER.len()..];
        let is_tag = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
        if is_tag {
            return (payload[..idx].trim_end(), Some(tag.to_string()));
        }
    }
    (payload, None)
}

fn is_metadata(line: &str) -> bool {
    line.is_empty() || line.starts_with("Attaching ")
}

fn parse_line(line: &str) -> Option<MetricEntry> {
    let (name, count) = match (line.find("@["), line.find("]: ")) {
        (Some(open), Some(close)) if open + 2 <= close => (&line[open + 2..close], &line[close + 3..]),
        _ => line.split_once(": ")?,
    };

    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let count = count.trim().parse().ok()?;
    Some(MetricEntry {
        name: name.to_string(),
        count,
    })
}

/// Latest sample received from one source
#[derive(Debug, Clone, Serialize)]
pub struct BoardEntry {
    pub source: SocketAddr,
    pub kind: MetricKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub sample: MetricSample,
    pub updated_at: DateTime<Utc>,
}

/// Console view of the latest sample per source
#[derive(Debug, Default)]
pub struct MetricBoard {
    entries: BTreeMap<SocketAddr, BoardEntry>,
    last_update: Option<DateTime<Utc>>,
}

pub type SharedBoard = Arc<RwLock<MetricBoard>>;

impl MetricBoard {
    pub fn shared() -> SharedBoard {
        Arc::new(RwLock::new(MetricBoard::default()))
    }

    pub fn record(&mut self, message: &MetricMessage) -> &BoardEntry {
        self.record_at(message, Utc::now())
    }

    pub fn record_at(&mut self, message: &MetricMessage, now: DateTime<Utc>) -> &BoardEntry {
        self.last_update = Some(now);
        let entry = BoardEntry {
            source: message.source,
            kind: message.kind,
            seq: message.seq,
            sample: parse_payload(&message.payload),
            updated_at: now,
        };
        self.entries.insert(message.source, entry);
        &self.entries[&message.source]
    }

    pub fn entries(&self) -> Vec<BoardEntry> {
        self.entries.values().cloned().collect()
    }

    pub fn get(&self, source: &SocketAddr) -> Option<&BoardEntry> {
        self.entries.get(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ts) = self.last_update {
            let _ = writeln!(out, "Last update: {}\n", ts.to_rfc3339_opts(SecondsFormat::Secs, true));
        }

        for entry in self.entries.values() {
            let _ = writeln!(out, "Source {} ({})", entry.source, entry.kind.marker());
            let _ = writeln!(out, "{:<width$} {}", "Metric", "Count", width = NAME_WIDTH);
            let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
            for metric in &entry.sample.entries {
                let _ = writeln!(out, "{:<width$} {}", metric.name, metric.count, width = NAME_WIDTH);
            }
            for line in &entry.sample.unparsed {
                let _ = writeln!(out, "Invalid line format: {}", line);
            }
            out.push('\n');
        }

        out.push_str(&"=".repeat(RULE_WIDTH));
        out
    }
}
