use std::collections::HashMap;
use std::net::SocketAddr;

use crate::protocol::MetricMessage;

/// Last admitted payload per source
#[derive(Debug, Default)]
pub struct DedupCache {
    last: HashMap<SocketAddr, String>,
}

impl DedupCache {
    /// Record `message` unless its payload is byte-identical to the last one
    /// admitted from the same source
    pub fn admit(&mut self, message: &MetricMessage) -> bool {
        match self.last.get(&message.source) {
            Some(previous) if previous.as_bytes() == message.payload.as_bytes() => false,
            _ => {
                self.last.insert(message.source, message.payload.clone());
                true
            }
        }
    }

    pub fn last_payload(&self, source: &SocketAddr) -> Option<&str> {
        self.last.get(source).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MetricKind;

    fn message(port: u16, payload: &str) -> MetricMessage {
        MetricMessage::new(SocketAddr::from(([127, 0, 0, 1], port)), MetricKind::Cpu, payload)
    }

    #[test]
    fn test_identical_payload_admitted_once() {
        let mut cache = DedupCache::default();
        assert!(cache.admit(&message(9001, "sched@[bash]: 4\n")));
        assert!(!cache.admit(&message(9001, "sched@[bash]: 4\n")));
    }

    #[test]
    fn test_changed_payload_always_admitted() {
        let mut cache = DedupCache::default();
        assert!(cache.admit(&message(9001, "@[bash]: 4")));
        assert!(cache.admit(&message(9001, "@[bash]: 5")));
        // Going back to an older value is still a change
        assert!(cache.admit(&message(9001, "@[bash]: 4")));
        assert_eq!(cache.last_payload(&SocketAddr::from(([127, 0, 0, 1], 9001))), Some("@[bash]: 4"));
    }

    #[test]
    fn test_sources_are_independent() {
        let mut cache = DedupCache::default();
        assert!(cache.admit(&message(9001, "@[bash]: 4")));
        assert!(cache.admit(&message(9002, "@[bash]: 4")));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_sequence_number_does_not_defeat_dedup() {
        let mut cache = DedupCache::default();
        assert!(cache.admit(&message(9001, "@[bash]: 4").with_seq(1)));
        assert!(!cache.admit(&message(9001, "@[bash]: 4").with_seq(2)));
    }
}
