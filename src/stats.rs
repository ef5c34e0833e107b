use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

/// Counter key names used by the pipeline.
pub mod keys {
    pub const PACKET: &str = "packet";
    pub const INVALID: &str = "invalid";
    pub const UDP: &str = "udp";
    pub const TCP: &str = "tcp";
    pub const PORT53: &str = "port53";
    pub const DNS: &str = "dns";
    pub const QUESTION: &str = "question";
    pub const ANSWER: &str = "answer";
}

/// Keys emitted first in the stats line, in this order.
const PREFIX_KEYS: [&str; 7] = [
    keys::PACKET,
    keys::INVALID,
    keys::UDP,
    keys::PORT53,
    keys::DNS,
    keys::QUESTION,
    keys::ANSWER,
];

/// Shared counter map for operational statistics.
///
/// Counters are created lazily at first increment and drained wholesale at
/// each periodic flush, so a quiet interval emits nothing.
#[derive(Default)]
pub struct StatsAccumulator {
    counters: Mutex<HashMap<String, u64>>,
}

impl StatsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the named counter, creating it at 0 if absent.
    pub fn increment(&self, key: &str) {
        let mut counters = self.counters.lock();
        if let Some(value) = counters.get_mut(key) {
            *value += 1;
        } else {
            counters.insert(key.to_string(), 1);
        }
    }

    /// Current value of a counter, 0 if it has not been touched.
    pub fn get(&self, key: &str) -> u64 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }

    /// Take the current counters and reset the map to empty.
    pub fn snapshot_and_reset(&self) -> HashMap<String, u64> {
        std::mem::take(&mut *self.counters.lock())
    }

    /// Snapshot, reset, and emit the stats line. Quiet intervals are silent.
    pub fn flush(&self) {
        let snapshot = self.snapshot_and_reset();
        if let Some(line) = format_stats_line(&snapshot) {
            debug!("{line}");
        }
    }
}

/// Render a snapshot as `STATS: k1=v1, k2=v2, ...`.
///
/// The well-known pipeline counters come first in a fixed order, then any
/// other counters lexicographically, then the `plugin::*` counters
/// lexicographically. Returns None for an empty snapshot.
pub fn format_stats_line(snapshot: &HashMap<String, u64>) -> Option<String> {
    if snapshot.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = Vec::with_capacity(snapshot.len());
    for key in PREFIX_KEYS {
        if let Some(value) = snapshot.get(key) {
            parts.push(format!("{key}={value}"));
        }
    }

    let mut rest: Vec<&String> = snapshot
        .keys()
        .filter(|k| !PREFIX_KEYS.contains(&k.as_str()) && !k.starts_with("plugin::"))
        .collect();
    rest.sort();
    for key in rest {
        parts.push(format!("{key}={}", snapshot[key]));
    }

    let mut plugins: Vec<&String> = snapshot
        .keys()
        .filter(|k| k.starts_with("plugin::"))
        .collect();
    plugins.sort();
    for key in plugins {
        parts.push(format!("{key}={}", snapshot[key]));
    }

    Some(format!("STATS: {}", parts.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lazy_create_and_increment() {
        let stats = StatsAccumulator::new();
        assert_eq!(stats.get(keys::PACKET), 0);
        stats.increment(keys::PACKET);
        stats.increment(keys::PACKET);
        assert_eq!(stats.get(keys::PACKET), 2);
    }

    #[test]
    fn test_snapshot_resets_totally() {
        let stats = StatsAccumulator::new();
        stats.increment(keys::DNS);
        stats.increment(keys::QUESTION);

        let first = stats.snapshot_and_reset();
        assert_eq!(first.get(keys::DNS), Some(&1));

        let second = stats.snapshot_and_reset();
        assert!(second.is_empty());
    }

    #[test]
    fn test_stats_line_ordering() {
        let stats = StatsAccumulator::new();
        stats.increment("plugin::server_stats");
        stats.increment(keys::ANSWER);
        stats.increment(keys::TCP);
        stats.increment(keys::PACKET);
        stats.increment("plugin::client_stats");
        stats.increment(keys::DNS);

        let line = format_stats_line(&stats.snapshot_and_reset()).unwrap();
        assert_eq!(
            line,
            "STATS: packet=1, dns=1, answer=1, tcp=1, \
             plugin::client_stats=1, plugin::server_stats=1"
        );
    }

    #[test]
    fn test_empty_snapshot_emits_nothing() {
        assert!(format_stats_line(&HashMap::new()).is_none());
    }
}
