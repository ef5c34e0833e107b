use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use super::{Analyzer, DispatchEvent, PluginError};
use crate::config::PluginConfig;
use crate::store::EndpointStore;

const DEFAULT_KEEP_FOR: Duration = Duration::from_secs(30 * 86400);

/// Logs one line per observed DNS message and keeps a retention-bounded
/// record of recent sightings.
pub struct PacketLogger {
    keep_for: Duration,
    recent: Mutex<VecDeque<(DateTime<Utc>, String)>>,
}

impl PacketLogger {
    pub fn spawn(
        config: &PluginConfig,
        _store: Arc<dyn EndpointStore>,
    ) -> Result<Box<dyn Analyzer>, PluginError> {
        let keep_for = if let Some(spec) = config.opt_str("keep_for") {
            parse_duration(spec).ok_or_else(|| PluginError::InvalidOption {
                option: "keep_for".to_string(),
                reason: format!("unparseable duration {spec:?}"),
            })?
        } else if let Some(secs) = config.opt_int("keep_for") {
            Duration::from_secs(secs.max(0) as u64)
        } else {
            DEFAULT_KEEP_FOR
        };
        Ok(Box::new(PacketLogger {
            keep_for,
            recent: Mutex::new(VecDeque::new()),
        }))
    }

    #[cfg(test)]
    fn recent_len(&self) -> usize {
        self.recent.lock().len()
    }
}

#[async_trait]
impl Analyzer for PacketLogger {
    fn name(&self) -> &'static str {
        "packet_logger"
    }

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError> {
        let qname = event.message.qname().unwrap_or_else(|| "-".to_string());
        let kind = if event.message.is_answer() {
            "answer"
        } else {
            "question"
        };
        debug!(
            "dns {kind} id={} {}:{} -> {}:{} qname={qname}",
            event.message.header.id,
            event.roles.client_ip,
            event.roles.client_port,
            event.roles.server_ip,
            event.roles.server_port,
        );

        let mut recent = self.recent.lock();
        recent.push_back((event.timestamp, qname));
        let cutoff = chrono::Duration::from_std(self.keep_for)
            .ok()
            .and_then(|window| event.timestamp.checked_sub_signed(window));
        if let Some(cutoff) = cutoff {
            while recent.front().is_some_and(|(ts, _)| *ts < cutoff) {
                recent.pop_front();
            }
        }
        Ok(())
    }
}

/// Parse retention specs like "30 days", "12 hours", "90 minutes",
/// "45 seconds", or a bare number of seconds.
fn parse_duration(spec: &str) -> Option<Duration> {
    let spec = spec.trim();
    if let Ok(secs) = spec.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let (number, unit) = spec.split_once(char::is_whitespace)?;
    let number: u64 = number.trim().parse().ok()?;
    let multiplier = match unit.trim().to_lowercase().as_str() {
        "second" | "seconds" | "sec" | "secs" | "s" => 1,
        "minute" | "minutes" | "min" | "mins" | "m" => 60,
        "hour" | "hours" | "h" => 3600,
        "day" | "days" | "d" => 86400,
        "week" | "weeks" | "w" => 7 * 86400,
        _ => return None,
    };
    Some(Duration::from_secs(number * multiplier))
}
