use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::{Analyzer, DispatchEvent, PluginError};
use crate::config::PluginConfig;
use crate::store::EndpointStore;

#[derive(Default)]
pub(crate) struct Tally {
    pub questions: u64,
    pub answers: u64,
}

/// Per-server question/answer tallies.
pub struct ServerStats {
    per_ip: DashMap<IpAddr, Tally>,
    emit_on_shutdown: bool,
}

impl ServerStats {
    pub fn spawn(
        config: &PluginConfig,
        _store: Arc<dyn EndpointStore>,
    ) -> Result<Box<dyn Analyzer>, PluginError> {
        Ok(Box::new(ServerStats {
            per_ip: DashMap::new(),
            emit_on_shutdown: config.opt_int("rrd") == Some(1),
        }))
    }
}

#[async_trait]
impl Analyzer for ServerStats {
    fn name(&self) -> &'static str {
        "server_stats"
    }

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError> {
        let mut tally = self.per_ip.entry(event.roles.server_ip).or_default();
        if event.message.is_answer() {
            tally.answers += 1;
        } else {
            tally.questions += 1;
        }
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.emit_on_shutdown {
            return;
        }
        for entry in self.per_ip.iter() {
            info!(
                "server {}: questions={} answers={}",
                entry.key(),
                entry.value().questions,
                entry.value().answers
            );
        }
    }
}
