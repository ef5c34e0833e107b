use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use super::server_stats::Tally;
use super::{Analyzer, DispatchEvent, PluginError};
use crate::config::PluginConfig;
use crate::store::EndpointStore;

/// Per-client question/answer tallies.
pub struct ClientStats {
    per_ip: DashMap<IpAddr, Tally>,
    emit_on_shutdown: bool,
}

impl ClientStats {
    pub fn spawn(
        config: &PluginConfig,
        _store: Arc<dyn EndpointStore>,
    ) -> Result<Box<dyn Analyzer>, PluginError> {
        Ok(Box::new(ClientStats {
            per_ip: DashMap::new(),
            emit_on_shutdown: config.opt_int("rrd") == Some(1),
        }))
    }
}

#[async_trait]
impl Analyzer for ClientStats {
    fn name(&self) -> &'static str {
        "client_stats"
    }

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError> {
        let mut tally = self.per_ip.entry(event.roles.client_ip).or_default();
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
                "client {}: questions={} answers={}",
                entry.key(),
                entry.value().questions,
                entry.value().answers
            );
        }
    }
}
