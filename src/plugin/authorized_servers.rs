use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use tracing::info;

use super::{Analyzer, DispatchEvent, PluginError};
use crate::config::PluginConfig;
use crate::store::EndpointStore;

/// Tracks which server IPs have been seen answering queries and flags each
/// newly observed one, so rogue resolvers on the network stand out.
pub struct AuthorizedServers {
    seen: DashSet<IpAddr>,
}

impl AuthorizedServers {
    pub fn spawn(
        _config: &PluginConfig,
        _store: Arc<dyn EndpointStore>,
    ) -> Result<Box<dyn Analyzer>, PluginError> {
        Ok(Box::new(AuthorizedServers {
            seen: DashSet::new(),
        }))
    }
}

#[async_trait]
impl Analyzer for AuthorizedServers {
    fn name(&self) -> &'static str {
        "authorized_servers"
    }

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError> {
        // only answers prove a host is acting as a server
        if !event.message.is_answer() {
            return Ok(());
        }
        if self.seen.insert(event.roles.server_ip) {
            info!(
                "new DNS server observed answering: {} (row {})",
                event.roles.server_ip, event.server.id
            );
        }
        Ok(())
    }

    async fn shutdown(&self) {
        info!("observed {} distinct answering servers", self.seen.len());
    }
}
