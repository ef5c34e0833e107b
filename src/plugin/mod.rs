mod authorized_servers;
mod client_stats;
mod packet_logger;
mod server_stats;

pub use authorized_servers::AuthorizedServers;
pub use client_stats::ClientStats;
pub use packet_logger::PacketLogger;
pub use server_stats::ServerStats;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::{MonitorConfig, PluginConfig};
use crate::dns::DnsMessage;
use crate::endpoint::EndpointRoles;
use crate::stats::{StatsAccumulator, keys};
use crate::store::{EndpointRow, EndpointStore};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },
    #[error("{0}")]
    Process(String),
}

/// One parsed DNS event as delivered to analyzers.
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub timestamp: DateTime<Utc>,
    pub message: Arc<DnsMessage>,
    pub roles: EndpointRoles,
    pub server: EndpointRow,
    pub client: EndpointRow,
}

/// The analyzer capability. Implementations must not assume anything about
/// the DNS message beyond what its bytes contain; the core hands it over
/// verbatim.
#[async_trait]
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError>;

    /// Called once after the analyzer's inbox has drained at shutdown.
    async fn shutdown(&self) {}
}

type AnalyzerCtor =
    fn(&PluginConfig, Arc<dyn EndpointStore>) -> Result<Box<dyn Analyzer>, PluginError>;

/// The analyzers compiled into this binary, in dispatch-table order.
/// Dynamic namespace scanning becomes an explicit link-time registry here.
const BUILTIN_ANALYZERS: &[(&str, AnalyzerCtor)] = &[
    ("packet_logger", PacketLogger::spawn),
    ("authorized_servers", AuthorizedServers::spawn),
    ("server_stats", ServerStats::spawn),
    ("client_stats", ClientStats::spawn),
];

/// A loaded analyzer: its inbox plus the worker task consuming it.
struct PluginBinding {
    name: &'static str,
    tx: mpsc::Sender<DispatchEvent>,
    worker: JoinHandle<()>,
    /// Set once the worker is observed dead; dispatch skips it afterwards.
    closed: AtomicBool,
    counter_key: String,
    dropped_key: String,
}

/// Holds the dispatch table. Immutable after startup; there is no
/// hot-reload.
pub struct PluginRegistry {
    bindings: Vec<PluginBinding>,
    stats: Arc<StatsAccumulator>,
}

impl PluginRegistry {
    pub fn new(stats: Arc<StatsAccumulator>) -> Self {
        PluginRegistry {
            bindings: Vec::new(),
            stats,
        }
    }

    /// Instantiate every enabled builtin analyzer per the configuration.
    pub fn load(
        config: &MonitorConfig,
        store: Arc<dyn EndpointStore>,
        stats: Arc<StatsAccumulator>,
    ) -> Self {
        let mut registry = PluginRegistry::new(stats);

        for (name, ctor) in BUILTIN_ANALYZERS {
            let Some(value) = config.plugins.get(*name) else {
                info!("plugin {name}: no configuration, skipping");
                continue;
            };
            let plugin_config: PluginConfig = match value.clone().try_into() {
                Ok(plugin_config) => plugin_config,
                Err(_) => {
                    info!("plugin {name}: configuration is not a table, skipping");
                    continue;
                }
            };
            if plugin_config.enable != 1 {
                info!("plugin {name}: not enabled, skipping");
                continue;
            }
            match ctor(&plugin_config, store.clone()) {
                Ok(analyzer) => registry.register(analyzer, config.plugin_queue_depth),
                Err(e) => warn!("plugin {name}: spawn failed: {e}"),
            }
        }

        info!("loaded plugins: {:?}", registry.names());
        registry
    }

    /// Spawn a worker for the analyzer and add it to the dispatch table.
    pub fn register(&mut self, analyzer: Box<dyn Analyzer>, queue_depth: usize) {
        let name = analyzer.name();
        let (tx, rx) = mpsc::channel(queue_depth);
        let worker = tokio::spawn(run_worker(analyzer, rx));
        self.bindings.push(PluginBinding {
            name,
            tx,
            worker,
            closed: AtomicBool::new(false),
            counter_key: format!("plugin::{name}"),
            dropped_key: format!("plugin::{name}::dropped"),
        });
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.bindings.iter().map(|b| b.name).collect()
    }

    /// Names of bindings still accepting dispatches, i.e. excluding any
    /// whose worker has been observed dead.
    pub fn live_names(&self) -> Vec<&'static str> {
        self.bindings
            .iter()
            .filter(|b| !b.closed.load(Ordering::Relaxed))
            .map(|b| b.name)
            .collect()
    }

    /// Fan an event out to every live analyzer.
    ///
    /// The post is fire-and-forget: a full inbox drops the event for that
    /// analyzer only (counted), and a dead worker is skipped from then on.
    /// No lock is held across the posts.
    pub fn dispatch(&self, event: DispatchEvent) {
        self.stats.increment(keys::DNS);
        self.stats.increment(if event.message.is_answer() {
            keys::ANSWER
        } else {
            keys::QUESTION
        });

        for binding in &self.bindings {
            if binding.closed.load(Ordering::Relaxed) {
                continue;
            }
            match binding.tx.try_send(event.clone()) {
                Ok(()) => self.stats.increment(&binding.counter_key),
                Err(TrySendError::Full(_)) => self.stats.increment(&binding.dropped_key),
                Err(TrySendError::Closed(_)) => {
                    info!("plugin {} worker exited; removing from dispatch", binding.name);
                    binding.closed.store(true, Ordering::Relaxed);
                }
            }
        }
    }

    /// Close every inbox and give the workers a bounded grace period to
    /// drain. Remaining items past the deadline are dropped with a warning.
    pub async fn shutdown(self, grace: Duration) {
        for binding in self.bindings {
            drop(binding.tx);
            match timeout(grace, binding.worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_panic() => {
                    info!("plugin {} worker panicked during shutdown", binding.name);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!(
                        "plugin {} did not drain within {:?}; dropping remaining events",
                        binding.name, grace
                    );
                }
            }
        }
    }
}

/// Per-plugin worker: drains the inbox in arrival order, isolating process
/// failures. An Err from process is logged and never unloads the analyzer.
async fn run_worker(analyzer: Box<dyn Analyzer>, mut rx: mpsc::Receiver<DispatchEvent>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = analyzer.process(&event).await {
            warn!("plugin {}: process failed: {e}", analyzer.name());
        }
    }
    analyzer.shutdown().await;
}
