use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureSource, CaptureWorker, CapturedFrame};
use crate::config::MonitorConfig;
use crate::decode::{self, LinkLayer, Transport};
use crate::dns::DnsMessage;
use crate::endpoint::{EndpointResolver, EndpointRoles};
use crate::error::Result;
use crate::plugin::{DispatchEvent, PluginRegistry};
use crate::stats::{StatsAccumulator, keys};
use crate::store::EndpointStore;

/// Depth of the frame-batch queue between the capture thread and the
/// pipeline. Each entry is a batch, so this buys considerable slack.
const FRAME_QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Init,
    Starting,
    Running,
    Draining,
    Failed,
    Stopped,
}

/// Wires capture, decode, endpoint resolution, dispatch, and stats into a
/// running pipeline and owns their lifecycle.
pub struct Supervisor {
    config: MonitorConfig,
    state: SupervisorState,
}

impl Supervisor {
    pub fn new(config: MonitorConfig) -> Self {
        Supervisor {
            config,
            state: SupervisorState::Init,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Run until a termination signal arrives.
    ///
    /// Startup failures (capture open, unsupported datalink) return Err and
    /// leave the supervisor in Failed; per-event failures never do.
    pub async fn run(mut self, store: Arc<dyn EndpointStore>) -> Result<()> {
        self.state = SupervisorState::Starting;

        let stats = Arc::new(StatsAccumulator::new());
        let registry = PluginRegistry::load(&self.config, store.clone(), stats.clone());

        let capture = match CaptureSource::open(&self.config) {
            Ok(capture) => capture,
            Err(e) => {
                self.state = SupervisorState::Failed;
                error!("cannot open capture: {e}");
                return Err(e);
            }
        };
        let link = capture.link_layer();

        let (frame_tx, mut frame_rx) = mpsc::channel(FRAME_QUEUE_DEPTH);
        let capture_worker = capture.spawn(frame_tx);
        let resolver = EndpointResolver::new(store);

        self.state = SupervisorState::Running;
        info!("pipeline running on {}", self.config.device);

        let flush_period = Duration::from_secs(self.config.stats_interval_secs);
        let mut flush_timer = interval_at(Instant::now() + flush_period, flush_period);

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }
                _ = flush_timer.tick() => {
                    stats.flush();
                }
                batch = frame_rx.recv() => match batch {
                    Some(frames) => {
                        for frame in &frames {
                            process_frame(link, frame, &resolver, &registry, &stats);
                        }
                    }
                    None => {
                        info!("capture worker exited unexpectedly; shutting down");
                        break;
                    }
                }
            }
        }

        self.state = SupervisorState::Draining;
        self.drain(capture_worker, &mut frame_rx, link, &resolver, &registry, &stats)
            .await;

        stats.flush();
        registry
            .shutdown(Duration::from_secs(self.config.plugin_grace_secs))
            .await;

        self.state = SupervisorState::Stopped;
        info!("shutdown complete");
        Ok(())
    }

    /// Stop the capture worker and process whatever is still queued, with a
    /// bounded wait. Frames still queued past the deadline are dropped.
    async fn drain(
        &self,
        capture_worker: CaptureWorker,
        frame_rx: &mut mpsc::Receiver<Vec<CapturedFrame>>,
        link: LinkLayer,
        resolver: &EndpointResolver,
        registry: &PluginRegistry,
        stats: &StatsAccumulator,
    ) {
        capture_worker.stop();

        let deadline = Instant::now() + Duration::from_secs(self.config.drain_timeout_secs);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match timeout(remaining, frame_rx.recv()).await {
                Ok(Some(frames)) => {
                    for frame in &frames {
                        process_frame(link, frame, resolver, registry, stats);
                    }
                }
                // channel closed: the capture thread is done
                Ok(None) => break,
                Err(_) => {
                    warn!("decode queue did not drain within the timeout; dropping the rest");
                    break;
                }
            }
        }

        match capture_worker.join().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => info!("capture worker exited with error: {e}"),
            Err(e) if e.is_panic() => info!("capture worker panicked"),
            Err(_) => {}
        }
    }
}

/// Run one captured frame through decode → parse → resolve → dispatch.
///
/// Every reject is accounted; nothing here can take the pipeline down.
pub fn process_frame(
    link: LinkLayer,
    frame: &CapturedFrame,
    resolver: &EndpointResolver,
    registry: &PluginRegistry,
    stats: &StatsAccumulator,
) {
    stats.increment(keys::PACKET);

    let segment = match decode::decode(link, &frame.data) {
        Ok(segment) => segment,
        Err(_) => {
            stats.increment(keys::INVALID);
            return;
        }
    };

    stats.increment(match segment.protocol {
        Transport::Udp => keys::UDP,
        Transport::Tcp => keys::TCP,
    });
    if segment.src_port == 53 || segment.dst_port == 53 {
        stats.increment(keys::PORT53);
    }

    let message = match DnsMessage::parse(&segment.payload, segment.protocol) {
        Ok(message) => message,
        // not DNS; silent per policy
        Err(_) => return,
    };

    let roles = EndpointRoles::from_segment(&segment, &message);
    let (server, client) = match resolver.resolve(&roles) {
        Ok(rows) => rows,
        Err(e) => {
            warn!("dropping event after repeated store failure: {e}");
            return;
        }
    };

    debug!(
        "dns event {} -> {} (qr={})",
        roles.client_ip, roles.server_ip, message.header.qr
    );

    registry.dispatch(DispatchEvent {
        timestamp: frame.timestamp,
        message: Arc::new(message),
        roles,
        server,
        client,
    });
}

/// Resolves when SIGINT or SIGTERM arrives. Signaled once; a second signal
/// during drain is ignored by the pipeline.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("cannot install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
