use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use pcap::{Active, Capture};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::decode::{DecodeError, LinkLayer};
use crate::error::{ConfigError, MonitorError};

/// Maximum frames accumulated before a batch is handed to the pipeline.
pub const FRAME_BATCH_MAX: usize = 64;

/// Backoff bounds for reopening the capture after a read error.
const REOPEN_DELAY_BASE: Duration = Duration::from_secs(1);
const REOPEN_DELAY_MAX: Duration = Duration::from_secs(30);

/// One frame as delivered by the capture callback.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: DateTime<Utc>,
    pub caplen: u32,
    pub origlen: u32,
    pub data: Vec<u8>,
}

impl CapturedFrame {
    fn from_packet(packet: &pcap::Packet<'_>) -> Self {
        let ts = packet.header.ts;
        let timestamp =
            DateTime::from_timestamp(ts.tv_sec as i64, (ts.tv_usec.clamp(0, 999_999) as u32) * 1_000)
                .unwrap_or_else(Utc::now);
        CapturedFrame {
            timestamp,
            caplen: packet.header.caplen,
            origlen: packet.header.len,
            data: packet.data.to_vec(),
        }
    }
}

/// Everything needed to (re)open the capture handle.
#[derive(Debug, Clone)]
struct CaptureSettings {
    device: String,
    snaplen: i32,
    promisc: bool,
    timeout_ms: i32,
    filter: String,
}

impl CaptureSettings {
    fn from_config(config: &MonitorConfig) -> Self {
        CaptureSettings {
            device: config.device.clone(),
            snaplen: config.snaplen,
            promisc: config.promisc,
            timeout_ms: config.timeout_ms,
            filter: config.filter.clone(),
        }
    }
}

/// An open live capture, ready to be moved onto its worker thread.
pub struct CaptureSource {
    capture: Capture<Active>,
    link: LinkLayer,
    settings: CaptureSettings,
}

impl CaptureSource {
    /// Open the configured device and install the BPF filter.
    ///
    /// Open failure is fatal; filter failure logs a warning and continues
    /// with catch-all capture.
    pub fn open(config: &MonitorConfig) -> Result<Self, MonitorError> {
        validate_device_name(&config.device)?;
        let settings = CaptureSettings::from_config(config);
        let (capture, link) = open_live(&settings)?;
        info!(
            "capture open on {} (datalink {:?}, snaplen {}, filter {:?})",
            settings.device, link, settings.snaplen, settings.filter
        );
        Ok(CaptureSource {
            capture,
            link,
            settings,
        })
    }

    /// The link-layer framing the decoder must use for this handle.
    pub fn link_layer(&self) -> LinkLayer {
        self.link
    }

    /// Move the capture onto a dedicated blocking thread that posts frame
    /// batches into `tx`. The kernel read never shares a thread with the
    /// decode path.
    pub fn spawn(self, tx: mpsc::Sender<Vec<CapturedFrame>>) -> CaptureWorker {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let handle = tokio::task::spawn_blocking(move || {
            capture_loop(self.capture, self.settings, tx, flag)
        });
        CaptureWorker { shutdown, handle }
    }
}

/// Handle to the running capture thread.
pub struct CaptureWorker {
    shutdown: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<Result<(), MonitorError>>,
}

impl CaptureWorker {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub async fn join(self) -> Result<Result<(), MonitorError>, tokio::task::JoinError> {
        self.handle.await
    }
}

fn open_live(settings: &CaptureSettings) -> Result<(Capture<Active>, LinkLayer), MonitorError> {
    let mut capture = Capture::from_device(settings.device.as_str())?
        .promisc(settings.promisc)
        .snaplen(settings.snaplen)
        .timeout(settings.timeout_ms)
        .open()?;

    if let Err(e) = capture.filter(&settings.filter, true) {
        warn!(
            "failed to install BPF filter {:?}: {e}; capturing unfiltered",
            settings.filter
        );
    }

    let link = LinkLayer::from_datalink(capture.get_datalink()).map_err(|e| match e {
        DecodeError::UnsupportedDatalink(dlt) => MonitorError::UnsupportedDatalink(dlt),
        _ => MonitorError::UnsupportedDatalink(-1),
    })?;

    Ok((capture, link))
}

fn capture_loop(
    mut capture: Capture<Active>,
    settings: CaptureSettings,
    tx: mpsc::Sender<Vec<CapturedFrame>>,
    shutdown: Arc<AtomicBool>,
) -> Result<(), MonitorError> {
    let mut batch: Vec<CapturedFrame> = Vec::with_capacity(FRAME_BATCH_MAX);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match capture.next_packet() {
            Ok(packet) => {
                batch.push(CapturedFrame::from_packet(&packet));
                if batch.len() >= FRAME_BATCH_MAX && !flush(&tx, &mut batch) {
                    return Ok(());
                }
            }
            // Expected whenever nothing arrives within the read timeout;
            // used as the batch flush point and the shutdown poll point.
            Err(pcap::Error::TimeoutExpired) => {
                if !batch.is_empty() && !flush(&tx, &mut batch) {
                    return Ok(());
                }
            }
            Err(e) => {
                warn!("capture read error: {e}; reopening");
                match reopen_with_backoff(&settings, &shutdown) {
                    Some(reopened) => capture = reopened,
                    None => break,
                }
            }
        }
    }

    if !batch.is_empty() {
        let _ = tx.blocking_send(std::mem::take(&mut batch));
    }
    Ok(())
}

/// Hand the current batch to the pipeline. Returns false when the pipeline
/// side has gone away.
fn flush(tx: &mpsc::Sender<Vec<CapturedFrame>>, batch: &mut Vec<CapturedFrame>) -> bool {
    tx.blocking_send(std::mem::take(batch)).is_ok()
}

/// Reopen the capture with exponential backoff, capped at 30 s.
/// Returns None if shutdown was requested while waiting.
fn reopen_with_backoff(
    settings: &CaptureSettings,
    shutdown: &AtomicBool,
) -> Option<Capture<Active>> {
    let mut delay = REOPEN_DELAY_BASE;
    loop {
        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
        if !sleep_interruptible(delay + jitter, shutdown) {
            return None;
        }
        match open_live(settings) {
            Ok((capture, _)) => {
                info!("capture reopened on {}", settings.device);
                return Some(capture);
            }
            Err(e) => {
                warn!("capture reopen failed: {e}; next attempt in {:?}", delay);
                delay = (delay * 2).min(REOPEN_DELAY_MAX);
            }
        }
    }
}

/// Sleep in short slices so a shutdown request interrupts the backoff.
/// Returns false when shutdown was requested.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) -> bool {
    let slice = Duration::from_millis(250);
    let mut remaining = total;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = remaining.min(slice);
        std::thread::sleep(step);
        remaining -= step;
    }
    !shutdown.load(Ordering::Relaxed)
}

/// Validate an interface name before handing it to libpcap.
fn validate_device_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() || name.len() > 256 {
        return Err(ConfigError::InvalidDevice(name.to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' || c == ':')
    {
        return Err(ConfigError::InvalidDevice(name.to_string()));
    }
    Ok(())
}
