//! Common test utilities shared across the integration test files.

#![allow(dead_code)] // each test file uses a subset of these helpers

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use etherparse::PacketBuilder;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use hugin::capture::CapturedFrame;
use hugin::plugin::{Analyzer, DispatchEvent, PluginError};

/// Encode a minimal DNS message with a single A/IN question.
pub fn dns_message(id: u16, name: &str, qr: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&id.to_be_bytes());
    buf.push(if qr { 0x80 } else { 0x00 });
    buf.push(0x00);
    buf.extend_from_slice(&[0x00, 0x01]); // qdcount
    buf.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in name.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
    buf.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A IN
    buf
}

fn frame_from(data: Vec<u8>) -> CapturedFrame {
    CapturedFrame {
        timestamp: Utc::now(),
        caplen: data.len() as u32,
        origlen: data.len() as u32,
        data,
    }
}

/// Ethernet/IPv4/UDP frame carrying `payload`.
pub fn udp_frame(
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    payload: &[u8],
) -> CapturedFrame {
    let builder = PacketBuilder::ethernet2([0x02; 6], [0x04; 6])
        .ipv4(src, dst, 64)
        .udp(src_port, dst_port);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, payload).unwrap();
    frame_from(out)
}

/// Ethernet/IPv4/TCP frame carrying `payload` with the RFC 1035 2-byte
/// length prefix prepended.
pub fn tcp_dns_frame(
    src: [u8; 4],
    src_port: u16,
    dst: [u8; 4],
    dst_port: u16,
    message: &[u8],
) -> CapturedFrame {
    let mut payload = (message.len() as u16).to_be_bytes().to_vec();
    payload.extend_from_slice(message);
    let builder = PacketBuilder::ethernet2([0x02; 6], [0x04; 6])
        .ipv4(src, dst, 64)
        .tcp(src_port, dst_port, 1000, 4096);
    let mut out = Vec::with_capacity(builder.size(payload.len()));
    builder.write(&mut out, &payload).unwrap();
    frame_from(out)
}

/// Ethernet/IPv4 ICMP echo frame (proto 1, not a transport we accept).
pub fn icmp_frame(src: [u8; 4], dst: [u8; 4]) -> CapturedFrame {
    let builder = PacketBuilder::ethernet2([0x02; 6], [0x04; 6])
        .ipv4(src, dst, 64)
        .icmpv4_echo_request(1, 1);
    let mut out = Vec::new();
    builder.write(&mut out, &[]).unwrap();
    frame_from(out)
}

/// Records every event it is handed.
pub struct RecordingAnalyzer {
    name: &'static str,
    pub events: Arc<Mutex<Vec<DispatchEvent>>>,
}

impl RecordingAnalyzer {
    pub fn new(name: &'static str) -> (Box<Self>, Arc<Mutex<Vec<DispatchEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(RecordingAnalyzer {
                name,
                events: events.clone(),
            }),
            events,
        )
    }
}

#[async_trait]
impl Analyzer for RecordingAnalyzer {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn process(&self, event: &DispatchEvent) -> Result<(), PluginError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Counts deliveries.
pub struct CountingAnalyzer {
    name: &'static str,
    pub count: Arc<AtomicUsize>,
}

impl CountingAnalyzer {
    pub fn new(name: &'static str) -> (Box<Self>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (
            Box::new(CountingAnalyzer {
                name,
                count: count.clone(),
            }),
            count,
        )
    }
}

#[async_trait]
impl Analyzer for CountingAnalyzer {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn process(&self, _event: &DispatchEvent) -> Result<(), PluginError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Panics on the first delivery, killing its worker task.
pub struct PanickingAnalyzer;

#[async_trait]
impl Analyzer for PanickingAnalyzer {
    fn name(&self) -> &'static str {
        "panicky"
    }

    async fn process(&self, _event: &DispatchEvent) -> Result<(), PluginError> {
        panic!("induced worker crash");
    }
}

/// Fails on every delivery.
pub struct PoisonAnalyzer;

#[async_trait]
impl Analyzer for PoisonAnalyzer {
    fn name(&self) -> &'static str {
        "poison"
    }

    async fn process(&self, _event: &DispatchEvent) -> Result<(), PluginError> {
        Err(PluginError::Process("induced failure".to_string()))
    }
}

/// Parks inside `process` until released, so tests can fill its inbox
/// deterministically. `entered` gains a permit at each process entry.
pub struct GatedAnalyzer {
    pub entered: Arc<Semaphore>,
    pub release: Arc<Semaphore>,
}

impl GatedAnalyzer {
    pub fn new() -> (Box<Self>, Arc<Semaphore>, Arc<Semaphore>) {
        let entered = Arc::new(Semaphore::new(0));
        let release = Arc::new(Semaphore::new(0));
        (
            Box::new(GatedAnalyzer {
                entered: entered.clone(),
                release: release.clone(),
            }),
            entered,
            release,
        )
    }
}

#[async_trait]
impl Analyzer for GatedAnalyzer {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn process(&self, _event: &DispatchEvent) -> Result<(), PluginError> {
        self.entered.add_permits(1);
        match self.release.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => {}
        }
        Ok(())
    }
}
