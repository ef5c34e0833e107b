use thiserror::Error;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, MonitorError>;

/// Configuration validation errors. These are always fatal at startup.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid capture device: {0}")]
    InvalidDevice(String),
    #[error("invalid snaplen: {0}")]
    InvalidSnaplen(String),
    #[error("invalid capture timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid stats interval: {0}")]
    InvalidInterval(String),
    #[error("invalid plugin queue depth: {0}")]
    InvalidQueueDepth(String),
    #[error("failed to read config file {path}: {reason}")]
    FileRead { path: String, reason: String },
    #[error("config parse error: {0}")]
    Parse(String),
}

/// Unified error type for the monitor pipeline.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("capture error: {0}")]
    Capture(#[from] pcap::Error),

    #[error("capture device reports unsupported datalink type {0}")]
    UnsupportedDatalink(i32),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
