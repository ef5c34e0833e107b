use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration for the monitor daemon.
///
/// Values are resolved in order: built-in defaults, then the TOML config
/// file, then `HUGIN_*` environment variables, then CLI flags. Later
/// sources win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Capture interface, e.g. "any" or "eth0"
    pub device: String,

    /// Maximum bytes captured per frame
    pub snaplen: i32,

    /// Whether to put the interface into promiscuous mode
    pub promisc: bool,

    /// Capture read timeout in milliseconds
    pub timeout_ms: i32,

    /// BPF filter applied kernel-side before delivery
    pub filter: String,

    /// Path to the SQLite endpoint database
    pub db_path: String,

    /// Interval between stats flushes, in seconds
    pub stats_interval_secs: u64,

    /// Bounded wait for the decode queue to drain at shutdown, in seconds
    pub drain_timeout_secs: u64,

    /// Grace period for plugin workers to finish at shutdown, in seconds
    pub plugin_grace_secs: u64,

    /// Depth of each plugin's inbox; events beyond this are dropped
    pub plugin_queue_depth: usize,

    /// Per-plugin configuration, keyed by plugin name. Entries stay raw
    /// TOML values here: a malformed entry skips that one plugin at
    /// registry load instead of failing the whole config parse.
    pub plugins: HashMap<String, toml::Value>,
}

/// Configuration for a single analyzer plugin.
///
/// `enable` must be exactly 1 for the plugin to be loaded. All other keys
/// in the plugin's table are collected as plugin-specific options.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub enable: u8,

    #[serde(flatten)]
    pub options: HashMap<String, toml::Value>,
}

impl PluginConfig {
    pub fn enabled(enable: u8) -> Self {
        PluginConfig {
            enable,
            options: HashMap::new(),
        }
    }

    pub fn with_option(mut self, key: &str, value: toml::Value) -> Self {
        self.options.insert(key.to_string(), value);
        self
    }

    /// Look up a string-valued option.
    pub fn opt_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    /// Look up an integer-valued option. String digits are accepted too,
    /// so `rrd = 1` and `rrd = "1"` behave the same.
    pub fn opt_int(&self, key: &str) -> Option<i64> {
        match self.options.get(key) {
            Some(toml::Value::Integer(n)) => Some(*n),
            Some(toml::Value::String(s)) => s.parse().ok(),
            _ => None,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device: "any".to_string(),
            snaplen: 1518,
            promisc: false,
            timeout_ms: 100,
            filter: "(tcp or udp) and port 53".to_string(),
            db_path: "hugin.db".to_string(),
            stats_interval_secs: 60,
            drain_timeout_secs: 5,
            plugin_grace_secs: 10,
            plugin_queue_depth: 512,
            plugins: default_plugins(),
        }
    }
}

/// The default analyzer set, all enabled.
fn default_plugins() -> HashMap<String, toml::Value> {
    let mut plugins = HashMap::new();
    plugins.insert(
        "packet_logger".to_string(),
        toml::toml! {
            enable = 1
            keep_for = "30 days"
        }
        .into(),
    );
    plugins.insert(
        "authorized_servers".to_string(),
        toml::toml! {
            enable = 1
        }
        .into(),
    );
    plugins.insert(
        "server_stats".to_string(),
        toml::toml! {
            enable = 1
            rrd = 1
        }
        .into(),
    );
    plugins.insert(
        "client_stats".to_string(),
        toml::toml! {
            enable = 1
            rrd = 1
        }
        .into(),
    );
    plugins
}

impl MonitorConfig {
    /// Load configuration from a TOML file. Missing keys fall back to the
    /// defaults; a `[plugins]` table in the file replaces the default set.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: MonitorConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `HUGIN_*` environment variable overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(device) = std::env::var("HUGIN_DEVICE") {
            if device.is_empty() {
                return Err(ConfigError::InvalidDevice(device));
            }
            self.device = device;
        }

        if let Ok(snaplen) = std::env::var("HUGIN_SNAPLEN") {
            self.snaplen = snaplen
                .parse::<i32>()
                .map_err(|_| ConfigError::InvalidSnaplen(snaplen))?;
        }

        if let Ok(promisc) = std::env::var("HUGIN_PROMISC") {
            self.promisc = parse_bool(&promisc, false);
        }

        if let Ok(timeout) = std::env::var("HUGIN_TIMEOUT_MS") {
            self.timeout_ms = timeout
                .parse::<i32>()
                .map_err(|_| ConfigError::InvalidTimeout(timeout))?;
        }

        if let Ok(filter) = std::env::var("HUGIN_FILTER") {
            self.filter = filter;
        }

        if let Ok(db_path) = std::env::var("HUGIN_DB_PATH") {
            self.db_path = db_path;
        }

        if let Ok(interval) = std::env::var("HUGIN_STATS_INTERVAL") {
            self.stats_interval_secs = interval
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidInterval(interval))?;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.is_empty() {
            return Err(ConfigError::InvalidDevice("(empty)".to_string()));
        }
        if self.snaplen <= 0 {
            return Err(ConfigError::InvalidSnaplen(self.snaplen.to_string()));
        }
        if self.timeout_ms <= 0 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms.to_string()));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::InvalidInterval(
                "stats interval must be greater than 0".to_string(),
            ));
        }
        if self.plugin_queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth(
                "queue depth must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a boolean from common string representations
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}
