//! Configuration system for Orbit.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $ORBIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/orbit/config.toml
//!   3. ~/.config/orbit/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::signal::{
    DEFAULT_PATH_LOSS_EXPONENT, DEFAULT_REFERENCE_POWER_DBM, DEFAULT_SMOOTHING_ALPHA,
};
use crate::wire::{ADVERTISE_GROUP, ADVERTISE_PORT, ANNOUNCE_INTERVAL_MS};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbitConfig {
    pub node: NodeConfig,
    pub radio: RadioConfig,
    pub tuning: TuningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Display name advertised to peers. Empty = system hostname.
    pub display_name: String,
    /// Directory for node-local data (the favorites file lives here).
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// IPv4 multicast group advertisements travel on.
    pub advertise_group: String,
    /// UDP port for advertisements.
    pub advertise_port: u16,
    /// Milliseconds between advertisement datagrams.
    pub announce_interval_ms: u64,
    /// TCP port accepting channel connections. 0 = OS-assigned.
    pub session_port: u16,
    /// Advertised transmit power in dBm.
    pub tx_power_dbm: i8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TuningConfig {
    /// EMA smoothing factor α, in (0, 1].
    pub smoothing_alpha: f64,
    /// A peer unseen for longer than this is evicted.
    pub stale_after_ms: u64,
    /// Period of the staleness sweep.
    pub sweep_interval_ms: u64,
    /// How long a received ping keeps its sender marked as pinged.
    pub ping_window_ms: u64,
    /// Reference power at one meter for the distance estimate, dBm.
    pub reference_power_dbm: f64,
    /// Path-loss exponent for the distance estimate.
    pub path_loss_exponent: f64,
}

impl TuningConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn ping_window(&self) -> Duration {
        Duration::from_millis(self.ping_window_ms)
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            radio: RadioConfig::default(),
            tuning: TuningConfig::default(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            data_dir: data_dir(),
        }
    }
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            advertise_group: ADVERTISE_GROUP.to_string(),
            advertise_port: ADVERTISE_PORT,
            announce_interval_ms: ANNOUNCE_INTERVAL_MS,
            session_port: 0,
            tx_power_dbm: -59,
        }
    }
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: DEFAULT_SMOOTHING_ALPHA,
            stale_after_ms: 5_000,
            sweep_interval_ms: 2_000,
            ping_window_ms: 800,
            reference_power_dbm: DEFAULT_REFERENCE_POWER_DBM,
            path_loss_exponent: DEFAULT_PATH_LOSS_EXPONENT,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("orbit")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("orbit")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl OrbitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            OrbitConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("ORBIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&OrbitConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply ORBIT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("ORBIT_NODE__DISPLAY_NAME") {
            self.node.display_name = v;
        }
        if let Ok(v) = std::env::var("ORBIT_NODE__DATA_DIR") {
            self.node.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ORBIT_RADIO__SESSION_PORT") {
            if let Ok(p) = v.parse() {
                self.radio.session_port = p;
            }
        }
        if let Ok(v) = std::env::var("ORBIT_RADIO__ADVERTISE_PORT") {
            if let Ok(p) = v.parse() {
                self.radio.advertise_port = p;
            }
        }
        if let Ok(v) = std::env::var("ORBIT_RADIO__TX_POWER_DBM") {
            if let Ok(p) = v.parse() {
                self.radio.tx_power_dbm = p;
            }
        }
        if let Ok(v) = std::env::var("ORBIT_TUNING__STALE_AFTER_MS") {
            if let Ok(p) = v.parse() {
                self.tuning.stale_after_ms = p;
            }
        }
    }

    /// The display name this node advertises: the configured name, else the
    /// system hostname, else a fixed fallback.
    pub fn display_name(&self) -> String {
        if !self.node.display_name.is_empty() {
            return self.node.display_name.clone();
        }
        hostname::get()
            .ok()
            .map(|h| h.to_string_lossy().into_owned())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "orbit-node".to_string())
    }
}
