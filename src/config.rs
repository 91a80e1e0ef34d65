//! Runtime configuration: where to listen, which serial device to relay and how fast to send
//!
//! Values come from an optional TOML file and are validated once at startup. Every section may be
//! omitted; missing fields fall back to the stock deployment defaults.

use std::{fs, net::SocketAddr, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    data::{frame::SerialFraming, BODY_LANDMARKS},
    error::{Error, Result},
    serial::BridgeTiming,
};

/// Top level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listening socket
    pub server: ServerConfig,
    /// Pose frame stream
    pub pose: PoseConfig,
    /// Serial relay
    pub serial: SerialConfig,
    /// Synthetic pose producer used by the binary
    pub source: SourceConfig,
}

/// Listening socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the single client connects to
    pub bind_address: SocketAddr,
    /// How long one message may wait for a client that stopped reading
    pub write_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            write_timeout_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Write timeout as a duration
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Pose stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Maximum pose frames per second
    pub rate_hz: f64,
    /// Landmarks per pose, agreed with the receiver out of band
    pub landmarks: usize,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            rate_hz: 30.0,
            landmarks: BODY_LANDMARKS,
        }
    }
}

/// Serial relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path; the relay is disabled when absent
    pub port: Option<String>,
    /// Line speed
    pub baud_rate: u32,
    /// Maximum poll cycles per second
    pub rate_hz: f64,
    /// Sleep between loop iterations
    pub poll_interval_ms: u64,
    /// How long to wait for the end of a line once bytes are available
    pub read_timeout_ms: u64,
    /// Wire encoding of relayed lines
    pub framing: SerialFraming,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 9600,
            rate_hz: 10.0,
            poll_interval_ms: 50,
            read_timeout_ms: 100,
            framing: SerialFraming::Raw,
        }
    }
}

impl SerialConfig {
    /// Loop timing for the bridge
    pub fn timing(&self) -> BridgeTiming {
        BridgeTiming {
            interval: Duration::from_secs_f64(1.0 / self.rate_hz),
            poll_period: Duration::from_millis(self.poll_interval_ms),
        }
    }

    /// Read timeout as a duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Synthetic producer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Frames per second produced
    pub fps: f64,
    /// Stop after this many frames
    pub frames: Option<u64>,
    /// Share of frames with a detection
    pub detection_ratio: f64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            fps: 60.0,
            frames: None,
            detection_ratio: 0.9,
        }
    }
}

/// Fails unless `value` is a positive rate whose period fits in a [`Duration`]
fn rate(name: &str, value: f64) -> Result<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(Error::config(format!("{name} must be positive, got {value}")));
    }
    Duration::try_from_secs_f64(1.0 / value)
        .map(|_| ())
        .map_err(|_| Error::config(format!("{name} of {value} Hz is too slow to schedule")))
}

impl Config {
    /// Loads and validates a TOML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value the pipeline depends on
    pub fn validate(&self) -> Result<()> {
        rate("pose.rate_hz", self.pose.rate_hz)?;
        rate("serial.rate_hz", self.serial.rate_hz)?;
        rate("source.fps", self.source.fps)?;

        if self.server.write_timeout_ms == 0 {
            return Err(Error::config("server.write_timeout_ms must be at least 1"));
        }

        if self.serial.poll_interval_ms == 0 {
            return Err(Error::config("serial.poll_interval_ms must be at least 1"));
        }
        if self.serial.baud_rate == 0 {
            return Err(Error::config("serial.baud_rate must be positive"));
        }
        if self.serial.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            return Err(Error::config("serial.port must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.source.detection_ratio) {
            return Err(Error::config(format!(
                "source.detection_ratio must be within [0, 1], got {}",
                self.source.detection_ratio
            )));
        }

        Ok(())
    }
}
