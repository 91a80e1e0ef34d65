//! Error types for the pose relay

use std::{io, net::SocketAddr};

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while relaying telemetry
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The listening socket could not be bound; there is no rendezvous point without it
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },

    /// Accepting the client connection failed
    #[error("failed to accept client: {0}")]
    Accept(io::Error),

    /// The serial device could not be opened or configured
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// A configuration value failed validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The configuration file could not be parsed
    #[error("failed to parse configuration file: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// The pose producer failed and cannot produce more frames
    #[error("capture failed: {0}")]
    Capture(String),

    /// A byte payload is not a well-formed telemetry frame
    #[error("malformed telemetry frame: {0}")]
    Frame(String),

    /// Any other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Shorthand for a configuration validation failure
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for a frame decoding failure
    pub fn frame(msg: impl Into<String>) -> Self {
        Self::Frame(msg.into())
    }
}
