//! Live pose telemetry relay.
//!
//! Streams landmark vectors from a pose estimator to a single TCP client as tagged binary frames,
//! while a second task relays lines from a serial device over the same connection. Both senders are
//! rate limited independently and stop writing as soon as the shared [`gate::ConnectionGate`]
//! closes.

pub mod config;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod rate;
pub mod serial;
pub mod server;
