//! The telemetry dispatcher: samples estimator output and sends at most one pose frame per interval

use std::fmt;

use log::{debug, trace, warn};
use tokio::io::AsyncWrite;

use crate::{
    data::{frame::encode_pose, PoseFrame},
    gate::ConnectionGate,
    rate::RateLimiter,
    server::SharedWriter,
};

/// How often, in sent frames, progress is logged
const PROGRESS_EVERY: u64 = 300;

/// What happened to a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The frame went out on the wire
    Sent,
    /// Nobody is connected, the frame was dropped
    Inactive,
    /// The estimator found no pose in this frame
    NoDetection,
    /// Too soon after the previous send, the frame was dropped
    RateLimited,
    /// The write failed and the gate has been closed
    Failed,
}

/// Per-outcome counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Frames written to the client
    pub sent: u64,
    /// Frames dropped because no client was attached
    pub inactive: u64,
    /// Frames without a detection
    pub no_detection: u64,
    /// Frames dropped by the rate limiter
    pub rate_limited: u64,
    /// Writes that failed
    pub failed: u64,
}

impl DispatchStats {
    /// Counts one outcome
    fn record(&mut self, outcome: Dispatch) {
        let counter = match outcome {
            Dispatch::Sent => &mut self.sent,
            Dispatch::Inactive => &mut self.inactive,
            Dispatch::NoDetection => &mut self.no_detection,
            Dispatch::RateLimited => &mut self.rate_limited,
            Dispatch::Failed => &mut self.failed,
        };
        *counter += 1;
    }

    /// Every frame seen, whatever its outcome
    pub fn total(&self) -> u64 {
        self.sent + self.inactive + self.no_detection + self.rate_limited + self.failed
    }
}

impl fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} sent, {} rate-limited, {} without detection, {} while inactive, {} failed",
            self.sent, self.rate_limited, self.no_detection, self.inactive, self.failed
        )
    }
}

/// Sends pose frames to the client, never faster than its rate limit allows
#[derive(Debug)]
pub struct Dispatcher<W> {
    /// Connection shared with the serial bridge
    writer: SharedWriter<W>,
    /// Whether a client is attached
    gate: ConnectionGate,
    /// Spacing between pose frames
    limiter: RateLimiter,
    /// Outcome counters
    stats: DispatchStats,
}

impl<W> Dispatcher<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a dispatcher writing to `writer` while `gate` is open
    pub fn new(writer: SharedWriter<W>, gate: ConnectionGate, limiter: RateLimiter) -> Self {
        Self {
            writer,
            gate,
            limiter,
            stats: DispatchStats::default(),
        }
    }

    /// Decides what to do with one frame and, when due, writes it.
    ///
    /// Write failures close the gate and are reported through the returned outcome only.
    pub async fn dispatch(&mut self, frame: &PoseFrame) -> Dispatch {
        let outcome = self.try_send(frame).await;
        self.stats.record(outcome);
        trace!("Pose frame: {:?}", outcome);
        outcome
    }

    /// The decision and the write, without bookkeeping
    async fn try_send(&mut self, frame: &PoseFrame) -> Dispatch {
        if !self.gate.is_active() {
            return Dispatch::Inactive;
        }

        let Some(landmarks) = &frame.landmarks else {
            return Dispatch::NoDetection;
        };

        if !self.limiter.try_acquire(frame.timestamp) {
            return Dispatch::RateLimited;
        }

        let payload = encode_pose(landmarks);
        match self.writer.send(&payload).await {
            Ok(()) => {
                if (self.stats.sent + 1) % PROGRESS_EVERY == 0 {
                    debug!("Sent {} pose frames", self.stats.sent + 1);
                }
                Dispatch::Sent
            }
            Err(e) => {
                if self.gate.deactivate() {
                    warn!("Connection lost while sending pose frame: {}", e);
                } else {
                    debug!("Pose frame write failed after disconnect: {}", e);
                }
                Dispatch::Failed
            }
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}
