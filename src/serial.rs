//! The serial bridge: relays lines from a serial device to the client at its own, slower cadence

use std::{fmt, io, pin::Pin, time::Duration};

use async_trait::async_trait;
use log::{debug, error, info, trace};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, BufReader},
    time::{self, Instant},
};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::{
    data::frame::SerialFraming,
    error::Result,
    gate::ConnectionGate,
    rate::RateLimiter,
    server::SharedWriter,
};

/// A line-oriented byte source, such as a microcontroller printing readings
#[async_trait]
pub trait SerialSource: Send {
    /// Bytes waiting to be read; must not block
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Reads one line, terminator included when the device sent one
    async fn read_line(&mut self) -> io::Result<String>;

    /// Discards everything waiting in the input buffer
    fn clear_input(&mut self) -> io::Result<()>;
}

/// A serial device opened through `tokio-serial`
pub struct TokioSerialSource {
    /// Buffered reader over the port
    reader: BufReader<SerialStream>,
    /// Upper bound on waiting for the rest of a line
    read_timeout: Duration,
}

impl fmt::Debug for TokioSerialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioSerialSource")
            .field("read_timeout", &self.read_timeout)
            .finish_non_exhaustive()
    }
}

impl TokioSerialSource {
    /// Opens `path` at `baud_rate`. Must be called from within a tokio runtime
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self> {
        let port = tokio_serial::new(path, baud_rate).open_native_async()?;
        info!("Opened serial port {} at {} baud", path, baud_rate);

        Ok(Self {
            reader: BufReader::new(port),
            read_timeout,
        })
    }
}

#[async_trait]
impl SerialSource for TokioSerialSource {
    fn bytes_available(&mut self) -> io::Result<usize> {
        let pending = self.reader.get_ref().bytes_to_read()?;
        Ok(pending as usize + self.reader.buffer().len())
    }

    async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        match time::timeout(self.read_timeout, self.reader.read_line(&mut line)).await {
            Ok(Ok(0)) => Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(Ok(_)) => Ok(line),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no line terminator within {:?}", self.read_timeout),
            )),
        }
    }

    fn clear_input(&mut self) -> io::Result<()> {
        let buffered = self.reader.buffer().len();
        Pin::new(&mut self.reader).consume(buffered);
        self.reader.get_ref().clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Counters for one bridge run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Poll cycles run
    pub polls: u64,
    /// Lines written to the client
    pub relayed: u64,
    /// Read, write or clear errors, all of which were logged and survived
    pub errors: u64,
}

impl fmt::Display for BridgeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} polls, {} lines relayed, {} errors",
            self.polls, self.relayed, self.errors
        )
    }
}

/// Timing of the bridge loop
#[derive(Debug, Clone, Copy)]
pub struct BridgeTiming {
    /// Minimum spacing between two poll cycles
    pub interval: Duration,
    /// Sleep between loop iterations
    pub poll_period: Duration,
}

/// Polls a [`SerialSource`] and forwards its lines while the gate stays open
#[derive(Debug)]
pub struct SerialBridge<S, W> {
    /// Where lines come from
    source: S,
    /// Connection shared with the dispatcher
    writer: SharedWriter<W>,
    /// Whether a client is attached
    gate: ConnectionGate,
    /// Spacing between poll cycles
    limiter: RateLimiter,
    /// Sleep between loop iterations
    poll_period: Duration,
    /// Wire encoding of each line
    framing: SerialFraming,
    /// Counters
    stats: BridgeStats,
    /// Whether the last write to the client failed
    writer_failing: bool,
}

impl<S, W> SerialBridge<S, W>
where
    S: SerialSource,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a bridge relaying from `source` to `writer`
    pub fn new(
        source: S,
        writer: SharedWriter<W>,
        gate: ConnectionGate,
        timing: BridgeTiming,
        framing: SerialFraming,
    ) -> Self {
        Self {
            source,
            writer,
            gate,
            limiter: RateLimiter::new(timing.interval),
            poll_period: timing.poll_period,
            framing,
            stats: BridgeStats::default(),
            writer_failing: false,
        }
    }

    /// Runs until the gate closes, re-checking it on every iteration
    pub async fn run(mut self) -> BridgeStats {
        debug!("Serial bridge started ({:?} framing)", self.framing);

        while self.gate.is_active() {
            if self.limiter.try_acquire(Instant::now()) {
                self.poll_once().await;
            }
            time::sleep(self.poll_period).await;
        }

        info!("Serial bridge stopped: {}", self.stats);
        self.stats
    }

    /// One read-and-forward cycle. Errors are logged and counted, never returned
    async fn poll_once(&mut self) {
        self.stats.polls += 1;

        if let Err(e) = self.relay_available().await {
            self.stats.errors += 1;
            error!("Error reading or framing serial data: {}", e);
        }

        if let Err(e) = self.source.clear_input() {
            self.stats.errors += 1;
            error!("Failed to clear serial input buffer: {}", e);
        }
    }

    /// Forwards one line if the device has anything for us
    async fn relay_available(&mut self) -> Result<()> {
        if self.source.bytes_available()? == 0 {
            trace!("No serial data available");
            return Ok(());
        }

        let line = self.source.read_line().await?;
        let payload = self.framing.encode(&line)?;
        if self.forward(&payload).await {
            trace!("Relayed serial line {:?}", line.trim_end());
        }
        Ok(())
    }

    /// Writes one encoded line. Failures are counted here and logged once until a write succeeds
    async fn forward(&mut self, payload: &[u8]) -> bool {
        match self.writer.send(payload).await {
            Ok(()) => {
                if std::mem::take(&mut self.writer_failing) {
                    info!("Serial relay writes are going through again");
                }
                self.stats.relayed += 1;
                true
            }
            Err(e) => {
                self.stats.errors += 1;
                if std::mem::replace(&mut self.writer_failing, true) {
                    debug!("Serial data write still failing: {}", e);
                } else {
                    error!("Error sending serial data: {}", e);
                }
                false
            }
        }
    }

    /// Counters accumulated so far
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }
}
