//! The socket server: binds the rendezvous address and hands out the single client connection

use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use log::{debug, info, warn};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::{Mutex, MutexGuard},
    time,
};

use crate::{
    error::{Error, Result},
    gate::ConnectionGate,
};

/// How long a single message may take to go out, lock wait included, unless configured otherwise
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// A write half shared between the sender loops.
///
/// Every message goes out as a single `write_all` while the lock is held, so messages from
/// different loops may interleave with each other but never inside one another. A message that
/// cannot be written within the write timeout fails with [`io::ErrorKind::TimedOut`]; the stream
/// may then hold a partial message and must not be written to again.
#[derive(Debug)]
pub struct SharedWriter<W> {
    /// The underlying byte stream
    inner: Arc<Mutex<W>>,
    /// Upper bound on one `send` or `shutdown`
    write_timeout: Duration,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            write_timeout: self.write_timeout,
        }
    }
}

impl<W> SharedWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps a writer for sharing, with [`DEFAULT_WRITE_TIMEOUT`]
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Replaces the write timeout
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// The bound applied to every write
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Writes one complete message, giving up once the write timeout expires
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        self.bounded(async {
            let mut writer = self.inner.lock().await;
            writer.write_all(payload).await?;
            writer.flush().await
        })
        .await
    }

    /// Shuts down the write direction of the stream
    pub async fn shutdown(&self) -> io::Result<()> {
        self.bounded(async { self.inner.lock().await.shutdown().await }).await
    }

    /// Runs `op` under the write timeout
    async fn bounded<F>(&self, op: F) -> io::Result<()>
    where
        F: std::future::Future<Output = io::Result<()>>,
    {
        time::timeout(self.write_timeout, op).await.unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("peer did not take the write within {:?}", self.write_timeout),
            ))
        })
    }

    /// Exclusive access to the underlying writer
    pub async fn lock(&self) -> MutexGuard<'_, W> {
        self.inner.lock().await
    }
}

/// The writer type used for real client connections
pub type ClientWriter = SharedWriter<TcpStream>;

/// The one client this process serves
#[derive(Debug)]
pub struct ClientConnection {
    /// Address of the connected peer
    pub peer: SocketAddr,
    /// Shared write side handed to both sender loops
    pub writer: ClientWriter,
}

impl ClientConnection {
    /// Closes the connection, logging rather than failing if the peer is already gone
    pub async fn close(self) {
        match self.writer.shutdown().await {
            Ok(()) => debug!("Connection to {} shut down", self.peer),
            Err(e) => debug!("Connection to {} already closed: {}", self.peer, e),
        }
    }
}

/// Listening socket waiting for the telemetry consumer
#[derive(Debug)]
pub struct SocketServer {
    /// The bound listener
    listener: TcpListener,
    /// Address actually bound, which differs from the requested one for port 0
    local_addr: SocketAddr,
    /// Write timeout given to the client connection
    write_timeout: Duration,
}

impl SocketServer {
    /// Binds and listens on `addr`. Failure here is fatal to the session
    pub async fn bind(addr: SocketAddr, write_timeout: Duration) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!("Server started on {}, waiting for connection...", local_addr);

        Ok(Self {
            listener,
            local_addr,
            write_timeout,
        })
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Waits, without timeout, for a client to connect, then opens the gate
    pub async fn accept_once(&self, gate: &ConnectionGate) -> Result<ClientConnection> {
        let (stream, peer) = self.listener.accept().await.map_err(Error::Accept)?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to disable Nagle for {}: {}", peer, e);
        }

        gate.activate();
        info!("Connection from {} has been established", peer);

        Ok(ClientConnection {
            peer,
            writer: SharedWriter::new(stream).with_write_timeout(self.write_timeout),
        })
    }
}
