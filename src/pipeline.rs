//! The pipeline orchestrator: startup sequencing, the dispatcher loop, and unconditional teardown

use std::{future::Future, net::SocketAddr, time::Duration};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use log::{error, info, warn};
use tokio::{task::JoinHandle, time};

use crate::{
    config::Config,
    data::PoseFrame,
    dispatch::{DispatchStats, Dispatcher},
    error::Result,
    gate::ConnectionGate,
    rate::RateLimiter,
    serial::{BridgeStats, SerialBridge, SerialSource},
    server::{ClientConnection, SocketServer},
};

/// Why the dispatcher loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The frame source ran dry
    SourceExhausted,
    /// A quit was requested
    Quit,
    /// The frame source failed
    CaptureError,
}

/// Summary of one session, returned once every resource has been released
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// The client that was served, if one ever connected
    pub peer: Option<SocketAddr>,
    /// Why the session ended
    pub exit: ExitReason,
    /// Pose frame outcomes
    pub dispatch: DispatchStats,
    /// Serial relay counters, when a bridge ran
    pub bridge: Option<BridgeStats>,
    /// When the pipeline started
    pub started_at: DateTime<Utc>,
    /// When teardown finished
    pub ended_at: DateTime<Utc>,
}

/// Wires the server, the dispatcher and the serial bridge together for one session
#[derive(Debug)]
pub struct Pipeline {
    /// Validated configuration
    config: Config,
    /// Gate shared by every sender
    gate: ConnectionGate,
}

impl Pipeline {
    /// Creates a pipeline from a configuration, validating it first
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            gate: ConnectionGate::new(),
        })
    }

    /// The gate this pipeline opens on accept and closes on teardown
    pub fn gate(&self) -> &ConnectionGate {
        &self.gate
    }

    /// Binds the listening socket. Failing here is the one fatal error of a session
    pub async fn bind(&self) -> Result<SocketServer> {
        SocketServer::bind(
            self.config.server.bind_address,
            self.config.server.write_timeout(),
        )
        .await
    }

    /// Binds, then serves one session. See [`Pipeline::serve`]
    pub async fn run<F, S, Q>(self, frames: F, serial: Option<S>, quit: Q) -> Result<SessionReport>
    where
        F: Stream<Item = Result<PoseFrame>>,
        S: SerialSource + 'static,
        Q: Future<Output = ()>,
    {
        let server = self.bind().await?;
        self.serve(server, frames, serial, quit).await
    }

    /// Serves one session on an already bound server.
    ///
    /// Waits for the client, starts the serial bridge, then sends frames until the source is
    /// exhausted, fails, or `quit` resolves. Teardown runs in every case; a capture error is
    /// returned only after it has completed.
    pub async fn serve<F, S, Q>(
        self,
        server: SocketServer,
        frames: F,
        serial: Option<S>,
        quit: Q,
    ) -> Result<SessionReport>
    where
        F: Stream<Item = Result<PoseFrame>>,
        S: SerialSource + 'static,
        Q: Future<Output = ()>,
    {
        let started_at = Utc::now();
        tokio::pin!(frames);
        tokio::pin!(quit);

        let connection = tokio::select! {
            accepted = server.accept_once(&self.gate) => accepted?,
            () = &mut quit => {
                info!("Quit requested before a client connected");
                return Ok(SessionReport {
                    peer: None,
                    exit: ExitReason::Quit,
                    dispatch: DispatchStats::default(),
                    bridge: None,
                    started_at,
                    ended_at: Utc::now(),
                });
            }
        };

        let bridge = serial.map(|source| self.spawn_bridge(source, &connection));

        let mut dispatcher = Dispatcher::new(
            connection.writer.clone(),
            self.gate.clone(),
            RateLimiter::per_second(self.config.pose.rate_hz),
        );

        let (exit, capture_error) = loop {
            tokio::select! {
                next = frames.next() => match next {
                    Some(Ok(frame)) => {
                        dispatcher.dispatch(&frame).await;
                    }
                    Some(Err(e)) => {
                        error!("Frame source failed: {}", e);
                        break (ExitReason::CaptureError, Some(e));
                    }
                    None => {
                        info!("Frame source exhausted");
                        break (ExitReason::SourceExhausted, None);
                    }
                },
                () = &mut quit => {
                    info!("Quit requested");
                    break (ExitReason::Quit, None);
                }
            }
        };

        let report = self
            .teardown(server, connection, bridge, dispatcher.stats(), exit, started_at)
            .await;

        match capture_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Starts the serial bridge on its own task
    fn spawn_bridge<S>(&self, source: S, connection: &ClientConnection) -> JoinHandle<BridgeStats>
    where
        S: SerialSource + 'static,
    {
        let bridge = SerialBridge::new(
            source,
            connection.writer.clone(),
            self.gate.clone(),
            self.config.serial.timing(),
            self.config.serial.framing,
        );
        tokio::spawn(bridge.run())
    }

    /// Longest the bridge may need to notice the closed gate: a sleep, a read and a write, plus a
    /// second sleep of slack
    fn bridge_stop_bound(&self) -> Duration {
        let serial = &self.config.serial;
        serial.timing().poll_period * 2 + serial.read_timeout() + self.config.server.write_timeout()
    }

    /// Waits for the bridge to observe the closed gate, aborting it if it overstays
    async fn join_bridge(&self, mut handle: JoinHandle<BridgeStats>) -> Option<BridgeStats> {
        let bound = self.bridge_stop_bound();
        match time::timeout(bound, &mut handle).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                warn!("Serial bridge task ended abnormally: {}", e);
                None
            }
            Err(_) => {
                warn!("Serial bridge did not stop within {:?}, aborting it", bound);
                handle.abort();
                None
            }
        }
    }

    /// Releases everything in order: gate, bridge, client connection, listener
    async fn teardown(
        &self,
        server: SocketServer,
        connection: ClientConnection,
        bridge: Option<JoinHandle<BridgeStats>>,
        dispatch: DispatchStats,
        exit: ExitReason,
        started_at: DateTime<Utc>,
    ) -> SessionReport {
        self.gate.deactivate();

        let bridge = match bridge {
            Some(handle) => self.join_bridge(handle).await,
            None => None,
        };

        let peer = connection.peer;
        connection.close().await;
        drop(server);

        info!("Pose frames: {}", dispatch);
        info!("Server and connections closed");

        SessionReport {
            peer: Some(peer),
            exit,
            dispatch,
            bridge,
            started_at,
            ended_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use tokio::{io::AsyncReadExt, net::TcpStream, time::Instant};

    use super::{ExitReason, Pipeline};
    use crate::{
        config::Config,
        data::{
            frame::{decode_pose, pose_frame_len},
            LandmarkVector, PoseFrame,
        },
        error::Error,
        serial::TokioSerialSource,
    };

    fn local_config() -> Config {
        let mut config = Config::default();
        config.server.bind_address = "127.0.0.1:0".parse().unwrap();
        config
    }

    #[tokio::test]
    async fn quit_before_client_connects() {
        let pipeline = Pipeline::new(local_config()).unwrap();
        let server = pipeline.bind().await.unwrap();

        let report = pipeline
            .serve(
                server,
                stream::pending::<Result<PoseFrame, Error>>(),
                None::<TokioSerialSource>,
                futures::future::ready(()),
            )
            .await
            .unwrap();

        assert_eq!(report.exit, ExitReason::Quit);
        assert!(report.peer.is_none());
    }

    #[tokio::test]
    async fn capture_error_still_tears_down() {
        let pipeline = Pipeline::new(local_config()).unwrap();
        let gate = pipeline.gate().clone();
        let server = pipeline.bind().await.unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut received = vec![];
            stream.read_to_end(&mut received).await.unwrap();
            received
        });

        let landmarks = LandmarkVector::fuzz(3);
        let frames = stream::iter(vec![
            Ok(PoseFrame::detected(Instant::now(), landmarks.clone())),
            Err(Error::Capture("camera unplugged".into())),
        ]);

        let result = pipeline
            .serve(
                server,
                frames,
                None::<TokioSerialSource>,
                std::future::pending::<()>(),
            )
            .await;

        assert!(matches!(result, Err(Error::Capture(_))));
        assert!(!gate.is_active());

        let received = client.await.unwrap();
        assert_eq!(received.len(), pose_frame_len(3));
        assert_eq!(decode_pose(&received).unwrap(), landmarks);
    }

    #[tokio::test]
    async fn exhausted_source_reports_stats() {
        let pipeline = Pipeline::new(local_config()).unwrap();
        let server = pipeline.bind().await.unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let mut received = vec![];
            stream.read_to_end(&mut received).await.unwrap();
            received.len()
        });

        let now = Instant::now();
        let frames = stream::iter(vec![
            Ok(PoseFrame::detected(now, LandmarkVector::fuzz(2))),
            Ok(PoseFrame::empty(now)),
            Ok(PoseFrame::detected(now, LandmarkVector::fuzz(2))),
        ]);

        let report = pipeline
            .serve(
                server,
                frames,
                None::<TokioSerialSource>,
                std::future::pending::<()>(),
            )
            .await
            .unwrap();

        assert_eq!(report.exit, ExitReason::SourceExhausted);
        assert_eq!(report.dispatch.sent, 1);
        assert_eq!(report.dispatch.no_detection, 1);
        assert_eq!(report.dispatch.rate_limited, 1);
        assert!(report.bridge.is_none());
        assert!(report.ended_at >= report.started_at);
        assert_eq!(client.await.unwrap(), pose_frame_len(2));
    }
}
