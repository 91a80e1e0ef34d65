//! Pose relay server: waits for one client, then streams pose frames and serial lines to it

use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use log::{info, warn};

use pose_relay::config::Config;
use pose_relay::data::frame::SerialFraming;
use pose_relay::data::source::{synthetic, SyntheticSource};
use pose_relay::error::Result;
use pose_relay::pipeline::Pipeline;
use pose_relay::serial::TokioSerialSource;

/// Command line interface. Flags override values from the configuration file
#[derive(Debug, Parser)]
#[command(
    name = "pose-relay",
    version,
    about = "Stream pose landmarks and serial telemetry to a single TCP client"
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "POSE_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Give up on a message the client has not taken after this many milliseconds
    #[arg(long)]
    write_timeout_ms: Option<u64>,

    /// Serial device to relay, e.g. /dev/ttyACM0 or COM4
    #[arg(long)]
    serial_port: Option<String>,

    /// Serial line speed
    #[arg(long)]
    baud_rate: Option<u32>,

    /// Wire encoding of relayed serial lines
    #[arg(long, value_enum)]
    serial_framing: Option<SerialFraming>,

    /// Maximum pose frames per second
    #[arg(long)]
    pose_rate: Option<f64>,

    /// Maximum serial poll cycles per second
    #[arg(long)]
    serial_rate: Option<f64>,

    /// Frames per second produced by the synthetic pose source
    #[arg(long)]
    fps: Option<f64>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Builds the effective configuration: file (or defaults), then flags, then validation
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(write_timeout_ms) = self.write_timeout_ms {
            config.server.write_timeout_ms = write_timeout_ms;
        }
        if let Some(port) = self.serial_port {
            config.serial.port = Some(port);
        }
        if let Some(baud_rate) = self.baud_rate {
            config.serial.baud_rate = baud_rate;
        }
        if let Some(framing) = self.serial_framing {
            config.serial.framing = framing;
        }
        if let Some(rate) = self.pose_rate {
            config.pose.rate_hz = rate;
        }
        if let Some(rate) = self.serial_rate {
            config.serial.rate_hz = rate;
        }
        if let Some(fps) = self.fps {
            config.source.fps = fps;
        }
        if self.frames.is_some() {
            config.source.frames = self.frames;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = cli.into_config()?;

    let serial = match &config.serial.port {
        Some(port) => Some(TokioSerialSource::open(
            port,
            config.serial.baud_rate,
            config.serial.read_timeout(),
        )?),
        None => {
            info!("No serial port configured, serial relay disabled");
            None
        }
    };

    let frames = synthetic(SyntheticSource {
        landmarks: config.pose.landmarks,
        fps: config.source.fps,
        frames: config.source.frames,
        detection_ratio: config.source.detection_ratio,
    });

    let quit = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let report = Pipeline::new(config)?.run(frames, serial, quit).await?;

    info!(
        "Session ended ({:?}) after {:.1}s",
        report.exit,
        (report.ended_at - report.started_at).num_milliseconds() as f64 / 1000.0
    );
    if let Some(bridge) = report.bridge {
        info!("Serial relay: {}", bridge);
    }

    Ok(())
}
