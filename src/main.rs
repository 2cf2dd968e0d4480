//! qrscan: scan QR codes from a V4L2 camera and print each decoded value

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use tokio::runtime::Handle;
use tracing::{error, info};

use qrscan::capture::{CaptureSession, SessionConfig, V4l2Manager};
use qrscan::detector::{ChannelSink, QrBackend};
use qrscan::error::FailureReason;
use qrscan::pipeline::FrameScheduler;
use qrscan::{Config, ConfiguredRotation};

#[derive(Debug, Parser)]
#[command(name = "qrscan", about = "Scan QR codes from a camera")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Capture device path (auto-detected when omitted)
    #[arg(short, long)]
    device: Option<String>,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Alternate with inverted images to read light-on-dark codes
    #[arg(long)]
    inverted: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qrscan=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if cli.device.is_some() {
        config.capture.device = cli.device;
    }
    if let Some(width) = cli.width {
        config.scanner.target_width = width;
    }
    if let Some(height) = cli.height {
        config.scanner.target_height = height;
    }
    config.scanner.support_inverted |= cli.inverted;
    qrscan::CONFIG.store(Arc::new(config.clone()));

    info!("qrscan launching...");

    let (tx, rx) = flume::unbounded::<String>();
    let scheduler = FrameScheduler::new(
        Arc::new(QrBackend::new()),
        Arc::new(ChannelSink(tx)),
        config.scanner.support_inverted,
        Handle::current(),
    );

    let mut session = CaptureSession::new(
        V4l2Manager::new(config.capture.clone()),
        SessionConfig::from(&config.scanner),
        scheduler.clone(),
        Arc::new(ConfiguredRotation),
    );

    let preview = match session.start() {
        Ok(preview) => preview,
        Err(e) if e.reason() == FailureReason::NoRearCamera => {
            return Err(eyre!("no usable camera found"));
        }
        Err(e) => return Err(e.into()),
    };
    info!(
        width = preview.width,
        height = preview.height,
        orientation = preview.orientation,
        "Scanning"
    );

    loop {
        tokio::select! {
            value = rx.recv_async() => match value {
                Ok(value) => println!("{value}"),
                Err(e) => {
                    error!("Result channel closed: {}", e);
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
        }
    }

    session.stop();
    let stats = scheduler.stats();
    info!(
        submitted = stats.submitted,
        dispatched = stats.dispatched,
        superseded = stats.superseded,
        barcodes = stats.barcodes,
        "qrscan shutting down"
    );
    Ok(())
}
