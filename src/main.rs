//! # Mag Cal Monitor
//!
//! Watch a MAVLink vehicle during compass calibration.
//!
//! Binds a telemetry link, waits for the first vehicle and prints flight-mode
//! changes, changed MAG_CAL_PROGRESS/MAG_CAL_REPORT contents and the progress
//! of a magnetometer calibration session.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mag_cal_monitor::config::Config;
use mag_cal_monitor::error::MonitorError;
use mag_cal_monitor::link::mavlink_link::MavlinkLink;
use mag_cal_monitor::link::{CalibrationService, ConnectionUrl};
use mag_cal_monitor::logging;
use mag_cal_monitor::monitor::CalibrationMonitor;
use mag_cal_monitor::session::{Feeds, SessionCoordinator};
use mag_cal_monitor::sink::{EventSink, JsonlSink, TextSink};

#[derive(Debug, Parser)]
#[command(name = "mag-cal-monitor", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection URL, e.g. udpin://0.0.0.0:14540 (overrides the config file)
    #[arg(short, long)]
    url: Option<String>,

    /// Only watch; do not start a calibration session
    #[arg(long)]
    no_calibration: bool,
}

/// Main entry point for the calibration monitor
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Parse arguments and load configuration
///    - Set up logging
///    - Pick the event sink (text or JSON lines on stdout)
///
/// 2. **Startup Sequence**
///    - Bind the link; a bind failure exits with an error
///    - Wait for the first vehicle (Ctrl+C cancels)
///    - Register flight-mode, raw-message and calibration subscriptions
///
/// 3. **Monitoring**
///    - Events are printed from the subscription tasks until Ctrl+C
///
/// # Examples
///
/// ```bash
/// cargo run --release -- --url udpin://0.0.0.0:14540
/// ```
///
/// Expected output:
/// ```text
/// Flight mode 3: Hold
///
/// Received MAG_CAL_REPORT packet (ID 192)
/// Compass ID: 0
/// Status 2: MAG_CAL_RUNNING_STEP_ONE
/// Fitness: 0
/// Compass calibration progress: 12.5%
/// ```
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };

    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("Mag Cal Monitor v{} starting...", env!("CARGO_PKG_VERSION"));

    let url = match &cli.url {
        Some(url) => ConnectionUrl::parse(url)?,
        None => config.link.connection_url()?,
    };

    let sink: Arc<dyn EventSink> = match config.output.format.as_str() {
        "jsonl" => Arc::new(JsonlSink::stdout()),
        _ => Arc::new(TextSink::stdout()),
    };
    let monitor = Arc::new(CalibrationMonitor::new(sink));

    let link = MavlinkLink::new(config.link.settings());
    let start_calibration = config.calibration.start_session && !cli.no_calibration;
    let feeds = Feeds {
        telemetry: &link,
        raw: &link,
        calibration: start_calibration.then_some(&link as &dyn CalibrationService),
    };

    // Cancel the handshake and the monitoring loop on Ctrl+C
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
        }
        signal_token.cancel();
    });

    let mut coordinator = SessionCoordinator::new(url, config.handshake.timeout());
    let session = match coordinator.start(&link, &feeds, &monitor, &cancel).await {
        Ok(session) => session,
        Err(MonitorError::HandshakeCancelled) => {
            info!("Stopped before any system connected");
            return Ok(());
        }
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    info!(
        "Monitoring system {}, press Ctrl+C to exit",
        session.system().system_id()
    );

    cancel.cancelled().await;
    session.close();

    Ok(())
}
