// src/main.rs
//! Location Tracker - fused satellite/network tracking from the command line

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use location_tracker::{
    config::TrackerConfig,
    display::TerminalDisplay,
    logging,
    monitor::{self, FeedSource, TrackingMonitor},
    bridge::BridgeEvent,
    tracker::{Clock, LocalPlatform, LocationFuser, LocationPlatform, ManualClock, SystemClock},
    LocationBridge, LocationSource, LocationUpdateListener, TimedReading,
};
use std::{
    future::Future,
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

const DEFAULT_LOG_FILE: &str = "logs/location-tracker.log";

#[derive(Parser)]
#[command(name = "location-tracker")]
#[command(about = "Track location from satellite and network providers", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/location-tracker/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Track positions from a gpsd daemon
    Gpsd {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// Print accepted updates as JSON instead of the status screen
        #[arg(long)]
        plain: bool,
    },
    /// Track positions from an NMEA receiver on a serial port
    Serial {
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        /// Print accepted updates as JSON instead of the status screen
        #[arg(long)]
        plain: bool,
    },
    /// Run a recorded track (JSON lines) through the tracker
    Replay { file: PathBuf },
    /// List available serial ports
    Ports,
    /// Show or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write the default configuration file
    Init,
}

/// Logs each accepted fused update
struct LogListener;

impl LocationUpdateListener for LogListener {
    fn on_update(&self, previous: Option<&TimedReading>, current: &TimedReading) {
        info!(
            provider = %current.provider(),
            latitude = current.reading.latitude,
            longitude = current.reading.longitude,
            accuracy = current.reading.accuracy,
            replaced = ?previous.map(|p| p.provider()),
            "fused location updated"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let live_display = matches!(
        cli.command,
        Command::Gpsd { plain: false, .. } | Command::Serial { plain: false, .. }
    );
    let log_file = cli
        .log_file
        .clone()
        .or_else(|| live_display.then(|| PathBuf::from(DEFAULT_LOG_FILE)));
    let _guard = logging::init_logging(log_file.as_deref()).context("failed to initialise logging")?;

    let config = match &cli.config {
        Some(path) => TrackerConfig::load_from(path)?,
        None => TrackerConfig::load()?,
    };

    match cli.command {
        Command::Gpsd { host, port, plain } => {
            let source = FeedSource::Gpsd {
                host: host
                    .or_else(|| config.gpsd_host.clone())
                    .unwrap_or_else(|| "localhost".to_string()),
                port: port.or(config.gpsd_port).unwrap_or(2947),
            };
            run_live(config, source, plain).await
        }
        Command::Serial { port, baud, plain } => {
            let port = port
                .or_else(|| config.serial_port.clone())
                .context("no serial port given and none configured")?;
            let baudrate = baud.or(config.serial_baudrate).unwrap_or(9600);
            run_live(config, FeedSource::Serial { port, baudrate }, plain).await
        }
        Command::Replay { file } => run_replay(config, file).await,
        Command::Ports => {
            let ports = monitor::list_serial_ports()?;
            if ports.is_empty() {
                println!("No serial ports found.");
            } else {
                println!("Available serial ports:");
                for port in ports {
                    println!("  {}", port);
                }
            }
            Ok(())
        }
        Command::Config { action } => {
            let path = match cli.config {
                Some(path) => path,
                None => TrackerConfig::get_config_path()?,
            };
            match action {
                ConfigAction::Show => println!("{}", serde_json::to_string_pretty(&config)?),
                ConfigAction::Init => {
                    TrackerConfig::default().save_to(&path)?;
                    println!("Wrote {}", path.display());
                }
            }
            Ok(())
        }
    }
}

async fn run_live(config: TrackerConfig, source: FeedSource, plain: bool) -> anyhow::Result<()> {
    let platform = Arc::new(LocalPlatform::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let monitor = TrackingMonitor::new(Arc::clone(&platform), Arc::clone(&clock));

    if plain {
        let (bridge, mut events) =
            LocationBridge::new(config, platform as Arc<dyn LocationPlatform>, clock);
        bridge.start_location_tracking();
        let mut feed = monitor.start(source).await?;

        let ctrl_c = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        print_events(&mut events, &mut feed, ctrl_c, &mut io::stdout()).await?;

        monitor.stop();
        bridge.stop_location_tracking();
        feed.abort();
        return Ok(());
    }

    let fuser = LocationFuser::new(
        Arc::clone(&platform) as Arc<dyn LocationPlatform>,
        clock,
        config.tracker_settings(),
    );
    fuser.start(Arc::new(LogListener));
    let feed = monitor.start(source).await?;

    TerminalDisplay::new()
        .run(fuser.clone(), monitor.running_flag())
        .await?;

    fuser.stop();
    feed.abort();
    Ok(())
}

/// Print bridge events as JSON lines until the feed ends or `shutdown` fires
async fn print_events(
    events: &mut mpsc::UnboundedReceiver<BridgeEvent>,
    feed: &mut JoinHandle<()>,
    shutdown: impl Future<Output = ()>,
    out: &mut impl Write,
) -> io::Result<()> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => writeln!(out, "{}", event.to_json())?,
                None => break,
            },
            result = &mut *feed => {
                if let Err(e) = result {
                    warn!(error = %e, "feed task failed");
                }
                info!("feed ended");
                while let Ok(event) = events.try_recv() {
                    writeln!(out, "{}", event.to_json())?;
                }
                break;
            }
            _ = &mut shutdown => break,
        }
    }

    Ok(())
}

async fn run_replay(config: TrackerConfig, file: PathBuf) -> anyhow::Result<()> {
    let platform = Arc::new(LocalPlatform::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let monitor = TrackingMonitor::new(Arc::clone(&platform), clock.clone());

    let (bridge, mut events) = LocationBridge::new(
        config,
        Arc::clone(&platform) as Arc<dyn LocationPlatform>,
        clock.clone(),
    );
    let source = bridge.start_location_tracking();

    let summary = monitor
        .replay(&file, &clock)
        .await
        .with_context(|| format!("replay of {} failed", file.display()))?;

    let mut accepted = 0;
    while let Ok(event) = events.try_recv() {
        println!("{}", event.to_json());
        accepted += 1;
    }

    println!(
        "{} readings, {} delivered, {} accepted",
        summary.readings, summary.delivered, accepted
    );
    if let Some(current) = bridge.current_location() {
        println!("current location: {}", serde_json::to_string(&current)?);
    }
    info!(fresh = source.has_fresh_reading(), "replay complete");

    bridge.stop_location_tracking();
    Ok(())
}
