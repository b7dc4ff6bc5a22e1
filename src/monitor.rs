// src/monitor.rs
//! Feed coordination: pumps readings from a feed into the local platform

use crate::{
    error::{Result, TrackerError},
    gps::{gpsd, nmea::NmeaParser, replay},
    tracker::{Clock, LocalPlatform, ManualClock},
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::{info, warn};

/// Where readings come from
#[derive(Debug, Clone)]
pub enum FeedSource {
    Serial { port: String, baudrate: u32 },
    Gpsd { host: String, port: u16 },
}

/// Counts from a finished replay
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub readings: usize,
    /// Readings handed to at least one registration
    pub delivered: usize,
}

/// Runs a feed and hands its readings to a [`LocalPlatform`]
pub struct TrackingMonitor {
    platform: Arc<LocalPlatform>,
    clock: Arc<dyn Clock>,
    running: Arc<AtomicBool>,
}

impl TrackingMonitor {
    pub fn new(platform: Arc<LocalPlatform>, clock: Arc<dyn Clock>) -> Self {
        Self::new_with_shared(platform, clock, Arc::new(AtomicBool::new(true)))
    }

    /// Create a monitor sharing an existing running flag
    pub fn new_with_shared(
        platform: Arc<LocalPlatform>,
        clock: Arc<dyn Clock>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            platform,
            clock,
            running,
        }
    }

    /// Connect to a live feed and pump it on a background task
    pub async fn start(&self, source: FeedSource) -> Result<JoinHandle<()>> {
        match source {
            FeedSource::Serial { port, baudrate } => self.connect_serial(&port, baudrate).await,
            FeedSource::Gpsd { host, port } => self.connect_gpsd(&host, port).await,
        }
    }

    /// Connect to a GPS device via serial port
    async fn connect_serial(&self, port: &str, baudrate: u32) -> Result<JoinHandle<()>> {
        info!(port, baudrate, "connecting to serial GPS");

        let serial = tokio_serial::new(port, baudrate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| TrackerError::Connection(format!("Failed to open serial port {}: {}", port, e)))?;

        info!(port, "serial GPS connected");

        let platform = Arc::clone(&self.platform);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);

        Ok(tokio::spawn(async move {
            let mut reader = BufReader::new(serial);
            let mut parser = NmeaParser::new();
            let mut line = String::new();

            while running.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        if let Some(reading) = parser.parse_sentence(line.trim(), clock.now()) {
                            platform.deliver(reading);
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading from serial port");
                        break;
                    }
                }
            }
        }))
    }

    /// Connect to gpsd daemon
    async fn connect_gpsd(&self, host: &str, port: u16) -> Result<JoinHandle<()>> {
        info!(host, port, "connecting to gpsd");

        let mut reader = gpsd::connect_gpsd(host, port).await?;

        let platform = Arc::clone(&self.platform);
        let clock = Arc::clone(&self.clock);
        let running = Arc::clone(&self.running);

        Ok(tokio::spawn(async move {
            let mut line = String::new();

            while running.load(Ordering::Relaxed) {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match gpsd::parse_gpsd_json(line, clock.now()) {
                            Ok(Some(reading)) => {
                                platform.deliver(reading);
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "error parsing gpsd JSON"),
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "error reading from gpsd");
                        break;
                    }
                }
            }
        }))
    }

    /// Replay a recorded track.
    ///
    /// `clock` is moved to each reading's capture time before delivery so
    /// staleness and arbitration follow the recorded timeline.
    pub async fn replay(&self, path: &Path, clock: &ManualClock) -> Result<ReplaySummary> {
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            TrackerError::Other(format!("Failed to open track {}: {}", path.display(), e))
        })?;
        let mut lines = BufReader::new(file).lines();
        let mut summary = ReplaySummary::default();

        while let Some(line) = lines.next_line().await? {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let Some(reading) = replay::parse_replay_line(&line)? else {
                continue;
            };

            clock.set(reading.time);
            summary.readings += 1;
            if self.platform.deliver(reading) > 0 {
                summary.delivered += 1;
            }
        }

        info!(readings = summary.readings, delivered = summary.delivered, "replay finished");
        Ok(summary)
    }

    /// Stop the monitor
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Check if the monitor is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }
}

/// List available serial ports
pub fn list_serial_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports()?;
    Ok(ports.into_iter().map(|port| port.port_name).collect())
}
