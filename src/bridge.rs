// src/bridge.rs
//! Application-facing bridge
//!
//! Wraps a tracking source behind the surface the host application calls:
//! start/stop tracking, a stream of `locationUpdate` events and an on-demand
//! current-location query.

use crate::config::TrackerConfig;
use crate::tracker::{
    Clock, LocationPlatform, LocationSource, LocationUpdateListener, Reading, TimedReading,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Events pushed to the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum BridgeEvent {
    LocationUpdate { latitude: f64, longitude: f64 },
}

impl BridgeEvent {
    pub fn to_json(&self) -> String {
        // Serializing a plain enum of floats cannot fail
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Answer to a current-location query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub heading: f64,
    pub speed: f64,
    /// Capture time, milliseconds since the Unix epoch
    pub time: i64,
}

impl From<&Reading> for LocationSnapshot {
    fn from(reading: &Reading) -> Self {
        Self {
            latitude: reading.latitude,
            longitude: reading.longitude,
            accuracy: reading.accuracy,
            heading: reading.bearing,
            speed: reading.speed,
            time: reading.time.timestamp_millis(),
        }
    }
}

struct EventForwarder {
    sender: mpsc::UnboundedSender<BridgeEvent>,
}

impl LocationUpdateListener for EventForwarder {
    fn on_update(&self, _previous: Option<&TimedReading>, current: &TimedReading) {
        let event = BridgeEvent::LocationUpdate {
            latitude: current.reading.latitude,
            longitude: current.reading.longitude,
        };
        if self.sender.send(event).is_err() {
            debug!("bridge event receiver dropped");
        }
    }
}

pub struct LocationBridge {
    config: TrackerConfig,
    platform: Arc<dyn LocationPlatform>,
    clock: Arc<dyn Clock>,
    source: Mutex<Option<Arc<dyn LocationSource>>>,
    sender: mpsc::UnboundedSender<BridgeEvent>,
}

impl LocationBridge {
    /// Create a bridge and the receiving end of its event stream
    pub fn new(
        config: TrackerConfig,
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<BridgeEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let bridge = Self {
            config,
            platform,
            clock,
            source: Mutex::new(None),
            sender,
        };
        (bridge, receiver)
    }

    /// Build a fresh source for the configured mode and start it.
    ///
    /// Any source from an earlier call is stopped first.
    pub fn start_location_tracking(&self) -> Arc<dyn LocationSource> {
        let source = self.config.mode.build(
            Arc::clone(&self.platform),
            Arc::clone(&self.clock),
            self.config.tracker_settings(),
        );

        let previous = self.source.lock().replace(Arc::clone(&source));
        if let Some(previous) = previous {
            previous.stop();
        }

        source.start(Arc::new(EventForwarder {
            sender: self.sender.clone(),
        }));
        info!(mode = %self.config.mode, "location tracking started");
        source
    }

    pub fn stop_location_tracking(&self) {
        if let Some(source) = self.source.lock().as_ref() {
            source.stop();
            info!("location tracking stopped");
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.source
            .lock()
            .as_ref()
            .map_or(false, |source| source.is_running())
    }

    /// Best known location regardless of age, `None` before tracking starts
    pub fn current_location(&self) -> Option<LocationSnapshot> {
        let source = self.source.lock().clone()?;
        source
            .possibly_stale_reading()
            .map(|reading| LocationSnapshot::from(&reading))
    }
}
