// src/tracker/mod.rs
//! Location tracking core
//!
//! Two [`ProviderSource`]s (satellite and network) feed a [`LocationFuser`]
//! that arbitrates between them and keeps a single fused reading. Both
//! implement [`LocationSource`], so consumers can hold either one.

pub mod clock;
pub mod fused;
pub mod platform;
pub mod provider;
pub mod reading;

pub use clock::{Clock, ManualClock, SystemClock};
pub use fused::LocationFuser;
pub use platform::{LocalPlatform, LocationPlatform, ReadingSink, RegistrationId, UpdateRequest};
pub use provider::ProviderSource;
pub use reading::{ProviderKind, Reading, TimedReading};

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Minimum time between platform updates
pub const DEFAULT_MIN_UPDATE_INTERVAL_MS: u64 = 60 * 1000;

/// Minimum movement between platform updates
pub const DEFAULT_MIN_UPDATE_DISTANCE_M: f64 = 10.0;

/// Age after which an in-memory reading no longer counts as fresh
pub const DEFAULT_STALENESS_THRESHOLD_MS: u64 = 5 * 60 * 1000;

/// Age of the fused reading after which a lower-priority provider may replace it
pub const DEFAULT_FALLBACK_THRESHOLD_MS: u64 = 5 * 60 * 1000;

/// Receives tracker updates.
///
/// `previous` is the state held immediately before `current` was stored,
/// or `None` if nothing had been stored yet.
pub trait LocationUpdateListener: Send + Sync {
    fn on_update(&self, previous: Option<&TimedReading>, current: &TimedReading);
}

/// Common capability of a single provider and the fused tracker.
///
/// None of these calls fail: a missing permission leaves the source idle and
/// a missing reading is reported as `None`/`false`.
pub trait LocationSource: Send + Sync {
    /// Begin tracking and deliver updates to `listener`. No-op if already running.
    fn start(&self, listener: Arc<dyn LocationUpdateListener>);

    /// Stop tracking and detach the listener. No-op if already stopped.
    fn stop(&self);

    fn is_running(&self) -> bool;

    /// True if a reading newer than the staleness threshold is available
    fn has_fresh_reading(&self) -> bool;

    fn has_any_reading(&self) -> bool;

    fn fresh_reading(&self) -> Option<Reading>;

    /// The best reading available regardless of age
    fn possibly_stale_reading(&self) -> Option<Reading>;
}

/// Timing and distance tunables for the tracking core
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSettings {
    pub min_update_interval: Duration,
    pub min_update_distance_m: f64,
    pub staleness_threshold: Duration,
    pub fallback_threshold: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            min_update_interval: Duration::milliseconds(DEFAULT_MIN_UPDATE_INTERVAL_MS as i64),
            min_update_distance_m: DEFAULT_MIN_UPDATE_DISTANCE_M,
            staleness_threshold: Duration::milliseconds(DEFAULT_STALENESS_THRESHOLD_MS as i64),
            fallback_threshold: Duration::milliseconds(DEFAULT_FALLBACK_THRESHOLD_MS as i64),
        }
    }
}

impl TrackerSettings {
    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            min_interval: self.min_update_interval,
            min_distance_m: self.min_update_distance_m,
        }
    }
}

/// Snapshot of one provider for status displays
#[derive(Debug, Clone)]
pub struct ProviderStatus {
    pub kind: ProviderKind,
    pub running: bool,
    pub has_fresh: bool,
    pub has_any: bool,
    pub last: Option<TimedReading>,
}

/// Snapshot of the fused tracker for status displays
#[derive(Debug, Clone)]
pub struct TrackerStatus {
    /// Tracker clock reading the snapshot was taken at
    pub as_of: DateTime<Utc>,
    pub running: bool,
    pub fused: Option<TimedReading>,
    pub gps: ProviderStatus,
    pub network: ProviderStatus,
}

/// Which source the consumer boundary builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    /// Satellite and network fused
    #[default]
    Fused,
    /// Satellite provider alone
    Gps,
    /// Network provider alone
    Network,
}

impl TrackingMode {
    /// Build the source for this mode
    pub fn build(
        self,
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Arc<dyn LocationSource> {
        match self {
            TrackingMode::Fused => Arc::new(LocationFuser::new(platform, clock, settings)),
            TrackingMode::Gps => {
                Arc::new(ProviderSource::new(ProviderKind::Gps, platform, clock, settings))
            }
            TrackingMode::Network => {
                Arc::new(ProviderSource::new(ProviderKind::Network, platform, clock, settings))
            }
        }
    }
}

impl std::fmt::Display for TrackingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackingMode::Fused => write!(f, "fused"),
            TrackingMode::Gps => write!(f, "gps"),
            TrackingMode::Network => write!(f, "network"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the tracker unit tests

    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::mpsc;

    pub fn epoch() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    pub fn at(secs: i64) -> DateTime<Utc> {
        epoch() + Duration::seconds(secs)
    }

    pub fn reading(kind: ProviderKind, lat: f64, lon: f64, secs: i64) -> Reading {
        Reading::new(kind, lat, lon, at(secs))
    }

    /// Settings with no platform-side throttling
    pub fn unthrottled() -> TrackerSettings {
        TrackerSettings {
            min_update_interval: Duration::zero(),
            min_update_distance_m: 0.0,
            ..TrackerSettings::default()
        }
    }

    /// Records every update it receives
    #[derive(Default)]
    pub struct RecordingListener {
        pub updates: Mutex<Vec<(Option<TimedReading>, TimedReading)>>,
    }

    impl RecordingListener {
        pub fn count(&self) -> usize {
            self.updates.lock().len()
        }

        pub fn last(&self) -> Option<(Option<TimedReading>, TimedReading)> {
            self.updates.lock().last().cloned()
        }
    }

    impl LocationUpdateListener for RecordingListener {
        fn on_update(&self, previous: Option<&TimedReading>, current: &TimedReading) {
            self.updates.lock().push((previous.cloned(), current.clone()));
        }
    }

    /// Records updates, parking inside the first callback until released
    pub struct GatedListener {
        pub recorded: RecordingListener,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl GatedListener {
        /// Returns the listener, a receiver signalled when the first callback
        /// is entered and a sender that lets it return.
        pub fn new() -> (Arc<Self>, mpsc::Receiver<()>, mpsc::Sender<()>) {
            let (entered_tx, entered_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let listener = Arc::new(Self {
                recorded: RecordingListener::default(),
                entered: Mutex::new(Some(entered_tx)),
                release: Mutex::new(release_rx),
            });
            (listener, entered_rx, release_tx)
        }

        /// `(previous latitude, current latitude)` per update, in arrival order
        pub fn latitudes(&self) -> Vec<(Option<f64>, f64)> {
            self.recorded
                .updates
                .lock()
                .iter()
                .map(|(prev, cur)| (prev.as_ref().map(|p| p.reading.latitude), cur.reading.latitude))
                .collect()
        }
    }

    impl LocationUpdateListener for GatedListener {
        fn on_update(&self, previous: Option<&TimedReading>, current: &TimedReading) {
            self.recorded.on_update(previous, current);
            let first = self.entered.lock().take();
            if let Some(entered) = first {
                entered.send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
        }
    }
}
