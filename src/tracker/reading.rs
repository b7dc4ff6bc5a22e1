// src/tracker/reading.rs
//! Location readings produced by the platform providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean Earth radius in meters (IUGG)
const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Identity of a physical location provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Satellite positioning: accurate, slow to first fix
    Gps,
    /// Cell/WiFi positioning: coarse, quick
    Network,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Gps => "gps",
            ProviderKind::Network => "network",
        }
    }

    pub fn is_satellite(&self) -> bool {
        matches!(self, ProviderKind::Gps)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single position fix as reported by a provider.
///
/// Readings are plain values; once built they are never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy radius in meters
    #[serde(default)]
    pub accuracy: f64,
    /// Bearing in degrees from true north
    #[serde(default)]
    pub bearing: f64,
    /// Ground speed in m/s
    #[serde(default)]
    pub speed: f64,
    pub provider: ProviderKind,
    /// Capture time reported by the provider
    pub time: DateTime<Utc>,
}

impl Reading {
    /// Create a reading with only a position; accuracy, bearing and speed are zero.
    pub fn new(provider: ProviderKind, latitude: f64, longitude: f64, time: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: 0.0,
            bearing: 0.0,
            speed: 0.0,
            provider,
            time,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_motion(mut self, bearing: f64, speed: f64) -> Self {
        self.bearing = bearing;
        self.speed = speed;
        self
    }

    /// Great-circle distance to another reading in meters (haversine)
    pub fn distance_to(&self, other: &Reading) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// A reading together with the moment the tracker received it.
///
/// Listeners get these as explicit snapshots: the previous pair is captured
/// before the tracker stores the new one.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedReading {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

impl TimedReading {
    pub fn new(reading: Reading, received_at: DateTime<Utc>) -> Self {
        Self { reading, received_at }
    }

    pub fn provider(&self) -> ProviderKind {
        self.reading.provider
    }
}
