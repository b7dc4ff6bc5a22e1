// src/lib.rs
//! Location Tracker Library
//!
//! Fuses a satellite and a network location provider into a single location
//! stream, and exposes it to a host application through a small bridge.

pub mod bridge;
pub mod config;
pub mod display;
pub mod error;
pub mod gps;
pub mod logging;
pub mod monitor;
pub mod tracker;

// Re-export main types for convenience
pub use bridge::{BridgeEvent, LocationBridge, LocationSnapshot};
pub use error::{Result, TrackerError};
pub use monitor::{FeedSource, TrackingMonitor};
pub use tracker::{
    LocationFuser, LocationSource, LocationUpdateListener, ProviderKind, ProviderSource, Reading,
    TimedReading,
};
