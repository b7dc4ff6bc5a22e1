// src/tracker/fused.rs
//! Satellite/network fusion
//!
//! The fuser listens to both providers and keeps whichever reading wins the
//! arbitration policy:
//!
//! 1. nothing fused yet: accept
//! 2. same provider as the fused reading: accept
//! 3. satellite reading: accept
//! 4. fused reading older than the fallback threshold: accept
//! 5. otherwise reject
//!
//! Accepted readings are forwarded to the external listener together with
//! the fused reading they replace.

use super::{
    clock::Clock,
    platform::LocationPlatform,
    provider::ProviderSource,
    reading::{ProviderKind, Reading, TimedReading},
    LocationSource, LocationUpdateListener, TrackerSettings, TrackerStatus,
};
use chrono::Duration;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Why a reading was accepted into the fused state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    NoFusedReading,
    SameProvider,
    SatellitePriority,
    FusedReadingStale,
}

/// Apply the arbitration policy to a candidate reading.
///
/// Returns `None` when the candidate must be rejected.
pub fn arbitrate(
    fused: Option<&TimedReading>,
    candidate: &TimedReading,
    fallback_threshold: Duration,
) -> Option<Acceptance> {
    let Some(fused) = fused else {
        return Some(Acceptance::NoFusedReading);
    };

    if candidate.provider() == fused.provider() {
        Some(Acceptance::SameProvider)
    } else if candidate.provider().is_satellite() {
        Some(Acceptance::SatellitePriority)
    } else if candidate.received_at - fused.received_at > fallback_threshold {
        Some(Acceptance::FusedReadingStale)
    } else {
        None
    }
}

#[derive(Default)]
struct FusedState {
    running: bool,
    last_fused: Option<TimedReading>,
    listener: Option<Arc<dyn LocationUpdateListener>>,
}

struct FuserInner {
    gps: ProviderSource,
    network: ProviderSource,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    /// Serializes arbitrate, store and notify per fuser
    notify: Mutex<()>,
    state: Mutex<FusedState>,
}

impl FuserInner {
    fn on_update(&self, current: &TimedReading) {
        let _serial = self.notify.lock();
        let (previous, listener) = {
            let mut state = self.state.lock();
            let decision = arbitrate(
                state.last_fused.as_ref(),
                current,
                self.settings.fallback_threshold,
            );

            let Some(reason) = decision else {
                debug!(provider = %current.provider(), "fused update rejected");
                return;
            };
            debug!(provider = %current.provider(), ?reason, "fused update accepted");

            let previous = state.last_fused.replace(current.clone());
            (previous, state.listener.clone())
        };

        if let Some(listener) = listener {
            listener.on_update(previous.as_ref(), current);
        }
    }
}

impl Drop for FuserInner {
    fn drop(&mut self) {
        self.gps.stop();
        self.network.stop();
    }
}

/// Listener handed to the providers.
///
/// Holds the fuser weakly so registrations never keep it alive.
struct ProviderLink {
    fuser: Weak<FuserInner>,
}

impl LocationUpdateListener for ProviderLink {
    fn on_update(&self, _previous: Option<&TimedReading>, current: &TimedReading) {
        if let Some(fuser) = self.fuser.upgrade() {
            fuser.on_update(current);
        }
    }
}

/// Fuses a satellite and a network provider into one location stream.
///
/// Dropping the last handle deregisters both providers.
#[derive(Clone)]
pub struct LocationFuser {
    inner: Arc<FuserInner>,
}

impl LocationFuser {
    pub fn new(
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        let gps = ProviderSource::new(
            ProviderKind::Gps,
            Arc::clone(&platform),
            Arc::clone(&clock),
            settings.clone(),
        );
        let network = ProviderSource::new(
            ProviderKind::Network,
            platform,
            Arc::clone(&clock),
            settings.clone(),
        );

        Self {
            inner: Arc::new(FuserInner {
                gps,
                network,
                clock,
                settings,
                notify: Mutex::new(()),
                state: Mutex::new(FusedState::default()),
            }),
        }
    }

    pub fn gps(&self) -> &ProviderSource {
        &self.inner.gps
    }

    pub fn network(&self) -> &ProviderSource {
        &self.inner.network
    }

    /// Provider callback entry point; runs the arbitration policy.
    ///
    /// `_previous` is the provider's own prior reading and plays no part in
    /// arbitration, which compares against the fused state.
    pub fn on_update(&self, _previous: Option<&TimedReading>, current: &TimedReading) {
        self.inner.on_update(current);
    }

    /// The most recently accepted reading and when it was received
    pub fn last_fused(&self) -> Option<TimedReading> {
        self.inner.state.lock().last_fused.clone()
    }

    pub fn status(&self) -> TrackerStatus {
        let (running, fused) = {
            let state = self.inner.state.lock();
            (state.running, state.last_fused.clone())
        };

        TrackerStatus {
            as_of: self.inner.clock.now(),
            running,
            fused,
            gps: self.inner.gps.status(),
            network: self.inner.network.status(),
        }
    }
}

impl LocationSource for LocationFuser {
    fn start(&self, listener: Arc<dyn LocationUpdateListener>) {
        {
            let mut state = self.inner.state.lock();
            if state.running {
                return;
            }
            state.running = true;
        }

        let link: Arc<dyn LocationUpdateListener> = Arc::new(ProviderLink {
            fuser: Arc::downgrade(&self.inner),
        });
        self.inner.gps.start(Arc::clone(&link));
        self.inner.network.start(link);

        self.inner.state.lock().listener = Some(listener);
        info!(
            gps = self.inner.gps.is_running(),
            network = self.inner.network.is_running(),
            "fused tracking started"
        );
    }

    fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.listener = None;
        }

        self.inner.gps.stop();
        self.inner.network.stop();
        info!("fused tracking stopped");
    }

    fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    fn has_fresh_reading(&self) -> bool {
        self.inner.gps.has_fresh_reading() || self.inner.network.has_fresh_reading()
    }

    fn has_any_reading(&self) -> bool {
        self.inner.gps.has_any_reading() || self.inner.network.has_any_reading()
    }

    fn fresh_reading(&self) -> Option<Reading> {
        self.inner
            .gps
            .fresh_reading()
            .or_else(|| self.inner.network.fresh_reading())
    }

    fn possibly_stale_reading(&self) -> Option<Reading> {
        self.inner
            .gps
            .possibly_stale_reading()
            .or_else(|| self.inner.network.possibly_stale_reading())
    }
}
