// src/tracker/platform.rs
//! Platform location subsystem seen from the tracking core

use super::reading::{ProviderKind, Reading};
use chrono::Duration;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

/// Handle returned by [`LocationPlatform::register_for_updates`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

/// Throttling requested when registering for updates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateRequest {
    pub min_interval: Duration,
    pub min_distance_m: f64,
}

/// Callback target for raw platform readings
pub trait ReadingSink: Send + Sync {
    fn on_reading_received(&self, reading: Reading);
}

/// The host location subsystem.
///
/// Implementations wrap whatever actually produces positions (an OS service,
/// a gpsd connection, a recorded track).
pub trait LocationPlatform: Send + Sync {
    fn has_location_permission(&self) -> bool;

    fn register_for_updates(
        &self,
        provider: ProviderKind,
        request: UpdateRequest,
        sink: Arc<dyn ReadingSink>,
    ) -> RegistrationId;

    fn deregister_updates(&self, id: RegistrationId);

    /// Last reading the platform has seen from `provider`, of any age
    fn last_known_reading(&self, provider: ProviderKind) -> Option<Reading>;
}

struct Registration {
    provider: ProviderKind,
    request: UpdateRequest,
    sink: Arc<dyn ReadingSink>,
    last_delivered: Option<Reading>,
}

impl Registration {
    fn accepts(&self, reading: &Reading) -> bool {
        match &self.last_delivered {
            None => true,
            Some(prev) => {
                reading.time - prev.time >= self.request.min_interval
                    && reading.distance_to(prev) >= self.request.min_distance_m
            }
        }
    }
}

/// In-process platform driven by feeds.
///
/// Feeds call [`LocalPlatform::deliver`]; readings are routed to the
/// registrations for their provider, throttled per registration by its
/// minimum interval and distance.
pub struct LocalPlatform {
    permission: AtomicBool,
    next_id: AtomicU64,
    registrations: RwLock<HashMap<RegistrationId, Registration>>,
    last_known: RwLock<HashMap<ProviderKind, Reading>>,
}

impl LocalPlatform {
    /// Create a platform with location permission granted
    pub fn new() -> Self {
        Self {
            permission: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
            registrations: RwLock::new(HashMap::new()),
            last_known: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::Relaxed);
    }

    /// Seed the last-known reading without delivering it
    pub fn set_last_known(&self, reading: Reading) {
        self.last_known.write().insert(reading.provider, reading);
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }

    pub fn is_registered(&self, provider: ProviderKind) -> bool {
        self.registrations
            .read()
            .values()
            .any(|r| r.provider == provider)
    }

    /// Route a reading to its provider's registrations.
    ///
    /// Returns the number of sinks that received it.
    pub fn deliver(&self, reading: Reading) -> usize {
        self.set_last_known(reading.clone());

        // Sinks are invoked with no lock held; they may stop and deregister.
        let sinks: Vec<Arc<dyn ReadingSink>> = {
            let mut registrations = self.registrations.write();
            registrations
                .values_mut()
                .filter(|r| r.provider == reading.provider)
                .filter_map(|r| {
                    if r.accepts(&reading) {
                        r.last_delivered = Some(reading.clone());
                        Some(Arc::clone(&r.sink))
                    } else {
                        None
                    }
                })
                .collect()
        };

        trace!(
            provider = %reading.provider,
            sinks = sinks.len(),
            "delivering reading"
        );

        for sink in &sinks {
            sink.on_reading_received(reading.clone());
        }
        sinks.len()
    }
}

impl Default for LocalPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationPlatform for LocalPlatform {
    fn has_location_permission(&self) -> bool {
        self.permission.load(Ordering::Relaxed)
    }

    fn register_for_updates(
        &self,
        provider: ProviderKind,
        request: UpdateRequest,
        sink: Arc<dyn ReadingSink>,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registrations.write().insert(
            id,
            Registration {
                provider,
                request,
                sink,
                last_delivered: None,
            },
        );
        debug!(%provider, ?id, "registered for updates");
        id
    }

    fn deregister_updates(&self, id: RegistrationId) {
        if self.registrations.write().remove(&id).is_some() {
            debug!(?id, "deregistered updates");
        }
    }

    fn last_known_reading(&self, provider: ProviderKind) -> Option<Reading> {
        self.last_known.read().get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::testing::reading;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        received: Mutex<Vec<Reading>>,
    }

    impl ReadingSink for CollectingSink {
        fn on_reading_received(&self, reading: Reading) {
            self.received.lock().push(reading);
        }
    }

    fn open_request() -> UpdateRequest {
        UpdateRequest {
            min_interval: Duration::zero(),
            min_distance_m: 0.0,
        }
    }

    #[test]
    fn test_deliver_routes_by_provider() {
        let platform = LocalPlatform::new();
        let gps_sink = Arc::new(CollectingSink::default());
        let net_sink = Arc::new(CollectingSink::default());
        platform.register_for_updates(ProviderKind::Gps, open_request(), gps_sink.clone());
        platform.register_for_updates(ProviderKind::Network, open_request(), net_sink.clone());

        assert_eq!(platform.deliver(reading(ProviderKind::Gps, 1.0, 1.0, 0)), 1);

        assert_eq!(gps_sink.received.lock().len(), 1);
        assert!(net_sink.received.lock().is_empty());
    }

    #[test]
    fn test_deliver_records_last_known_without_registrations() {
        let platform = LocalPlatform::new();
        let r = reading(ProviderKind::Network, 3.0, 4.0, 10);

        assert_eq!(platform.deliver(r.clone()), 0);
        assert_eq!(platform.last_known_reading(ProviderKind::Network), Some(r));
        assert_eq!(platform.last_known_reading(ProviderKind::Gps), None);
    }

    #[test]
    fn test_throttle_requires_interval_and_distance() {
        let platform = LocalPlatform::new();
        let sink = Arc::new(CollectingSink::default());
        let request = UpdateRequest {
            min_interval: Duration::seconds(60),
            min_distance_m: 10.0,
        };
        platform.register_for_updates(ProviderKind::Gps, request, sink.clone());

        // First delivery always passes
        platform.deliver(reading(ProviderKind::Gps, 48.0, 11.0, 0));
        // Far enough, too soon
        platform.deliver(reading(ProviderKind::Gps, 48.01, 11.0, 30));
        // Late enough, too close (about 1 m)
        platform.deliver(reading(ProviderKind::Gps, 48.00001, 11.0, 90));
        // Late enough and far enough
        platform.deliver(reading(ProviderKind::Gps, 48.01, 11.0, 120));

        let received = sink.received.lock();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].latitude, 48.01);
    }

    #[test]
    fn test_deregister_stops_delivery() {
        let platform = LocalPlatform::new();
        let sink = Arc::new(CollectingSink::default());
        let id = platform.register_for_updates(ProviderKind::Gps, open_request(), sink.clone());
        assert!(platform.is_registered(ProviderKind::Gps));

        platform.deregister_updates(id);
        platform.deliver(reading(ProviderKind::Gps, 1.0, 1.0, 0));

        assert!(!platform.is_registered(ProviderKind::Gps));
        assert!(sink.received.lock().is_empty());
    }

    #[test]
    fn test_permission_flag() {
        let platform = LocalPlatform::new();
        assert!(platform.has_location_permission());
        platform.set_permission(false);
        assert!(!platform.has_location_permission());
    }
}
