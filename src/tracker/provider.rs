// src/tracker/provider.rs
//! Single-provider location source

use super::{
    clock::Clock,
    platform::{LocationPlatform, ReadingSink, RegistrationId},
    reading::{ProviderKind, Reading, TimedReading},
    LocationSource, LocationUpdateListener, ProviderStatus, TrackerSettings,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Default)]
struct ProviderState {
    registration: Option<RegistrationId>,
    last: Option<TimedReading>,
    listener: Option<Arc<dyn LocationUpdateListener>>,
}

impl ProviderState {
    fn is_running(&self) -> bool {
        self.registration.is_some()
    }
}

struct ProviderInner {
    kind: ProviderKind,
    platform: Arc<dyn LocationPlatform>,
    clock: Arc<dyn Clock>,
    settings: TrackerSettings,
    /// Held from store to listener return so notifications follow store order
    notify: Mutex<()>,
    state: Mutex<ProviderState>,
}

impl ProviderInner {
    fn is_fresh(&self, timed: &TimedReading, now: DateTime<Utc>) -> bool {
        now - timed.received_at <= self.settings.staleness_threshold
    }
}

impl ReadingSink for ProviderInner {
    fn on_reading_received(&self, reading: Reading) {
        let now = self.clock.now();
        let current = TimedReading::new(reading, now);

        let _serial = self.notify.lock();
        let (previous, listener) = {
            let mut state = self.state.lock();
            let previous = state.last.replace(current.clone());
            (previous, state.listener.clone())
        };

        if let Some(listener) = listener {
            listener.on_update(previous.as_ref(), &current);
        }
    }
}

/// Tracks one physical provider and remembers its last reading.
///
/// Cloning yields another handle to the same source. A started source stays
/// registered with the platform until [`LocationSource::stop`] is called;
/// dropping the handles does not deregister it.
#[derive(Clone)]
pub struct ProviderSource {
    inner: Arc<ProviderInner>,
}

impl ProviderSource {
    pub fn new(
        kind: ProviderKind,
        platform: Arc<dyn LocationPlatform>,
        clock: Arc<dyn Clock>,
        settings: TrackerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                kind,
                platform,
                clock,
                settings,
                notify: Mutex::new(()),
                state: Mutex::new(ProviderState::default()),
            }),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.inner.kind
    }

    /// Platform callback: stamp the reading and forward it.
    ///
    /// The listener receives the previously stored reading alongside the new
    /// one; the new one is stored either way.
    pub fn on_reading_received(&self, reading: Reading) {
        self.inner.on_reading_received(reading);
    }

    /// Last stored reading with its receive time, of any age
    pub fn last_reading(&self) -> Option<TimedReading> {
        self.inner.state.lock().last.clone()
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            kind: self.inner.kind,
            running: self.is_running(),
            has_fresh: self.has_fresh_reading(),
            has_any: self.has_any_reading(),
            last: self.last_reading(),
        }
    }
}

impl LocationSource for ProviderSource {
    fn start(&self, listener: Arc<dyn LocationUpdateListener>) {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if state.is_running() {
            return;
        }

        if !inner.platform.has_location_permission() {
            warn!(provider = %inner.kind, "location permission not granted, provider stays idle");
            return;
        }

        let sink: Arc<dyn ReadingSink> = Arc::clone(inner) as Arc<dyn ReadingSink>;
        let id = inner
            .platform
            .register_for_updates(inner.kind, inner.settings.update_request(), sink);

        state.registration = Some(id);
        state.last = None;
        state.listener = Some(listener);
        info!(provider = %inner.kind, "provider started");
    }

    fn stop(&self) {
        let id = {
            let mut state = self.inner.state.lock();
            state.listener = None;
            state.registration.take()
        };

        if let Some(id) = id {
            self.inner.platform.deregister_updates(id);
            info!(provider = %self.inner.kind, "provider stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.inner.state.lock().is_running()
    }

    fn has_fresh_reading(&self) -> bool {
        self.fresh_reading().is_some()
    }

    fn has_any_reading(&self) -> bool {
        let now = self.inner.clock.now();
        let in_memory = self
            .inner
            .state
            .lock()
            .last
            .as_ref()
            .map(|timed| self.inner.is_fresh(timed, now));

        match in_memory {
            Some(fresh) => fresh,
            None => {
                let known = self.inner.platform.last_known_reading(self.inner.kind);
                debug!(provider = %self.inner.kind, known = known.is_some(), "fell back to platform last-known");
                known.is_some()
            }
        }
    }

    fn fresh_reading(&self) -> Option<Reading> {
        let now = self.inner.clock.now();
        let state = self.inner.state.lock();
        state
            .last
            .as_ref()
            .filter(|timed| self.inner.is_fresh(timed, now))
            .map(|timed| timed.reading.clone())
    }

    fn possibly_stale_reading(&self) -> Option<Reading> {
        let in_memory = self
            .inner
            .state
            .lock()
            .last
            .as_ref()
            .map(|timed| timed.reading.clone());

        in_memory.or_else(|| self.inner.platform.last_known_reading(self.inner.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{
        clock::ManualClock,
        platform::LocalPlatform,
        testing::{at, epoch, reading, unthrottled, GatedListener, RecordingListener},
    };
    use chrono::Duration;
    use std::thread;

    fn setup(kind: ProviderKind) -> (ProviderSource, Arc<LocalPlatform>, Arc<ManualClock>) {
        let platform = Arc::new(LocalPlatform::new());
        let clock = Arc::new(ManualClock::new(epoch()));
        let source = ProviderSource::new(kind, platform.clone(), clock.clone(), unthrottled());
        (source, platform, clock)
    }

    #[test]
    fn test_start_registers_once() {
        let (source, platform, _) = setup(ProviderKind::Gps);
        let listener = Arc::new(RecordingListener::default());

        source.start(listener.clone());
        source.start(listener.clone());

        assert!(source.is_running());
        assert_eq!(platform.registration_count(), 1);
    }

    #[test]
    fn test_start_without_permission_is_silent_noop() {
        let (source, platform, _) = setup(ProviderKind::Network);
        platform.set_permission(false);
        let listener = Arc::new(RecordingListener::default());

        source.start(listener.clone());
        platform.deliver(reading(ProviderKind::Network, 1.0, 1.0, 0));

        assert!(!source.is_running());
        assert_eq!(platform.registration_count(), 0);
        assert_eq!(listener.count(), 0);
    }

    #[test]
    fn test_stop_is_idempotent_and_deregisters() {
        let (source, platform, _) = setup(ProviderKind::Gps);
        source.start(Arc::new(RecordingListener::default()));

        source.stop();
        source.stop();

        assert!(!source.is_running());
        assert_eq!(platform.registration_count(), 0);
    }

    #[test]
    fn test_listener_sees_previous_reading() {
        let (source, platform, clock) = setup(ProviderKind::Gps);
        let listener = Arc::new(RecordingListener::default());
        source.start(listener.clone());

        let first = reading(ProviderKind::Gps, 10.0, 20.0, 0);
        platform.deliver(first.clone());
        let (prev, cur) = listener.last().unwrap();
        assert!(prev.is_none());
        assert_eq!(cur.reading, first);
        assert_eq!(cur.received_at, epoch());

        clock.advance(Duration::seconds(30));
        let second = reading(ProviderKind::Gps, 10.5, 20.0, 30);
        platform.deliver(second.clone());
        let (prev, cur) = listener.last().unwrap();
        assert_eq!(prev, Some(TimedReading::new(first, epoch())));
        assert_eq!(cur.reading, second);
        assert_eq!(source.last_reading(), Some(cur));
    }

    #[test]
    fn test_restart_clears_last_reading() {
        let (source, platform, _) = setup(ProviderKind::Gps);
        let listener = Arc::new(RecordingListener::default());
        source.start(listener.clone());
        platform.deliver(reading(ProviderKind::Gps, 1.0, 1.0, 0));
        assert!(source.last_reading().is_some());

        source.stop();
        source.start(listener);
        assert!(source.last_reading().is_none());
    }

    #[test]
    fn test_reading_goes_stale_by_elapsed_time() {
        let (source, platform, clock) = setup(ProviderKind::Gps);
        source.start(Arc::new(RecordingListener::default()));
        let r = reading(ProviderKind::Gps, 1.0, 2.0, 0);
        platform.deliver(r.clone());

        clock.set(at(300));
        assert!(source.has_fresh_reading());
        assert_eq!(source.fresh_reading(), Some(r.clone()));

        clock.set(at(301));
        assert!(!source.has_fresh_reading());
        assert_eq!(source.fresh_reading(), None);
        assert!(!source.has_any_reading());
        assert_eq!(source.possibly_stale_reading(), Some(r));
    }

    #[test]
    fn test_falls_back_to_platform_last_known() {
        let (source, platform, _) = setup(ProviderKind::Network);
        assert!(!source.has_any_reading());
        assert_eq!(source.possibly_stale_reading(), None);

        let old = reading(ProviderKind::Network, 5.0, 6.0, -86_400);
        platform.set_last_known(old.clone());

        assert!(source.has_any_reading());
        assert!(!source.has_fresh_reading());
        assert_eq!(source.possibly_stale_reading(), Some(old));
    }

    #[test]
    fn test_concurrent_readings_reach_listener_in_store_order() {
        let (source, platform, _) = setup(ProviderKind::Network);
        let (listener, entered, release) = GatedListener::new();
        source.start(listener.clone());

        let first = {
            let source = source.clone();
            thread::spawn(move || source.on_reading_received(reading(ProviderKind::Network, 1.0, 0.0, 0)))
        };
        entered.recv().unwrap();

        let second = {
            let platform = platform.clone();
            thread::spawn(move || platform.deliver(reading(ProviderKind::Network, 2.0, 0.0, 1)))
        };
        thread::sleep(std::time::Duration::from_millis(50));
        release.send(()).unwrap();
        first.join().unwrap();
        second.join().unwrap();

        assert_eq!(listener.latitudes(), vec![(None, 1.0), (Some(1.0), 2.0)]);
        assert_eq!(source.last_reading().map(|t| t.reading.latitude), Some(2.0));
    }

    #[test]
    fn test_readings_stored_without_listener() {
        let (source, _, _) = setup(ProviderKind::Gps);
        let r = reading(ProviderKind::Gps, 1.0, 1.0, 0);

        source.on_reading_received(r.clone());

        assert_eq!(source.last_reading().map(|t| t.reading), Some(r));
    }
}
