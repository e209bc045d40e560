use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::geo::LatLng;

/// What a location listener is told.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationEvent {
    /// The engine is running; the listener should read the last known fix.
    Connected,
    Changed(LatLng),
}

pub type LocationSender = mpsc::UnboundedSender<LocationEvent>;
pub type LocationReceiver = mpsc::UnboundedReceiver<LocationEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Source of device fixes, as seen by the screen that consumes them.
pub trait LocationProvider: Send + Sync {
    fn activate(&self);
    fn deactivate(&self);
    fn add_listener(&self, listener: LocationSender) -> ListenerId;
    fn remove_listener(&self, id: ListenerId);
    fn request_updates(&self);
    fn remove_updates(&self);
    fn last_known_location(&self) -> Option<LatLng>;
}

impl<T: LocationProvider + ?Sized> LocationProvider for Arc<T> {
    fn activate(&self) {
        (**self).activate()
    }

    fn deactivate(&self) {
        (**self).deactivate()
    }

    fn add_listener(&self, listener: LocationSender) -> ListenerId {
        (**self).add_listener(listener)
    }

    fn remove_listener(&self, id: ListenerId) {
        (**self).remove_listener(id)
    }

    fn request_updates(&self) {
        (**self).request_updates()
    }

    fn remove_updates(&self) {
        (**self).remove_updates()
    }

    fn last_known_location(&self) -> Option<LatLng> {
        (**self).last_known_location()
    }
}

#[derive(Default)]
struct EngineState {
    active: bool,
    updates_requested: bool,
    last_known: Option<LatLng>,
    listeners: HashMap<ListenerId, LocationSender>,
    next_id: u64,
}

impl EngineState {
    fn dispatch(&mut self, event: LocationEvent) {
        self.listeners.retain(|id, tx| {
            let alive = tx.send(event).is_ok();
            if !alive {
                debug!(listener = id.0, "dropping closed location listener");
            }
            alive
        });
    }
}

/// Location engine fed from outside (the browser posts its geolocation fixes here).
#[derive(Clone, Default)]
pub struct PushLocationEngine {
    state: Arc<Mutex<EngineState>>,
}

impl PushLocationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        // Listener bookkeeping stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a new fix and forwards it to listeners if updates are flowing.
    pub fn report(&self, fix: LatLng) {
        let mut state = self.lock();
        state.last_known = Some(fix);
        if state.active && state.updates_requested {
            state.dispatch(LocationEvent::Changed(fix));
        } else {
            debug!(%fix, "fix recorded while updates are off");
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn updates_requested(&self) -> bool {
        self.lock().updates_requested
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }
}

impl LocationProvider for PushLocationEngine {
    fn activate(&self) {
        let mut state = self.lock();
        if !state.active {
            state.active = true;
            info!("📡 Location engine activated");
            state.dispatch(LocationEvent::Connected);
        }
    }

    fn deactivate(&self) {
        let mut state = self.lock();
        if state.active {
            state.active = false;
            info!("📴 Location engine deactivated");
        }
    }

    fn add_listener(&self, listener: LocationSender) -> ListenerId {
        let mut state = self.lock();
        let id = ListenerId(state.next_id);
        state.next_id += 1;
        if state.active {
            let _ = listener.send(LocationEvent::Connected);
        }
        state.listeners.insert(id, listener);
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.lock().listeners.remove(&id);
    }

    fn request_updates(&self) {
        self.lock().updates_requested = true;
    }

    fn remove_updates(&self) {
        self.lock().updates_requested = false;
    }

    fn last_known_location(&self) -> Option<LatLng> {
        self.lock().last_known
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix(lat: f64, lng: f64) -> LatLng {
        LatLng::new(lat, lng).unwrap()
    }

    #[test]
    fn remembers_last_fix_even_when_inactive() {
        let engine = PushLocationEngine::new();
        assert_eq!(engine.last_known_location(), None);

        engine.report(fix(10.0, 20.0));
        engine.report(fix(11.0, 21.0));

        assert_eq!(engine.last_known_location(), Some(fix(11.0, 21.0)));
    }

    #[test]
    fn forwards_fixes_only_while_active_with_updates() {
        let engine = PushLocationEngine::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.add_listener(tx);

        engine.report(fix(1.0, 1.0));
        assert!(rx.try_recv().is_err());

        engine.activate();
        assert_eq!(rx.try_recv().unwrap(), LocationEvent::Connected);

        engine.report(fix(2.0, 2.0));
        assert!(rx.try_recv().is_err(), "updates were never requested");

        engine.request_updates();
        engine.report(fix(3.0, 3.0));
        assert_eq!(rx.try_recv().unwrap(), LocationEvent::Changed(fix(3.0, 3.0)));

        engine.remove_updates();
        engine.report(fix(4.0, 4.0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn listener_added_to_active_engine_hears_connected() {
        let engine = PushLocationEngine::new();
        engine.activate();

        let (tx, mut rx) = mpsc::unbounded_channel();
        engine.add_listener(tx);

        assert_eq!(rx.try_recv().unwrap(), LocationEvent::Connected);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let engine = PushLocationEngine::new();
        engine.activate();
        engine.request_updates();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = engine.add_listener(tx);
        let _ = rx.try_recv();

        engine.remove_listener(id);
        engine.report(fix(5.0, 5.0));

        assert_eq!(engine.listener_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_listeners_are_pruned() {
        let engine = PushLocationEngine::new();
        engine.activate();
        engine.request_updates();

        let (tx, rx) = mpsc::unbounded_channel();
        engine.add_listener(tx);
        drop(rx);

        engine.report(fix(6.0, 6.0));
        assert_eq!(engine.listener_count(), 0);
    }
}
