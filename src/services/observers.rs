use crate::models::EngineEvent;
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::error;

pub type Observer = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by `register`, needed to remove the observer again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Fans engine events out to callbacks and channel subscribers.
///
/// Callbacks run on the worker task in emission order. A panicking callback
/// is logged and does not keep the event from the others.
pub struct ObserverRegistry {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Observer)>>,
    events_tx: broadcast::Sender<EngineEvent>,
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(100);
        Self {
            next_id: AtomicU64::new(1),
            observers: RwLock::new(Vec::new()),
            events_tx,
        }
    }

    pub fn register(&self, observer: Observer) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Returns false if `id` was not registered
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    pub fn notify(&self, event: &EngineEvent) {
        // Callbacks may register or remove observers
        let observers: Vec<Observer> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(event))).is_err() {
                error!("Observer panicked while handling {}", event.name());
            }
        }

        // No subscribers is fine
        let _ = self.events_tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StreamState;
    use parking_lot::Mutex;

    fn recorder() -> (Observer, Arc<Mutex<Vec<EngineEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Arc::new(move |event: &EngineEvent| sink.lock().push(event.clone())), seen)
    }

    #[test]
    fn test_delivery_in_order() {
        let registry = ObserverRegistry::new();
        let (observer, seen) = recorder();
        registry.register(observer);

        registry.notify(&EngineEvent::TimeChanged { elapsed_ms: 1000 });
        registry.notify(&EngineEvent::StatusChanged(StreamState {
            is_connected: true,
            is_playing: false,
        }));

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].name(), "TimeChanged");
        assert_eq!(seen[1].name(), "StatusChanged");
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let registry = ObserverRegistry::new();
        registry.register(Arc::new(|_: &EngineEvent| panic!("observer failure")));
        let (observer, seen) = recorder();
        registry.register(observer);

        registry.notify(&EngineEvent::TimeChanged { elapsed_ms: 0 });
        registry.notify(&EngineEvent::TimeChanged { elapsed_ms: 1000 });

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_remove() {
        let registry = ObserverRegistry::new();
        let (observer, seen) = recorder();
        let id = registry.register(observer);

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());

        registry.notify(&EngineEvent::TimeChanged { elapsed_ms: 0 });
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_channel_subscribers() {
        let registry = ObserverRegistry::new();
        let mut events = registry.subscribe();

        registry.notify(&EngineEvent::TimeChanged { elapsed_ms: 2000 });
        assert_eq!(
            events.recv().await.unwrap(),
            EngineEvent::TimeChanged { elapsed_ms: 2000 }
        );
    }
}
