//! Peer Events
//!
//! Typisierte Events einer Verbindung, synchron an registrierte Observer
//! verteilt. Observer laufen im Kontext des auslösenden Backends und dürfen
//! nicht blockieren.

use super::description::IceCandidate;
use crate::media::MediaStream;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// EVENTS
// ============================================================================

#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// Lokaler ICE Candidate wurde entdeckt
    CandidateDiscovered(IceCandidate),
    /// Track empfangen, enthält den kombinierten Remote-Stream
    TrackReceived(MediaStream),
}

pub type Observer = Arc<dyn Fn(&PeerEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// ============================================================================
// DISPATCHER
// ============================================================================

/// Verteilt Events an alle Observer
#[derive(Clone, Default)]
pub struct EventDispatcher {
    observers: Arc<Mutex<Vec<(SubscriptionId, Observer)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&PeerEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// Ruft alle Observer nacheinander auf
    pub fn dispatch(&self, event: &PeerEvent) {
        // Snapshot, damit Observer selbst (un)subscriben dürfen
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            observer(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("observers", &self.observer_count())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn candidate() -> PeerEvent {
        PeerEvent::CandidateDiscovered(IceCandidate {
            candidate: "candidate:1 1 udp 1 127.0.0.1 9 typ host".to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        })
    }

    #[test]
    fn test_dispatch_reaches_every_observer() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let count = Arc::clone(&count);
            dispatcher.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        dispatcher.dispatch(&candidate());
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&count);
        let id = dispatcher.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(dispatcher.unsubscribe(id));
        assert!(!dispatcher.unsubscribe(id));

        dispatcher.dispatch(&candidate());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_observer_may_unsubscribe_itself() {
        let dispatcher = EventDispatcher::new();
        let inner = dispatcher.clone();
        let own_id = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&own_id);
        let id = dispatcher.subscribe(move |_| {
            if let Some(id) = *slot.lock() {
                inner.unsubscribe(id);
            }
        });
        *own_id.lock() = Some(id);

        dispatcher.dispatch(&candidate());
        assert_eq!(dispatcher.observer_count(), 0);
    }
}
