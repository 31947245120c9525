//! Publish/subscribe hub for auth state changes.
//!
//! Every registration owns an unbounded FIFO channel drained by its own
//! delivery task. The task first resolves the initial state supplied at
//! subscribe time and delivers it as [`AuthChangeEvent::InitialSession`];
//! events emitted in the meantime wait in the channel behind it. Listeners
//! are independent of each other: each sees every event in emission order,
//! with no ordering across listeners.

use crate::types::{AuthChangeEvent, AuthStateChange, Session};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

struct ListenerEntry {
    sender: mpsc::UnboundedSender<AuthStateChange>,
    removed: Arc<AtomicBool>,
}

#[derive(Default)]
struct EventBusInner {
    listeners: Mutex<HashMap<Uuid, ListenerEntry>>,
}

/// Fan-out of auth state changes to registered listeners.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    ///
    /// `initial` resolves the session to report as `InitialSession`; it runs
    /// on the listener's delivery task, so this call never blocks. Must be
    /// called from within a tokio runtime.
    pub fn subscribe<F, Fut>(&self, listener: F, initial: Fut) -> ListenerRegistration
    where
        F: Fn(&AuthStateChange) + Send + Sync + 'static,
        Fut: Future<Output = Option<Session>> + Send + 'static,
    {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        let removed = Arc::new(AtomicBool::new(false));

        self.inner.listeners.lock().insert(
            id,
            ListenerEntry {
                sender,
                removed: removed.clone(),
            },
        );
        debug!(listener_id = %id, "Auth listener registered");

        tokio::spawn(deliver(listener, initial, receiver, removed.clone()));

        ListenerRegistration {
            id,
            bus: Arc::downgrade(&self.inner),
            removed,
        }
    }

    /// Register a channel-backed listener.
    pub fn changes<Fut>(&self, initial: Fut) -> AuthStateChanges
    where
        Fut: Future<Output = Option<Session>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let registration = self.subscribe(
            move |change| {
                let _ = sender.send(change.clone());
            },
            initial,
        );
        AuthStateChanges {
            receiver,
            registration,
        }
    }

    /// Queue an event for every registered listener.
    pub fn emit(&self, event: AuthChangeEvent, session: Option<Session>) {
        let change = AuthStateChange { event, session };
        let listeners = self.inner.listeners.lock();
        trace!(event = ?change.event, listeners = listeners.len(), "Emitting auth event");
        for entry in listeners.values() {
            let _ = entry.sender.send(change.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Remove every registration.
    pub fn clear(&self) {
        let drained: Vec<ListenerEntry> = self.inner.listeners.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.removed.store(true, Ordering::SeqCst);
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "Auth listeners cleared");
        }
    }
}

async fn deliver<F, Fut>(
    listener: F,
    initial: Fut,
    mut receiver: mpsc::UnboundedReceiver<AuthStateChange>,
    removed: Arc<AtomicBool>,
) where
    F: Fn(&AuthStateChange),
    Fut: Future<Output = Option<Session>>,
{
    let session = initial.await;
    if removed.load(Ordering::SeqCst) {
        return;
    }
    listener(&AuthStateChange {
        event: AuthChangeEvent::InitialSession,
        session,
    });

    while let Some(change) = receiver.recv().await {
        if removed.load(Ordering::SeqCst) {
            break;
        }
        listener(&change);
    }
}

/// Handle for a registered listener.
///
/// `remove()` stops delivery and may be called any number of times.
/// Dropping the handle does not unregister the listener.
#[derive(Clone)]
pub struct ListenerRegistration {
    id: Uuid,
    bus: Weak<EventBusInner>,
    removed: Arc<AtomicBool>,
}

impl ListenerRegistration {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners.lock().remove(&self.id);
        }
        debug!(listener_id = %self.id, "Auth listener removed");
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Receiver side of a channel-backed listener. Unregisters itself on drop.
pub struct AuthStateChanges {
    receiver: mpsc::UnboundedReceiver<AuthStateChange>,
    registration: ListenerRegistration,
}

impl AuthStateChanges {
    /// Next change, or `None` once the listener has been removed.
    pub async fn recv(&mut self) -> Option<AuthStateChange> {
        if self.registration.is_removed() {
            return self.receiver.try_recv().ok();
        }
        self.receiver.recv().await
    }

    pub fn registration(&self) -> &ListenerRegistration {
        &self.registration
    }
}

impl Drop for AuthStateChanges {
    fn drop(&mut self) {
        self.registration.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn collector() -> (
        Arc<Mutex<Vec<AuthChangeEvent>>>,
        impl Fn(&AuthStateChange) + Send + Sync + 'static,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (events, move |change: &AuthStateChange| sink.lock().push(change.event))
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_initial_session_is_first() {
        let bus = EventBus::new();
        let (events, listener) = collector();

        let _registration = bus.subscribe(listener, async { None });
        bus.emit(AuthChangeEvent::SignedIn, None);
        bus.emit(AuthChangeEvent::TokenRefreshed, None);
        settle().await;

        assert_eq!(
            *events.lock(),
            vec![
                AuthChangeEvent::InitialSession,
                AuthChangeEvent::SignedIn,
                AuthChangeEvent::TokenRefreshed
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_during_slow_initial_state_are_buffered() {
        let bus = EventBus::new();
        let (events, listener) = collector();

        let _registration = bus.subscribe(listener, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            None
        });
        bus.emit(AuthChangeEvent::SignedOut, None);
        settle().await;
        assert!(events.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;
        assert_eq!(
            *events.lock(),
            vec![AuthChangeEvent::InitialSession, AuthChangeEvent::SignedOut]
        );
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_initial_session_once() {
        let bus = EventBus::new();
        let (first_events, first) = collector();
        let _first = bus.subscribe(first, async { None });
        bus.emit(AuthChangeEvent::SignedIn, None);
        bus.emit(AuthChangeEvent::TokenRefreshed, None);
        settle().await;

        let (second_events, second) = collector();
        let _second = bus.subscribe(second, async { None });
        bus.emit(AuthChangeEvent::SignedOut, None);
        settle().await;

        assert_eq!(first_events.lock().len(), 4);
        assert_eq!(
            *second_events.lock(),
            vec![AuthChangeEvent::InitialSession, AuthChangeEvent::SignedOut]
        );
    }

    #[tokio::test]
    async fn test_remove_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let (events, listener) = collector();
        let registration = bus.subscribe(listener, async { None });
        settle().await;

        registration.remove();
        registration.remove();
        assert!(registration.is_removed());
        assert_eq!(bus.listener_count(), 0);

        bus.emit(AuthChangeEvent::SignedIn, None);
        settle().await;
        assert_eq!(*events.lock(), vec![AuthChangeEvent::InitialSession]);
    }

    #[tokio::test]
    async fn test_remove_after_bus_dropped() {
        let bus = EventBus::new();
        let registration = bus.subscribe(|_| {}, async { None });
        drop(bus);
        registration.remove();
        assert!(registration.is_removed());
    }

    #[tokio::test]
    async fn test_clear_removes_all_listeners() {
        let bus = EventBus::new();
        let first = bus.subscribe(|_| {}, async { None });
        let second = bus.subscribe(|_| {}, async { None });
        assert_eq!(bus.listener_count(), 2);

        bus.clear();
        assert_eq!(bus.listener_count(), 0);
        assert!(first.is_removed());
        assert!(second.is_removed());
    }

    #[tokio::test]
    async fn test_changes_channel() {
        let bus = EventBus::new();
        let mut changes = bus.changes(async { None });
        bus.emit(AuthChangeEvent::UserUpdated, None);

        let first = changes.recv().await.unwrap();
        assert_eq!(first.event, AuthChangeEvent::InitialSession);
        assert!(first.session.is_none());
        let second = changes.recv().await.unwrap();
        assert_eq!(second.event, AuthChangeEvent::UserUpdated);

        drop(changes);
        assert_eq!(bus.listener_count(), 0);
    }
}
