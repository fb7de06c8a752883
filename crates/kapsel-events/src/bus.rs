//! Publish/subscribe hub for sandbox events.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::event::{Event, EventHandler, EventType};

struct Subscriber {
    id: u64,
    handler: EventHandler,
}

#[derive(Default)]
struct SubscriberTable {
    by_type: HashMap<EventType, Vec<Subscriber>>,
    all: Vec<Subscriber>,
    next_id: u64,
}

impl SubscriberTable {
    fn issue_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn remove(&mut self, entry: &SubscriptionEntry) {
        match entry.event_type {
            Some(event_type) => {
                if let Some(subs) = self.by_type.get_mut(&event_type) {
                    subs.retain(|s| s.id != entry.id);
                }
            }
            None => self.all.retain(|s| s.id != entry.id),
        }
    }
}

/// Event bus with per-type and catch-all subscribers.
///
/// [`EventBus::emit`] fans out asynchronously (one task per handler
/// invocation, no cross-handler ordering); [`EventBus::emit_sync`] invokes
/// handlers on the calling task, in insertion order, before returning.
/// Cloning the bus yields another handle to the same subscriber table.
#[derive(Clone, Default)]
pub struct EventBus {
    table: Arc<RwLock<SubscriberTable>>,
}

#[derive(Debug, Clone, Copy)]
struct SubscriptionEntry {
    event_type: Option<EventType>,
    id: u64,
}

/// Handle returned by the subscribe methods.
///
/// Call [`Subscription::unsubscribe`] to remove the registration; dropping
/// the handle leaves the subscription in place.
#[must_use = "dropping a Subscription does not unsubscribe; call unsubscribe()"]
pub struct Subscription {
    table: Arc<RwLock<SubscriberTable>>,
    entries: Vec<SubscriptionEntry>,
}

impl Subscription {
    /// Remove every registration made by the originating subscribe call.
    pub fn unsubscribe(self) {
        let mut table = self.table.write().unwrap();
        for entry in &self.entries {
            table.remove(entry);
        }
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_handler(event_type, Arc::new(handler))
    }

    /// Register an already-shared handler for one event type.
    pub fn subscribe_handler(&self, event_type: EventType, handler: EventHandler) -> Subscription {
        let mut table = self.table.write().unwrap();
        let id = table.issue_id();
        table
            .by_type
            .entry(event_type)
            .or_default()
            .push(Subscriber { id, handler });

        Subscription {
            table: Arc::clone(&self.table),
            entries: vec![SubscriptionEntry {
                event_type: Some(event_type),
                id,
            }],
        }
    }

    /// Register one handler for several event types. The returned
    /// subscription undoes all of them at once.
    pub fn subscribe_multiple(
        &self,
        event_types: &[EventType],
        handler: EventHandler,
    ) -> Subscription {
        let mut table = self.table.write().unwrap();
        let mut entries = Vec::with_capacity(event_types.len());
        for &event_type in event_types {
            let id = table.issue_id();
            table.by_type.entry(event_type).or_default().push(Subscriber {
                id,
                handler: Arc::clone(&handler),
            });
            entries.push(SubscriptionEntry {
                event_type: Some(event_type),
                id,
            });
        }

        Subscription {
            table: Arc::clone(&self.table),
            entries,
        }
    }

    /// Register a handler for every event.
    pub fn subscribe_all(&self, handler: EventHandler) -> Subscription {
        let mut table = self.table.write().unwrap();
        let id = table.issue_id();
        table.all.push(Subscriber { id, handler });

        Subscription {
            table: Arc::clone(&self.table),
            entries: vec![SubscriptionEntry {
                event_type: None,
                id,
            }],
        }
    }

    fn snapshot(&self, event_type: EventType) -> Vec<EventHandler> {
        let table = self.table.read().unwrap();
        let mut handlers = Vec::new();
        if let Some(subs) = table.by_type.get(&event_type) {
            handlers.extend(subs.iter().map(|s| Arc::clone(&s.handler)));
        }
        handlers.extend(table.all.iter().map(|s| Arc::clone(&s.handler)));
        handlers
    }

    /// Deliver an event to all matching subscribers, each on its own task.
    ///
    /// No ordering is guaranteed across handlers. Per handler, delivery
    /// order follows emit order only if the caller serializes emits.
    pub fn emit(&self, event: Event) {
        for handler in self.snapshot(event.event_type) {
            let event = event.clone();
            tokio::spawn(async move {
                handler(&event);
            });
        }
    }

    /// Deliver an event on the calling task, in insertion order, returning
    /// only after every handler ran. Handlers are invoked outside the
    /// subscriber lock.
    pub fn emit_sync(&self, event: &Event) {
        for handler in self.snapshot(event.event_type) {
            handler(event);
        }
    }

    /// Total number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let table = self.table.read().unwrap();
        table.all.len() + table.by_type.values().map(Vec::len).sum::<usize>()
    }

    /// Remove every subscriber.
    pub fn clear(&self) {
        let mut table = self.table.write().unwrap();
        table.by_type.clear();
        table.all.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    fn counter_handler(counter: Arc<AtomicUsize>) -> EventHandler {
        Arc::new(move |_event: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn emit_reaches_type_and_all_subscribers() {
        let bus = EventBus::new();
        let typed = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));

        let _typed_sub = bus.subscribe_handler(
            EventType::ExecutionComplete,
            counter_handler(Arc::clone(&typed)),
        );
        let _all_sub = bus.subscribe_all(counter_handler(Arc::clone(&all)));

        bus.emit(Event::new(EventType::ExecutionComplete, "sb-1"));
        bus.emit(Event::new(EventType::SandboxCreated, "sb-1"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(typed.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn emit_sync_preserves_insertion_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let order = Arc::clone(&order);
            let _sub = bus.subscribe(EventType::SandboxStopped, move |_| {
                order.lock().unwrap().push(i);
            });
        }

        bus.emit_sync(&Event::new(EventType::SandboxStopped, "sb-1"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let sub =
            bus.subscribe_handler(EventType::ExecutionStarted, counter_handler(Arc::clone(&count)));
        sub.unsubscribe();

        bus.emit_sync(&Event::new(EventType::ExecutionStarted, "sb-1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn subscribe_multiple_is_undone_in_one_call() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let sub = bus.subscribe_multiple(
            &[EventType::OutputStdout, EventType::OutputStderr],
            counter_handler(Arc::clone(&count)),
        );
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit_sync(&Event::new(EventType::OutputStdout, "sb-1"));
        bus.emit_sync(&Event::new(EventType::OutputStderr, "sb-1"));
        assert_eq!(count.load(Ordering::SeqCst), 2);

        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit_sync(&Event::new(EventType::OutputStdout, "sb-1"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_churn() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let a = bus.subscribe(EventType::SandboxCreated, |_| {});
        let b = bus.subscribe_all(Arc::new(|_| {}));
        assert_eq!(bus.subscriber_count(), 2);

        a.unsubscribe();
        assert_eq!(bus.subscriber_count(), 1);
        b.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn clear_removes_everyone() {
        let bus = EventBus::new();
        let _a = bus.subscribe(EventType::SandboxCreated, |_| {});
        let _b = bus.subscribe_all(Arc::new(|_| {}));

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
