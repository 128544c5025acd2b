//! Change notifications published by the store.

use std::sync::mpsc::{self, Receiver, Sender};

/// Something that changed in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    AlbumCreated { album: String },
    AlbumRenamed { from: String, to: String },
    AlbumDeleted { album: String },
    SchemaChanged { album: String },
    ItemAdded { album: String, id: i64 },
    ItemUpdated { album: String, id: i64 },
    ItemDeleted { album: String, id: i64 },
    StoreRestored,
}

/// Fan-out of events to every live subscriber.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Vec<Sender<StoreEvent>>,
}

impl EventBus {
    pub fn subscribe(&mut self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Send to all subscribers, forgetting those whose receiver is gone.
    pub fn publish(&mut self, event: StoreEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let mut bus = EventBus::default();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(StoreEvent::StoreRestored);

        assert_eq!(a.try_recv().unwrap(), StoreEvent::StoreRestored);
        assert_eq!(b.try_recv().unwrap(), StoreEvent::StoreRestored);
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let mut bus = EventBus::default();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(StoreEvent::AlbumCreated { album: "Books".into() });

        assert_eq!(bus.subscribers.len(), 1);
        assert!(kept.try_recv().is_ok());
    }
}
