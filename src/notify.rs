use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed events, one channel per topic (see `Event::topic`).
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a doctor's (or an appointment's) committed events.
    pub fn subscribe(&self, topic: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fan out one transaction's events. No-op for topics nobody listens to.
    pub fn publish(&self, events: &[Event]) {
        for event in events {
            if let Some(sender) = self.channels.get(&event.topic()) {
                let _ = sender.send(event.clone());
            }
        }
    }

    /// Drop channels whose receivers have all gone away.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
