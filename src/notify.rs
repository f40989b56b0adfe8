use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-garage change feed. Confirmations, cascades and cancellations are
/// published here for whatever delivers notifications to people.
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

    /// Subscribe to a garage's events. Creates the channel if needed.
    pub fn subscribe(&self, garage_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(garage_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, garage_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&garage_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a garage's channel; subscribers see the stream close.
    pub fn remove(&self, garage_id: &Ulid) {
        self.channels.remove(garage_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let gid = Ulid::new();
        let mut rx = hub.subscribe(gid);

        let event = Event::BaysPurged { garage_id: gid };
        hub.send(gid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let gid = Ulid::new();
        hub.send(gid, &Event::GarageDeleted { id: gid });
    }

    #[tokio::test]
    async fn remove_closes_stream() {
        let hub = NotifyHub::new();
        let gid = Ulid::new();
        let mut rx = hub.subscribe(gid);
        hub.remove(&gid);
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
    }
}
