use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use super::models::BuildProgressEvent;

/// Buffered events per subscriber before a slow consumer starts lagging.
const CHANNEL_CAPACITY: usize = 256;

/// In-process publish/subscribe registry keyed by project id.
///
/// Constructed once at process start and shared by `Arc`; it decouples the
/// pipeline task from however many live viewers are attached. Delivery is
/// per-subscriber and order-preserving for a given project; a lagging or
/// dropped subscriber never affects the publisher or other subscribers.
/// Events are not persisted and not replayed — a late subscriber only
/// receives the synthetic `connected` acknowledgment.
pub struct ProgressBus {
    channels: Mutex<HashMap<String, broadcast::Sender<BuildProgressEvent>>>,
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a project's progress feed. Dropping the returned
    /// stream unsubscribes.
    pub fn subscribe(&self, project_id: &str) -> ProgressStream {
        let rx = {
            let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
            let tx = channels
                .entry(project_id.to_string())
                .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
            tx.subscribe()
        };
        ProgressStream {
            first: Some(BuildProgressEvent::connected(project_id)),
            rx,
        }
    }

    /// Broadcast an event to all current subscribers of the project.
    /// Channels with no remaining receivers are pruned.
    pub fn publish(&self, event: BuildProgressEvent) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(&event.project_id) {
            let project_id = event.project_id.clone();
            if tx.send(event).is_err() {
                channels.remove(&project_id);
            }
        }
    }

    /// Number of live subscribers for a project.
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .get(project_id)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A live event stream for one subscriber. Yields the `connected`
/// acknowledgment first, then events in publish order.
pub struct ProgressStream {
    first: Option<BuildProgressEvent>,
    rx: broadcast::Receiver<BuildProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` once the channel is closed with nothing
    /// pending. A lagged consumer skips the missed window and keeps
    /// receiving rather than erroring out.
    pub async fn recv(&mut self) -> Option<BuildProgressEvent> {
        if let Some(event) = self.first.take() {
            return Some(event);
        }
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::models::BuildStatus;

    #[tokio::test]
    async fn test_subscriber_receives_connected_ack_first() {
        let bus = ProgressBus::new();
        let mut stream = bus.subscribe("p1");
        let first = stream.recv().await.unwrap();
        assert_eq!(first.phase, "connected");
        assert_eq!(first.project_id, "p1");
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber_in_order() {
        let bus = ProgressBus::new();
        let mut stream = bus.subscribe("p1");
        assert_eq!(stream.recv().await.unwrap().phase, "connected");

        bus.publish(BuildProgressEvent::phase_change("p1", BuildStatus::Queued, "q"));
        bus.publish(BuildProgressEvent::phase_change("p1", BuildStatus::Planning, "p"));
        bus.publish(BuildProgressEvent::phase_change("p1", BuildStatus::Building, "b"));

        assert_eq!(stream.recv().await.unwrap().phase, "queued");
        assert_eq!(stream.recv().await.unwrap().phase, "planning");
        assert_eq!(stream.recv().await.unwrap().phase, "building");
    }

    #[tokio::test]
    async fn test_two_subscribers_see_identical_sequences() {
        let bus = ProgressBus::new();
        let mut a = bus.subscribe("p1");
        let mut b = bus.subscribe("p1");

        for status in [BuildStatus::Queued, BuildStatus::Planning, BuildStatus::Complete] {
            bus.publish(BuildProgressEvent::phase_change("p1", status, "msg"));
        }

        let mut seq_a = Vec::new();
        let mut seq_b = Vec::new();
        for _ in 0..4 {
            seq_a.push(a.recv().await.unwrap().phase);
            seq_b.push(b.recv().await.unwrap().phase);
        }
        assert_eq!(seq_a, seq_b);
        assert_eq!(seq_a, vec!["connected", "queued", "planning", "complete"]);
    }

    #[tokio::test]
    async fn test_events_are_not_replayed_to_late_subscribers() {
        let bus = ProgressBus::new();
        // Keep one subscriber alive so the channel persists across publishes
        let _early = bus.subscribe("p1");
        bus.publish(BuildProgressEvent::phase_change("p1", BuildStatus::Complete, "done"));

        let mut late = bus.subscribe("p1");
        assert_eq!(late.recv().await.unwrap().phase, "connected");
        // Nothing else pending: recv would block
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), late.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_panic() {
        let bus = ProgressBus::new();
        bus.publish(BuildProgressEvent::phase_change("ghost", BuildStatus::Queued, "q"));
        assert_eq!(bus.subscriber_count("ghost"), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned_on_publish() {
        let bus = ProgressBus::new();
        let stream = bus.subscribe("p1");
        assert_eq!(bus.subscriber_count("p1"), 1);
        drop(stream);

        bus.publish(BuildProgressEvent::phase_change("p1", BuildStatus::Queued, "q"));
        assert_eq!(bus.subscriber_count("p1"), 0);
    }

    #[tokio::test]
    async fn test_cross_project_isolation() {
        let bus = ProgressBus::new();
        let mut p1 = bus.subscribe("p1");
        assert_eq!(p1.recv().await.unwrap().phase, "connected");

        bus.publish(BuildProgressEvent::phase_change("p2", BuildStatus::Queued, "q"));
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), p1.recv()).await;
        assert!(pending.is_err(), "p1 subscriber must not see p2 events");
    }
}
