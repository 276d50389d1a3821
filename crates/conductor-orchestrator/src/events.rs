use conductor_core::{Event, EventsConfig};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

/// Per-context stream state: ring buffer plus live subscribers.
struct ContextStream {
    next_seq: u64,
    buffer: VecDeque<Event>,
    subscribers: Vec<mpsc::Sender<Event>>,
}

impl ContextStream {
    fn new() -> Self {
        Self {
            next_seq: 0,
            buffer: VecDeque::new(),
            subscribers: Vec::new(),
        }
    }
}

/// Strictly ordered, per-context event publisher.
///
/// Each context owns a monotonically increasing sequence and a bounded
/// ring buffer (default 256 events). Subscribers attach at a sequence
/// position: buffered events from that position are replayed first, then
/// live events follow in order. Events older than the buffer are
/// permanently lost — there is no full replay guarantee — and a slow
/// subscriber whose channel fills simply misses events until it
/// re-subscribes. No ordering holds across different contexts.
pub struct EventBus {
    contexts: Mutex<HashMap<String, ContextStream>>,
    config: EventsConfig,
}

impl EventBus {
    /// Create a bus with the given buffering configuration.
    pub fn new(config: EventsConfig) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Append an event to its context's sequence and fan it out.
    /// The bus assigns the sequence number; the one on `event` is
    /// overwritten.
    pub fn publish(&self, mut event: Event) -> u64 {
        let mut contexts = self.contexts.lock();
        let stream = contexts
            .entry(event.context_id.clone())
            .or_insert_with(ContextStream::new);

        event.seq = stream.next_seq;
        stream.next_seq += 1;

        if stream.buffer.len() == self.config.buffer_size {
            stream.buffer.pop_front();
        }
        stream.buffer.push_back(event.clone());

        // Fan out; prune subscribers that went away or fell behind.
        stream
            .subscribers
            .retain(|tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(context = %event.context_id, "subscriber lagging, dropping event");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });

        event.seq
    }

    /// Attach a subscriber at `from_seq`. Buffered events with
    /// `seq >= from_seq` are replayed immediately; older events are gone.
    pub fn subscribe(&self, context_id: &str, from_seq: u64) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.buffer_size);
        let mut contexts = self.contexts.lock();
        let stream = contexts
            .entry(context_id.to_string())
            .or_insert_with(ContextStream::new);

        for event in stream.buffer.iter().filter(|e| e.seq >= from_seq) {
            // Replay cannot overflow: the channel is as large as the buffer.
            let _ = tx.try_send(event.clone());
        }
        stream.subscribers.push(tx);

        Subscription { rx }
    }

    /// Next sequence number that will be assigned in a context.
    pub fn next_seq(&self, context_id: &str) -> u64 {
        self.contexts
            .lock()
            .get(context_id)
            .map(|s| s.next_seq)
            .unwrap_or(0)
    }

    /// Drop a context's buffer and subscribers once its task is done and
    /// no replay window is needed anymore.
    pub fn drop_context(&self, context_id: &str) {
        self.contexts.lock().remove(context_id);
    }
}

/// A live, cancellable event subscription. Dropping it detaches.
pub struct Subscription {
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Receive the next event in sequence order; `None` once the context
    /// is dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_core::EventType;
    use uuid::Uuid;

    fn event(ctx: &str) -> Event {
        Event::new(
            EventType::StepProgress,
            ctx,
            Uuid::new_v4(),
            serde_json::Value::Null,
        )
    }

    fn bus(buffer: usize) -> EventBus {
        EventBus::new(EventsConfig {
            buffer_size: buffer,
        })
    }

    #[tokio::test]
    async fn test_sequence_is_strictly_increasing_per_context() {
        let bus = bus(8);
        assert_eq!(bus.publish(event("a")), 0);
        assert_eq!(bus.publish(event("a")), 1);
        // Independent sequence per context.
        assert_eq!(bus.publish(event("b")), 0);
        assert_eq!(bus.publish(event("a")), 2);
    }

    #[tokio::test]
    async fn test_subscriber_receives_in_order() {
        let bus = bus(8);
        let mut sub = bus.subscribe("ctx", 0);
        for _ in 0..5 {
            bus.publish(event("ctx"));
        }
        for expected in 0..5 {
            let ev = sub.recv().await.unwrap();
            assert_eq!(ev.seq, expected);
        }
    }

    #[tokio::test]
    async fn test_resubscription_replays_buffered_events() {
        let bus = bus(8);
        for _ in 0..4 {
            bus.publish(event("ctx"));
        }
        // Late subscriber attaching at position 2 sees 2 and 3.
        let mut sub = bus.subscribe("ctx", 2);
        assert_eq!(sub.recv().await.unwrap().seq, 2);
        assert_eq!(sub.recv().await.unwrap().seq, 3);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_events_older_than_buffer_are_lost() {
        let bus = bus(4);
        for _ in 0..10 {
            bus.publish(event("ctx"));
        }
        // Buffer holds seqs 6..=9; asking from 0 yields only those.
        let mut sub = bus.subscribe("ctx", 0);
        assert_eq!(sub.recv().await.unwrap().seq, 6);
    }

    #[tokio::test]
    async fn test_dropped_subscription_detaches() {
        let bus = bus(4);
        let sub = bus.subscribe("ctx", 0);
        drop(sub);
        // Publishing after the drop prunes the dead sender.
        bus.publish(event("ctx"));
        bus.publish(event("ctx"));
        assert_eq!(bus.next_seq("ctx"), 2);
    }
}
