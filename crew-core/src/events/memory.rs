//! In-memory EventBus implementation
//!
//! MemoryEventBus keeps a bounded history for replay, a broadcast channel for
//! live streams, and one delivery queue plus task per handler subscription.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use super::CrewEvent;
use super::bus::{EventBus, EventHandler, EventSeq, SubscriptionId};
use crate::session::TaskId;

/// Capacity of the live broadcast channel
const STREAM_CAPACITY: usize = 1024;

struct History {
    events: VecDeque<(EventSeq, CrewEvent)>,
    next_seq: EventSeq,
}

/// In-memory implementation of EventBus
///
/// Publishing never waits on handlers: each subscription owns an unbounded
/// queue drained by its own task, so a slow handler only delays itself.
/// Handlers must be registered from within a Tokio runtime.
pub struct MemoryEventBus {
    /// Retained events; also serializes sequence assignment and fan-out
    history: Mutex<History>,
    capacity: usize,
    /// Mirrors `History::next_seq` for lock-free reads
    current_seq: AtomicU64,
    tx: broadcast::Sender<(EventSeq, CrewEvent)>,
    subscribers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<(EventSeq, CrewEvent)>>>,
    next_subscription: AtomicU64,
}

impl MemoryEventBus {
    /// Create a bus retaining at most `capacity` events for replay
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            history: Mutex::new(History {
                events: VecDeque::new(),
                next_seq: 0,
            }),
            capacity,
            current_seq: AtomicU64::new(0),
            tx,
            subscribers: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribers(
        &self,
    ) -> MutexGuard<'_, HashMap<SubscriptionId, mpsc::UnboundedSender<(EventSeq, CrewEvent)>>>
    {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl EventBus for MemoryEventBus {
    fn publish(&self, event: CrewEvent) -> EventSeq {
        let mut history = self.history();
        let seq = history.next_seq;
        history.next_seq += 1;
        self.current_seq.store(history.next_seq, Ordering::SeqCst);

        if self.capacity > 0 {
            if history.events.len() == self.capacity {
                history.events.pop_front();
            }
            history.events.push_back((seq, event.clone()));
        }

        // Fan out while still holding the history lock so every queue sees
        // events in sequence order
        self.subscribers()
            .retain(|_, queue| queue.send((seq, event.clone())).is_ok());
        let _ = self.tx.send((seq, event));

        seq
    }

    fn subscribe(&self, handler: EventHandler) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        let (queue, mut rx) = mpsc::unbounded_channel::<(EventSeq, CrewEvent)>();
        self.subscribers().insert(id, queue);

        tokio::spawn(async move {
            while let Some((seq, event)) = rx.recv().await {
                let event_type = event.type_name();
                // Run in its own task so a panicking handler can't take the
                // subscription down with it
                match tokio::spawn(handler(event)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        warn!(subscription = id, seq, event_type, %error, "Event handler failed");
                    }
                    Err(e) if e.is_panic() => {
                        warn!(subscription = id, seq, event_type, "Event handler panicked");
                    }
                    Err(_) => {}
                }
            }
            debug!(subscription = id, "Event subscription closed");
        });

        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers().remove(&id).is_some()
    }

    fn stream(&self) -> broadcast::Receiver<(EventSeq, CrewEvent)> {
        self.tx.subscribe()
    }

    fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, CrewEvent)> {
        self.history()
            .events
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    fn task_events(&self, task_id: &TaskId) -> Vec<(EventSeq, CrewEvent)> {
        self.history()
            .events
            .iter()
            .filter(|(_, event)| event.task_id() == task_id)
            .cloned()
            .collect()
    }

    fn current_seq(&self) -> EventSeq {
        self.current_seq.load(Ordering::SeqCst)
    }
}
