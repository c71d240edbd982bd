//! EventBus trait definition

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::broadcast;

use super::CrewEvent;
use crate::session::TaskId;

/// Sequence number for events (monotonically increasing)
pub type EventSeq = u64;

/// Identifies a handler registered with [`EventBus::subscribe`]
pub type SubscriptionId = u64;

/// Async event handler; an `Err` is logged and delivery continues
pub type EventHandler = Arc<
    dyn Fn(CrewEvent) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync,
>;

/// Wrap an async closure as an [`EventHandler`]
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(CrewEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Publish/subscribe fan-out of [`CrewEvent`]s
///
/// Implementations must support:
/// - Non-blocking publishing with sequence numbers
/// - Handler subscriptions with per-subscriber ordering and failure isolation
/// - A live broadcast stream
/// - Historical replay for late joiners
pub trait EventBus: Send + Sync {
    /// Publish an event without waiting for delivery; returns its sequence number
    fn publish(&self, event: CrewEvent) -> EventSeq;

    /// Register a handler for every subsequently published event
    fn subscribe(&self, handler: EventHandler) -> SubscriptionId;

    /// Remove a handler; events already queued for it are still delivered
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Live stream of events from now on (lagging receivers drop events)
    fn stream(&self) -> broadcast::Receiver<(EventSeq, CrewEvent)>;

    /// Retained events starting from a sequence number
    fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, CrewEvent)>;

    /// Retained events for one task
    fn task_events(&self, task_id: &TaskId) -> Vec<(EventSeq, CrewEvent)>;

    /// Sequence number the next event will receive
    fn current_seq(&self) -> EventSeq;
}
