use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use forge_core::events::{event_types, BusEvent};

use crate::producer::BusError;

/// A registered event handler. Handlers must tolerate duplicate delivery;
/// the bus is at-least-once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &BusEvent) -> Result<(), BusError>;
}

/// Adapter turning an async closure into an [`EventHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(BusEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BusError>> + Send,
{
    async fn handle(&self, event: &BusEvent) -> Result<(), BusError> {
        (self.0)(event.clone()).await
    }
}

/// Dispatches inbound bus events to registered handlers.
///
/// Each inbound event becomes an independent unit of work; in-flight
/// dispatches are tracked so shutdown can drain them. One handler's
/// failure never prevents the others from running.
pub struct EventConsumer {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl EventConsumer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: RwLock::new(HashMap::new()),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Register a handler for an event type. Multiple handlers may share a
    /// type; `"*"` registers a wildcard that sees every event.
    pub fn register_handler(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
        info!(event_type, "event handler registered");
    }

    /// Start consuming from the channel fed by the bus client. Each
    /// message is dispatched on its own task.
    pub fn start(self: &Arc<Self>, mut rx: mpsc::Receiver<BusEvent>) -> tokio::task::JoinHandle<()> {
        let consumer = Arc::clone(self);
        tokio::spawn(async move {
            info!("event consumption started");
            loop {
                tokio::select! {
                    _ = consumer.cancel.cancelled() => break,
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let c = Arc::clone(&consumer);
                        consumer.tracker.spawn(async move {
                            c.dispatch(&event).await;
                        });
                    }
                }
            }
            info!("event consumption stopped");
        })
    }

    /// Invoke every handler registered for the event's type plus every
    /// wildcard handler. Events with no handler at all are logged and
    /// dropped — not retried, not dead-lettered.
    pub async fn dispatch(&self, event: &BusEvent) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.handlers.read();
            let mut selected = map.get(&event.event_type).cloned().unwrap_or_default();
            if let Some(wildcard) = map.get(event_types::WILDCARD) {
                selected.extend(wildcard.iter().cloned());
            }
            selected
        };

        if handlers.is_empty() {
            warn!(event_type = %event.event_type, "no handlers registered, dropping event");
            return;
        }

        debug!(event_type = %event.event_type, count = handlers.len(), "dispatching event");

        for handler in handlers {
            if let Err(e) = handler.handle(event).await {
                error!(event_type = %event.event_type, error = %e, "event handler failed");
            }
        }
    }

    /// Stop consuming and drain in-flight dispatches, waiting at most
    /// `grace` before giving up on stragglers.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!("event consumer drain timed out, abandoning in-flight handlers");
        }
    }

    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .get(event_type)
            .map_or(0, |v| v.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> BusEvent {
        BusEvent::new(event_type, "test", Map::new())
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        Arc::new(FnHandler(move |_event: BusEvent| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_handlers() {
        let consumer = EventConsumer::new();
        let count = Arc::new(AtomicUsize::new(0));
        consumer.register_handler("project.updated", counting_handler(Arc::clone(&count)));
        consumer.register_handler("project.updated", counting_handler(Arc::clone(&count)));

        consumer.dispatch(&event("project.updated")).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn wildcard_handler_sees_every_event() {
        let consumer = EventConsumer::new();
        let specific = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        consumer.register_handler("error", counting_handler(Arc::clone(&specific)));
        consumer.register_handler("*", counting_handler(Arc::clone(&wildcard)));

        consumer.dispatch(&event("error")).await;
        consumer.dispatch(&event("progress.update")).await;

        assert_eq!(specific.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unhandled_event_is_dropped_without_panic() {
        let consumer = EventConsumer::new();
        // No handlers at all: must log-and-drop, not raise.
        consumer.dispatch(&event("nobody.cares")).await;
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let consumer = EventConsumer::new();
        let count = Arc::new(AtomicUsize::new(0));

        consumer.register_handler(
            "error",
            Arc::new(FnHandler(|_e: BusEvent| async {
                Err(BusError::Handler("boom".into()))
            })),
        );
        consumer.register_handler("error", counting_handler(Arc::clone(&count)));

        consumer.dispatch(&event("error")).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn consumes_from_channel() {
        let consumer = EventConsumer::new();
        let count = Arc::new(AtomicUsize::new(0));
        consumer.register_handler("conversation.message.received", counting_handler(Arc::clone(&count)));

        let (tx, rx) = mpsc::channel(8);
        let handle = consumer.start(rx);

        tx.send(event("conversation.message.received")).await.unwrap();
        tx.send(event("conversation.message.received")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        consumer.shutdown(Duration::from_millis(500)).await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_drains_in_flight_handlers() {
        let consumer = EventConsumer::new();
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = Arc::clone(&done);
        consumer.register_handler(
            "slow.event",
            Arc::new(FnHandler(move |_e: BusEvent| {
                let done = Arc::clone(&done_clone);
                async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })),
        );

        let (tx, rx) = mpsc::channel(8);
        let handle = consumer.start(rx);
        tx.send(event("slow.event")).await.unwrap();

        // Give the loop a moment to pick the event up, then shut down.
        tokio::time::sleep(Duration::from_millis(10)).await;
        consumer.shutdown(Duration::from_secs(1)).await;

        assert_eq!(done.load(Ordering::SeqCst), 1, "in-flight handler was not drained");
        handle.await.unwrap();
    }

    #[test]
    fn handler_count_reflects_registrations() {
        let consumer = EventConsumer::new();
        assert_eq!(consumer.handler_count("x"), 0);
        let count = Arc::new(AtomicUsize::new(0));
        consumer.register_handler("x", counting_handler(count));
        assert_eq!(consumer.handler_count("x"), 1);
    }
}
