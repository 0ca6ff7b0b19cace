use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use forge_core::events::BusEvent;
use forge_core::ids::{ProjectId, SessionId};

/// Source tag stamped on every event this engine produces.
const SOURCE: &str = "forge-engine";

pub const TOPIC_PROJECT_UPDATES: &str = "project-updates";
pub const TOPIC_CONVERSATION_EVENTS: &str = "conversation-events";
/// Unmapped prefixes land here.
pub const DEFAULT_TOPIC: &str = TOPIC_CONVERSATION_EVENTS;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus closed: {0}")]
    Closed(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// An individual handler failed; logged and isolated by the consumer.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Transport seam between the producer and the actual bus client.
///
/// Delivery is at-least-once from the adapter's perspective: a send that
/// returns Ok means the bus accepted the event, and consumers must
/// tolerate duplicates (idempotency is a handler responsibility).
#[async_trait]
pub trait BusTransport: Send + Sync {
    async fn send(&self, topic: &str, key: Option<&str>, event: &BusEvent)
        -> Result<(), BusError>;
}

/// Loop-back transport: feeds published events straight into the consumer
/// channel. Keeps a log of (topic, event) pairs for inspection in tests.
pub struct InMemoryTransport {
    tx: mpsc::Sender<BusEvent>,
    sent: parking_lot::Mutex<Vec<(String, BusEvent)>>,
}

impl InMemoryTransport {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<BusEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                tx,
                sent: parking_lot::Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    pub fn sent(&self) -> Vec<(String, BusEvent)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl BusTransport for InMemoryTransport {
    async fn send(
        &self,
        topic: &str,
        _key: Option<&str>,
        event: &BusEvent,
    ) -> Result<(), BusError> {
        self.sent.lock().push((topic.to_string(), event.clone()));
        self.tx
            .send(event.clone())
            .await
            .map_err(|e| BusError::Closed(e.to_string()))
    }
}

/// Topic for an event type: first dot-segment through a static map,
/// default topic for unmapped prefixes.
pub fn topic_for(event_type: &str) -> &'static str {
    let prefix = event_type.split('.').next().unwrap_or(event_type);
    match prefix {
        "project" | "validation" => TOPIC_PROJECT_UPDATES,
        "conversation" | "error" => TOPIC_CONVERSATION_EVENTS,
        _ => DEFAULT_TOPIC,
    }
}

/// Publishes structured events onto the bus.
pub struct EventProducer {
    transport: Arc<dyn BusTransport>,
}

impl EventProducer {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self { transport }
    }

    /// Wrap `data` in the `{type, timestamp, source, data}` envelope and
    /// send it to the topic derived from the event type. A session id is
    /// injected into `data.sessionId` when given.
    #[instrument(skip(self, data))]
    pub async fn publish(
        &self,
        event_type: &str,
        mut data: Map<String, Value>,
        routing_key: Option<&str>,
        session_id: Option<&SessionId>,
    ) -> Result<(), BusError> {
        if let Some(sid) = session_id {
            data.insert("sessionId".into(), Value::String(sid.as_str().to_string()));
        }

        let event = BusEvent::new(event_type, SOURCE, data);
        let topic = topic_for(event_type);
        self.transport.send(topic, routing_key, &event).await?;

        info!(event_type, topic, "event published");
        Ok(())
    }

    /// `conversation.<subtype>` event, keyed and scoped by session.
    pub async fn conversation_event(
        &self,
        session_id: &SessionId,
        subtype: &str,
        data: Map<String, Value>,
    ) -> Result<(), BusError> {
        self.publish(
            &format!("conversation.{subtype}"),
            data,
            Some(session_id.as_str()),
            Some(session_id),
        )
        .await
    }

    /// `project.<subtype>` event, keyed by project id.
    pub async fn project_event(
        &self,
        project_id: &str,
        subtype: &str,
        mut data: Map<String, Value>,
        session_id: Option<&SessionId>,
    ) -> Result<(), BusError> {
        data.insert("projectId".into(), Value::String(project_id.to_string()));
        self.publish(
            &format!("project.{subtype}"),
            data,
            Some(project_id),
            session_id,
        )
        .await
    }

    pub async fn error_event(
        &self,
        error_type: &str,
        message: &str,
        details: Option<Value>,
        session_id: Option<&SessionId>,
    ) -> Result<(), BusError> {
        let mut data = Map::new();
        data.insert("errorType".into(), Value::String(error_type.into()));
        data.insert("message".into(), Value::String(message.into()));
        data.insert("details".into(), details.unwrap_or_else(|| json!({})));
        self.publish("error", data, None, session_id).await
    }

    pub async fn progress_event(
        &self,
        task: &str,
        progress: f64,
        session_id: &SessionId,
        details: Option<Value>,
    ) -> Result<(), BusError> {
        let mut data = Map::new();
        data.insert("task".into(), Value::String(task.into()));
        data.insert("progress".into(), json!(progress));
        data.insert("details".into(), details.unwrap_or_else(|| json!({})));
        self.publish("progress.update", data, None, Some(session_id))
            .await
    }

    /// Convenience for dispatching a pre-built project id.
    pub async fn project_event_for(
        &self,
        project_id: &ProjectId,
        subtype: &str,
        data: Map<String, Value>,
        session_id: Option<&SessionId>,
    ) -> Result<(), BusError> {
        self.project_event(project_id.as_str(), subtype, data, session_id)
            .await
    }
}
