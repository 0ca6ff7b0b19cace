use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known event types carried on the bus. Producers may emit other
/// dot-namespaced types; these are the ones this engine consumes.
pub mod event_types {
    pub const PROJECT_UPDATED: &str = "project.updated";
    pub const PROJECT_GENERATION_COMPLETE: &str = "project.generation.complete";
    pub const PROJECT_CREATION_STARTED: &str = "project.creation.started";
    pub const PROJECT_CREATION_COMPLETED: &str = "project.creation.completed";
    pub const PROJECT_CREATION_FAILED: &str = "project.creation.failed";
    pub const VALIDATION_COMPLETE: &str = "validation.complete";
    pub const ERROR: &str = "error";
    pub const PROGRESS_UPDATE: &str = "progress.update";
    /// Matches every event in addition to its specific handlers.
    pub const WILDCARD: &str = "*";
}

/// The bus envelope: `{type, timestamp, source, data}`.
///
/// Fire-and-forget; never persisted by this engine. Session-scoped events
/// carry the session id in `data.sessionId`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BusEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl BusEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            data,
        }
    }

    /// Session id embedded in the payload, when session-scoped.
    pub fn session_id(&self) -> Option<&str> {
        self.data.get("sessionId").and_then(|v| v.as_str())
    }

    /// First dot-segment of the event type; used for topic routing.
    pub fn type_prefix(&self) -> &str {
        self.event_type
            .split('.')
            .next()
            .unwrap_or(&self.event_type)
    }
}
