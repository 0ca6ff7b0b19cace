use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use forge_core::intent::Intent;

/// Inbound frames on the duplex session protocol.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        message: String,
        #[serde(default)]
        context: Option<Map<String, Value>>,
    },
    Ping,
    GetStatus,
}

/// Payload of a `chat_response` frame.
#[derive(Clone, Debug, Serialize)]
pub struct ChatResponseData {
    pub response: String,
    pub session_id: String,
    pub intent: Intent,
    pub confidence: f64,
    pub message_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Outbound frames. A closed set: every shape the engine can push to a
/// client is enumerated here.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Connected {
        session_id: String,
        timestamp: DateTime<Utc>,
    },
    ChatResponse {
        data: ChatResponseData,
    },
    Pong,
    Status {
        data: Value,
    },
    Progress {
        task: String,
        progress: f64,
    },
    ProjectUpdate {
        project_id: String,
        update_type: String,
        timestamp: DateTime<Utc>,
    },
    GenerationComplete {
        project_id: String,
        status: String,
        details: Value,
    },
    ValidationIssues {
        project_id: String,
        issues: Vec<Value>,
    },
    /// Stable machine-readable kind plus human-readable message.
    /// Internal details never ride on this frame.
    Error {
        kind: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","kind":"internal_error","message":"serialization failed"}"#.into()
        })
    }
}

/// Parse an inbound frame, mapping malformed input to an error frame.
pub fn parse_client_frame(raw: &str) -> Result<ClientFrame, ServerFrame> {
    serde_json::from_str(raw)
        .map_err(|_| ServerFrame::error("invalid_frame", "Invalid JSON format"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_frame_parses() {
        let frame = parse_client_frame(r#"{"type":"chat","message":"hello"}"#).unwrap();
        match frame {
            ClientFrame::Chat { message, context } => {
                assert_eq!(message, "hello");
                assert!(context.is_none());
            }
            other => panic!("expected chat, got {other:?}"),
        }
    }

    #[test]
    fn ping_and_status_frames_parse() {
        assert!(matches!(
            parse_client_frame(r#"{"type":"ping"}"#).unwrap(),
            ClientFrame::Ping
        ));
        assert!(matches!(
            parse_client_frame(r#"{"type":"get_status"}"#).unwrap(),
            ClientFrame::GetStatus
        ));
    }

    #[test]
    fn invalid_json_yields_error_frame() {
        let err = parse_client_frame("{not json").unwrap_err();
        let json = err.to_json();
        assert!(json.contains(r#""type":"error""#));
        assert!(json.contains("invalid_frame"));
    }

    #[test]
    fn unknown_frame_type_yields_error_frame() {
        assert!(parse_client_frame(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn server_frames_serialize_tagged() {
        let pong = ServerFrame::Pong.to_json();
        assert_eq!(pong, r#"{"type":"pong"}"#);

        let err = ServerFrame::error("not_found", "session missing").to_json();
        assert!(err.contains(r#""kind":"not_found""#));

        let progress = ServerFrame::Progress {
            task: "Generating backend".into(),
            progress: 0.5,
        }
        .to_json();
        assert!(progress.contains(r#""type":"progress""#));
        assert!(progress.contains("0.5"));
    }

    #[test]
    fn connected_frame_carries_session() {
        let frame = ServerFrame::Connected {
            session_id: "sess_1".into(),
            timestamp: Utc::now(),
        };
        let json = frame.to_json();
        assert!(json.contains(r#""type":"connected""#));
        assert!(json.contains("sess_1"));
    }
}
