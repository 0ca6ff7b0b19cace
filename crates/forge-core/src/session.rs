use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{MessageId, ProjectId, SessionId};
use crate::state::ConversationState;

/// Context key under which a session's project context is embedded.
pub const PROJECT_CONTEXT_KEY: &str = "project_context";
/// Metadata key holding the current conversation-state tag.
pub const CONVERSATION_STATE_KEY: &str = "conversation_state";
/// Metadata / current-state key holding the last transition timestamp.
pub const STATE_UPDATED_AT_KEY: &str = "state_updated_at";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One message in a session. Owned exclusively by its session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// A recorded project modification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModificationRecord {
    pub request: String,
    pub impact: Value,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

/// Project state embedded in a session's context under
/// [`PROJECT_CONTEXT_KEY`]. At most one per session.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: Option<ProjectId>,
    pub project_type: Option<String>,
    #[serde(default)]
    pub current_state: Map<String, Value>,
    #[serde(default)]
    pub requirements: Map<String, Value>,
    #[serde(default)]
    pub modifications: Vec<ModificationRecord>,
}

impl ProjectContext {
    pub fn with_project_id(project_id: Option<ProjectId>) -> Self {
        Self {
            project_id,
            ..Default::default()
        }
    }
}

/// The durable record of one user's ongoing conversation.
///
/// The message sequence is append-only; it is never reordered or truncated
/// except by deleting the whole session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            messages: Vec::new(),
            context: Map::new(),
            metadata: Map::new(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message and refresh last-activity.
    pub fn append(&mut self, message: Message) -> &Message {
        self.last_activity = Utc::now();
        self.messages.push(message);
        self.messages.last().expect("just pushed")
    }

    pub fn project_context(&self) -> Option<ProjectContext> {
        self.context
            .get(PROJECT_CONTEXT_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn has_project(&self) -> bool {
        self.context.contains_key(PROJECT_CONTEXT_KEY)
    }

    pub fn set_project_context(&mut self, ctx: &ProjectContext) {
        if let Ok(value) = serde_json::to_value(ctx) {
            self.context.insert(PROJECT_CONTEXT_KEY.to_string(), value);
        }
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.metadata
            .get(CONVERSATION_STATE_KEY)
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(ConversationState::Initial)
    }

    pub fn set_conversation_state(&mut self, state: ConversationState) {
        self.metadata.insert(
            CONVERSATION_STATE_KEY.to_string(),
            Value::String(state.to_string()),
        );
        self.metadata.insert(
            STATE_UPDATED_AT_KEY.to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut session = Session::new(SessionId::new());
        for i in 0..5 {
            session.append(Message::new(Role::User, format!("m{i}"), Map::new()));
        }
        let contents: Vec<&str> = session.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn append_refreshes_last_activity() {
        let mut session = Session::new(SessionId::new());
        let before = session.last_activity;
        session.append(Message::new(Role::User, "hi", Map::new()));
        assert!(session.last_activity >= before);
    }

    #[test]
    fn project_context_roundtrip() {
        let mut session = Session::new(SessionId::new());
        assert!(session.project_context().is_none());
        assert!(!session.has_project());

        let ctx = ProjectContext {
            project_id: Some(ProjectId::from_raw("proj_1")),
            project_type: Some("web app".into()),
            ..Default::default()
        };
        session.set_project_context(&ctx);

        assert!(session.has_project());
        let loaded = session.project_context().unwrap();
        assert_eq!(loaded.project_id.unwrap().as_str(), "proj_1");
        assert_eq!(loaded.project_type.as_deref(), Some("web app"));
    }

    #[test]
    fn conversation_state_defaults_to_initial() {
        let session = Session::new(SessionId::new());
        assert_eq!(session.conversation_state(), ConversationState::Initial);
    }

    #[test]
    fn conversation_state_set_and_read() {
        let mut session = Session::new(SessionId::new());
        session.set_conversation_state(ConversationState::GatheringRequirements);
        assert_eq!(
            session.conversation_state(),
            ConversationState::GatheringRequirements
        );
        assert!(session.metadata.contains_key(STATE_UPDATED_AT_KEY));
    }

    #[test]
    fn garbage_state_tag_falls_back_to_initial() {
        let mut session = Session::new(SessionId::new());
        session.metadata.insert(
            CONVERSATION_STATE_KEY.to_string(),
            Value::String("bogus".into()),
        );
        assert_eq!(session.conversation_state(), ConversationState::Initial);
    }

    #[test]
    fn session_serde_roundtrip() {
        let mut session = Session::new(SessionId::from_raw("sess_abc"));
        session.append(Message::new(Role::User, "create an app", Map::new()));
        session.set_conversation_state(ConversationState::GatheringRequirements);
        session.set_project_context(&ProjectContext::with_project_id(None));

        let json = serde_json::to_string(&session).unwrap();
        let parsed: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id.as_str(), "sess_abc");
        assert_eq!(parsed.messages.len(), 1);
        assert_eq!(
            parsed.conversation_state(),
            ConversationState::GatheringRequirements
        );
        assert!(parsed.has_project());
    }
}
