use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProviderError;
use crate::session::{Message, Role};

/// Flat role/content pair sent to AI providers.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&Message> for ChatMessage {
    fn from(m: &Message) -> Self {
        Self::new(m.role, m.content.clone())
    }
}

/// Capability interface implemented by each AI provider.
///
/// Providers are tried in a fixed preference order by the fallback chain;
/// `is_available` lets an unkeyed provider be skipped without an attempt.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn chat_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);
    }

    #[test]
    fn from_session_message() {
        let msg = Message::new(Role::Assistant, "sure, let's build it", Map::new());
        let chat: ChatMessage = (&msg).into();
        assert_eq!(chat.role, Role::Assistant);
        assert_eq!(chat.content, "sure, let's build it");
    }

    #[test]
    fn serde_roundtrip() {
        let chat = ChatMessage::user("hello");
        let json = serde_json::to_string(&chat).unwrap();
        assert!(json.contains(r#""role":"user""#));
        let parsed: ChatMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.content, "hello");
    }
}
