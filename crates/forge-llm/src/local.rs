use async_trait::async_trait;

use forge_core::errors::ProviderError;
use forge_core::provider::{AiProvider, ChatMessage};
use forge_core::session::Role;

/// Deterministic fallback provider. Always available; produces a canned
/// project-analysis reply so the conversation keeps moving when no remote
/// provider can be reached.
pub struct LocalProvider;

impl LocalProvider {
    fn reply_for(user_message: &str) -> String {
        let lower = user_message.to_lowercase();

        if lower.contains("shop") || lower.contains("e-commerce") || lower.contains("store") {
            return "I can set up an e-commerce project for you.\n\n\
                    Core features: product catalog, cart and checkout, payments, reviews, accounts.\n\
                    Suggested stack: React + TypeScript frontend, Spring Boot backend, PostgreSQL.\n\n\
                    Note: running in local mode — connect an AI provider for a deeper analysis.\n\
                    Shall I start creating the project?"
                .to_string();
        }

        if lower.contains("booking") || lower.contains("reservation") {
            return "A reservation management service — here is a first cut.\n\n\
                    Core features: availability calendar, booking flow, role-based access, \
                    confirmation notifications, usage statistics.\n\
                    Suggested stack: React frontend, Spring Boot + WebSocket backend, PostgreSQL.\n\n\
                    Note: running in local mode — connect an AI provider for a deeper analysis.\n\
                    What size of organization is this for?"
                .to_string();
        }

        format!(
            "Let me analyze \"{user_message}\".\n\n\
             Requirements captured; reviewing a suitable stack and architecture.\n\
             Suggested stack: React + TypeScript, Spring Boot, PostgreSQL, Docker.\n\n\
             Note: running in local mode — connect an AI provider (OpenAI or Anthropic) \
             for a more detailed analysis.\n\
             Tell me more about the specific features you need."
        )
    }
}

#[async_trait]
impl AiProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str());

        Ok(match last_user {
            Some(text) => Self::reply_for(text),
            None => "Hello! I'm the project assistant. What would you like to build?".to_string(),
        })
    }
}
