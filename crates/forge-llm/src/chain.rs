use std::sync::Arc;

use tracing::{info, warn};

use forge_core::errors::ProviderError;
use forge_core::provider::{AiProvider, ChatMessage};

/// How much conversation history is sent to providers.
const HISTORY_WINDOW: usize = 10;

const SYSTEM_PROMPT: &str = "\
You are the development assistant of a project-generation platform.\n\
Analyze the user's requirements and help them design web applications and services: \
suggest a suitable technology stack, sketch the project structure, and cover database, \
API, and security considerations.\n\
Answer in a friendly, professional tone, use markdown for readability, and ask follow-up \
questions whenever requirements are unclear.";

/// A successful chain generation, tagged with the provider that answered.
#[derive(Clone, Debug)]
pub struct ChainResponse {
    pub text: String,
    pub provider: String,
}

/// Health surface for the provider chain.
#[derive(Clone, Debug, serde::Serialize)]
pub struct ProviderInfo {
    pub current: Option<String>,
    pub available: Vec<String>,
}

/// Ordered provider fallback chain.
///
/// Providers are tried in construction order; an unavailable provider is
/// skipped without an attempt, and any provider error falls through to the
/// next one. The caller only sees an error when every provider has failed.
pub struct FallbackChain {
    providers: Vec<Arc<dyn AiProvider>>,
    system_prompt: String,
}

impl FallbackChain {
    pub fn new(providers: Vec<Arc<dyn AiProvider>>) -> Self {
        Self {
            providers,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Generate a reply for `user_message` given prior conversation history.
    pub async fn generate(
        &self,
        user_message: &str,
        history: &[ChatMessage],
    ) -> Result<ChainResponse, ProviderError> {
        let mut messages = Vec::with_capacity(history.len().min(HISTORY_WINDOW) + 2);
        messages.push(ChatMessage::system(&self.system_prompt));
        let tail_start = history.len().saturating_sub(HISTORY_WINDOW);
        messages.extend_from_slice(&history[tail_start..]);
        messages.push(ChatMessage::user(user_message));

        let mut last_error: Option<ProviderError> = None;

        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }
            match provider.generate(&messages).await {
                Ok(text) => {
                    info!(provider = provider.name(), "response generated");
                    return Ok(ChainResponse {
                        text,
                        provider: provider.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "provider failed, falling back");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Unavailable("no AI provider available".into())))
    }

    pub fn provider_info(&self) -> ProviderInfo {
        let available: Vec<String> = self
            .providers
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.name().to_string())
            .collect();
        ProviderInfo {
            current: available.first().cloned(),
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.providers.iter().any(|p| p.is_available())
    }
}
