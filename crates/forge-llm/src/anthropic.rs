use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use forge_core::errors::ProviderError;
use forge_core::provider::{AiProvider, ChatMessage};
use forge_core::session::Role;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone, Debug)]
pub struct AnthropicConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Anthropic messages API client (non-streaming).
pub struct AnthropicProvider {
    api_key: Option<SecretString>,
    config: AnthropicConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: Option<SecretString>, config: AnthropicConfig) -> Self {
        Self {
            api_key,
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let key = std::env::var("ANTHROPIC_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        Self::new(key, AnthropicConfig::default())
    }
}

#[async_trait]
impl AiProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable("no Anthropic API key".into()))?;

        // System turns are carried in the dedicated `system` field.
        let system: String = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let turns: Vec<_> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": system,
            "messages": turns,
        });

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let parsed: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let text = parsed["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidRequest("empty completion".into()))?
            .to_string();

        debug!(model = %self.config.model, chars = text.len(), "anthropic response");
        Ok(text)
    }
}
