use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::debug;

use forge_core::errors::ProviderError;
use forge_core::provider::{AiProvider, ChatMessage};

const API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".into(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// OpenAI chat-completions client (non-streaming).
pub struct OpenAiProvider {
    api_key: Option<SecretString>,
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<SecretString>, config: OpenAiConfig) -> Self {
        Self {
            api_key,
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .map(SecretString::from);
        Self::new(key, OpenAiConfig::default())
    }
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let key = self
            .api_key
            .as_ref()
            .ok_or_else(|| ProviderError::Unavailable("no OpenAI API key".into()))?;

        let turns: Vec<_> = messages
            .iter()
            .map(|m| json!({"role": m.role.to_string(), "content": m.content}))
            .collect();

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": turns,
        });

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(key.expose_secret())
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

        let text = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::InvalidRequest("empty completion".into()))?
            .to_string();

        debug!(model = %self.config.model, chars = text.len(), "openai response");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unkeyed_provider_is_unavailable() {
        let provider = OpenAiProvider::new(None, OpenAiConfig::default());
        assert!(!provider.is_available());
        assert_eq!(provider.name(), "openai");
    }

    #[tokio::test]
    async fn generate_without_key_errors() {
        let provider = OpenAiProvider::new(None, OpenAiConfig::default());
        let err = provider.generate(&[ChatMessage::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }
}
