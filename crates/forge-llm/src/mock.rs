use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use forge_core::errors::ProviderError;
use forge_core::provider::{AiProvider, ChatMessage};

/// Pre-programmed replies for deterministic testing without API calls.
#[derive(Clone)]
pub enum MockReply {
    Text(String),
    Error(ProviderError),
    /// Wait a duration, then yield the inner reply.
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delayed(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed replies in sequence.
pub struct MockProvider {
    name: String,
    available: bool,
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            name: "mock".into(),
            available: true,
            replies,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn named(name: &str, replies: Vec<MockReply>) -> Self {
        Self {
            name: name.into(),
            ..Self::new(replies)
        }
    }

    /// A provider that reports itself unavailable (e.g. unkeyed).
    pub fn unavailable(name: &str) -> Self {
        Self {
            name: name.into(),
            available: false,
            replies: Vec::new(),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available
    }

    async fn generate(&self, _messages: &[ChatMessage]) -> Result<String, ProviderError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);

        let Some(reply) = self.replies.get(idx) else {
            return Err(ProviderError::InvalidRequest(format!(
                "MockProvider: no reply configured for call {idx}"
            )));
        };

        let mut current = reply.clone();
        loop {
            match current {
                MockReply::Text(text) => return Ok(text),
                MockReply::Error(e) => return Err(e),
                MockReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    current = *inner;
                }
            }
        }
    }
}
