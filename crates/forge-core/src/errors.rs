use std::time::Duration;

/// Typed errors for AI provider operations.
/// Classifies failures so the fallback chain knows what is worth retrying
/// on the next provider versus what indicates a broken request.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider has no credentials or was never initialized.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ProviderError {
    /// Whether the same request might succeed against another provider.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::RateLimited { .. }
                | Self::Server { .. }
                | Self::Network(_)
                | Self::Timeout(_)
        )
    }

    /// Short classification string for logging and user-visible frames.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "provider_unavailable",
            Self::Auth(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
        }
    }

    /// Classify an HTTP status code into the appropriate variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Auth(body),
            400 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ProviderError::Unavailable("no key".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Server { status: 500, body: "err".into() }.is_retryable());
        assert!(ProviderError::Network("tcp".into()).is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(30)).is_retryable());
    }

    #[test]
    fn non_retryable_classification() {
        assert!(!ProviderError::Auth("bad key".into()).is_retryable());
        assert!(!ProviderError::InvalidRequest("bad".into()).is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(matches!(ProviderError::from_status(401, "x".into()), ProviderError::Auth(_)));
        assert!(matches!(ProviderError::from_status(403, "x".into()), ProviderError::Auth(_)));
        assert!(matches!(
            ProviderError::from_status(400, "x".into()),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            ProviderError::from_status(429, "x".into()),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(503, "x".into()),
            ProviderError::Server { status: 503, .. }
        ));
    }

    #[test]
    fn kind_strings_stable() {
        assert_eq!(ProviderError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(ProviderError::Unavailable("x".into()).kind(), "provider_unavailable");
        assert_eq!(
            ProviderError::RateLimited { retry_after: None }.kind(),
            "rate_limited"
        );
    }
}
