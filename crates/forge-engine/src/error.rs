use forge_core::errors::ProviderError;
use forge_store::StoreError;

/// Error taxonomy for the orchestration engine.
///
/// Every user-visible failure carries a stable `kind()` plus a
/// human-readable message; internal detail never crosses the wire.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Session or project absent. Surfaced as a 404-equivalent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid state transition or malformed input. Surfaced, never
    /// silently corrected.
    #[error("validation error: {0}")]
    Validation(String),

    /// AI provider or project backend failure after any fallback.
    #[error("{service} error: {message}")]
    ExternalService { service: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// An individual event handler failed. Logged and isolated.
    #[error("handler error: {0}")]
    Handler(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::ExternalService { .. } => "external_service_error",
            Self::Store(e) => e.kind(),
            Self::Handler(_) => "handler_error",
        }
    }

    pub fn external(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(e: ProviderError) -> Self {
        Self::ExternalService {
            service: "ai-provider".into(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EngineError::NotFound("x".into()).kind(), "not_found");
        assert_eq!(EngineError::Validation("x".into()).kind(), "validation_error");
        assert_eq!(
            EngineError::external("mcp", "down").kind(),
            "external_service_error"
        );
        assert_eq!(EngineError::Handler("x".into()).kind(), "handler_error");
    }

    #[test]
    fn store_unavailable_kind_passes_through() {
        let err = EngineError::Store(StoreError::Unavailable("locked".into()));
        assert_eq!(err.kind(), "store_unavailable");
        let err = EngineError::Store(StoreError::NotFound("s".into()));
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn provider_error_maps_to_external_service() {
        let err: EngineError = ProviderError::Network("down".into()).into();
        assert_eq!(err.kind(), "external_service_error");
        assert!(err.to_string().contains("ai-provider"));
    }
}
