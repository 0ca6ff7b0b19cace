use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::instrument;

use forge_core::ids::{ProjectId, SessionId};

use crate::error::EngineError;

const SERVICE: &str = "project-backend";

/// Result of a backend project creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendProject {
    pub project_id: ProjectId,
    #[serde(default)]
    pub structure: Map<String, Value>,
}

/// Result of a backend modification request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendModification {
    pub status: String,
    #[serde(default)]
    pub impact: Map<String, Value>,
}

/// Result of a backend validation pass.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendValidation {
    pub status: String,
    #[serde(default)]
    pub issues: Vec<Value>,
}

/// The external code-generation backend (MCP server). Consumed purely
/// through this contract; failures surface as `ExternalService` errors.
#[async_trait]
pub trait ProjectBackend: Send + Sync {
    async fn create_project(
        &self,
        session_id: &SessionId,
        requirements: &Map<String, Value>,
    ) -> Result<BackendProject, EngineError>;

    async fn modify_project(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        change: &str,
    ) -> Result<BackendModification, EngineError>;

    async fn validate_project(
        &self,
        project_id: &ProjectId,
        scope: &str,
    ) -> Result<BackendValidation, EngineError>;
}

/// HTTP client for the MCP server.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, EngineError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::external(SERVICE, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::external(
                SERVICE,
                format!("status {status}: {body}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| EngineError::external(SERVICE, e.to_string()))
    }
}

#[async_trait]
impl ProjectBackend for HttpBackend {
    #[instrument(skip(self, requirements), fields(session_id = %session_id))]
    async fn create_project(
        &self,
        session_id: &SessionId,
        requirements: &Map<String, Value>,
    ) -> Result<BackendProject, EngineError> {
        let body = json!({
            "sessionId": session_id.as_str(),
            "requirements": requirements,
        });
        let value = self.post("/projects", body).await?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::external(SERVICE, format!("bad create response: {e}")))
    }

    #[instrument(skip(self, change), fields(session_id = %session_id, project_id = %project_id))]
    async fn modify_project(
        &self,
        session_id: &SessionId,
        project_id: &ProjectId,
        change: &str,
    ) -> Result<BackendModification, EngineError> {
        let body = json!({
            "sessionId": session_id.as_str(),
            "requestedChange": change,
        });
        let path = format!("/projects/{project_id}/modifications");
        let value = self.post(&path, body).await?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::external(SERVICE, format!("bad modify response: {e}")))
    }

    #[instrument(skip(self), fields(project_id = %project_id))]
    async fn validate_project(
        &self,
        project_id: &ProjectId,
        scope: &str,
    ) -> Result<BackendValidation, EngineError> {
        let body = json!({"validationScope": scope});
        let path = format!("/projects/{project_id}/validation");
        let value = self.post(&path, body).await?;
        serde_json::from_value(value)
            .map_err(|e| EngineError::external(SERVICE, format!("bad validation response: {e}")))
    }
}

/// Canned backend for tests: succeeds with a fixed project, or fails
/// every call when constructed with `failing`.
pub struct MockBackend {
    project_id: ProjectId,
    fail: bool,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            project_id: ProjectId::from_raw("proj_mock"),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            project_id: ProjectId::from_raw("proj_mock"),
            fail: true,
        }
    }

    fn check(&self) -> Result<(), EngineError> {
        if self.fail {
            Err(EngineError::external(SERVICE, "backend unreachable"))
        } else {
            Ok(())
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProjectBackend for MockBackend {
    async fn create_project(
        &self,
        _session_id: &SessionId,
        requirements: &Map<String, Value>,
    ) -> Result<BackendProject, EngineError> {
        self.check()?;
        let mut structure = Map::new();
        structure.insert("requirements".into(), Value::Object(requirements.clone()));
        Ok(BackendProject {
            project_id: self.project_id.clone(),
            structure,
        })
    }

    async fn modify_project(
        &self,
        _session_id: &SessionId,
        _project_id: &ProjectId,
        change: &str,
    ) -> Result<BackendModification, EngineError> {
        self.check()?;
        let mut impact = Map::new();
        impact.insert("requestedChange".into(), Value::String(change.into()));
        impact.insert("riskLevel".into(), Value::String("low".into()));
        Ok(BackendModification {
            status: "success".into(),
            impact,
        })
    }

    async fn validate_project(
        &self,
        _project_id: &ProjectId,
        _scope: &str,
    ) -> Result<BackendValidation, EngineError> {
        self.check()?;
        Ok(BackendValidation {
            status: "passed".into(),
            issues: Vec::new(),
        })
    }
}
