use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::instrument;

use forge_core::ids::{ProjectId, SessionId};
use forge_core::session::{ModificationRecord, ProjectContext, Role};
use forge_store::SessionStore;

use crate::error::EngineError;

/// Recent-history window exposed to classification and AI prompting.
const RECENT_MESSAGES: usize = 5;
/// Recent message content is truncated to this many characters.
const RECENT_CONTENT_CHARS: usize = 100;

const TECH_KEYWORDS: &[&str] = &[
    "react", "vue", "angular", "node", "python", "java", "spring", "django", "fastapi",
    "postgresql", "mysql", "mongodb", "redis", "docker", "kubernetes", "aws", "azure", "gcp",
];

const FEATURE_KEYWORDS: &[&str] = &[
    "authentication", "authorization", "api", "database", "frontend", "backend", "mobile",
    "responsive", "real-time", "chat", "payment", "search", "analytics", "dashboard", "admin",
];

const PROJECT_TYPE_KEYWORDS: &[&str] = &[
    "web app", "mobile app", "api", "microservice", "website", "platform", "system", "tool",
    "application",
];

const CREATE_KEYWORDS: &[&str] = &["create", "build", "make", "develop", "generate", "new"];
const MODIFY_KEYWORDS: &[&str] = &["change", "modify", "update", "add", "remove", "delete", "edit"];
const INFO_KEYWORDS: &[&str] = &["what", "how", "why", "when", "where", "status", "show", "list"];
const HELP_KEYWORDS: &[&str] = &["help", "guide", "tutorial", "example", "how to"];

/// Domain entities extracted from free text. Extraction never fails;
/// unmatched text yields empty sets.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExtractedEntities {
    pub technologies: Vec<String>,
    pub features: Vec<String>,
    pub project_types: Vec<String>,
}

/// One truncated message in the recent-conversation window.
#[derive(Clone, Debug, Serialize)]
pub struct RecentMessage {
    pub role: Role,
    pub content: String,
}

/// Compact project view inside the relevant context.
#[derive(Clone, Debug, Serialize)]
pub struct ProjectSummary {
    pub id: Option<ProjectId>,
    pub project_type: Option<String>,
    pub current_state: Map<String, Value>,
    pub requirements: Map<String, Value>,
    pub modification_count: usize,
}

/// The compact context view handed to classification and prompting.
#[derive(Clone, Debug, Serialize)]
pub struct RelevantContext {
    pub session_id: SessionId,
    pub message_count: usize,
    pub project: Option<ProjectSummary>,
    pub recent_conversation: Option<Vec<RecentMessage>>,
}

impl RelevantContext {
    pub fn empty(session_id: SessionId) -> Self {
        Self {
            session_id,
            message_count: 0,
            project: None,
            recent_conversation: None,
        }
    }

    pub fn has_project(&self) -> bool {
        self.project.is_some()
    }
}

/// Result of the lightweight keyword intent heuristic — distinct from,
/// and a fallback for, the pattern-based classifier.
#[derive(Clone, Debug, Serialize)]
pub struct HeuristicIntent {
    pub primary: &'static str,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<ExtractedEntities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_intent: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Derives compact context views from sessions and maintains the embedded
/// project context.
#[derive(Clone)]
pub struct ContextAggregator {
    store: SessionStore,
}

impl ContextAggregator {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Get the session's project context, creating it if absent.
    /// The session itself must already exist.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get_or_create_project_context(
        &self,
        session_id: &SessionId,
        project_id: Option<ProjectId>,
    ) -> Result<ProjectContext, EngineError> {
        let session = self
            .store
            .peek(session_id)?
            .ok_or_else(|| EngineError::NotFound(format!("session {session_id}")))?;

        if let Some(ctx) = session.project_context() {
            return Ok(ctx);
        }

        let ctx = ProjectContext::with_project_id(project_id);
        self.update_project_context(session_id, &ctx)?;
        Ok(ctx)
    }

    pub fn update_project_context(
        &self,
        session_id: &SessionId,
        ctx: &ProjectContext,
    ) -> Result<(), EngineError> {
        let mut update = Map::new();
        update.insert(
            forge_core::session::PROJECT_CONTEXT_KEY.to_string(),
            serde_json::to_value(ctx).map_err(forge_store::StoreError::from)?,
        );
        self.store.update_context(session_id, update)?;
        Ok(())
    }

    /// Record a modification, stamping it with the current time.
    pub fn add_modification(
        &self,
        session_id: &SessionId,
        request: &str,
        impact: Value,
        result: Value,
    ) -> Result<(), EngineError> {
        let mut ctx = self.get_or_create_project_context(session_id, None)?;
        ctx.modifications.push(ModificationRecord {
            request: request.to_string(),
            impact,
            result,
            timestamp: Utc::now(),
        });
        self.update_project_context(session_id, &ctx)
    }

    /// Merge the given entries into the project's current state.
    pub fn update_project_state(
        &self,
        session_id: &SessionId,
        state_update: Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut ctx = self.get_or_create_project_context(session_id, None)?;
        for (k, v) in state_update {
            ctx.current_state.insert(k, v);
        }
        self.update_project_context(session_id, &ctx)
    }

    /// Compact context for AI processing. A missing session yields an
    /// empty context, never an error. Lease-free read: display and
    /// classification paths must not extend the session TTL.
    pub fn relevant_context(
        &self,
        session_id: &SessionId,
        include_history: bool,
    ) -> Result<RelevantContext, EngineError> {
        let Some(session) = self.store.peek(session_id)? else {
            return Ok(RelevantContext::empty(session_id.clone()));
        };

        let project = session.project_context().map(|ctx| ProjectSummary {
            id: ctx.project_id.clone(),
            project_type: ctx.project_type.clone(),
            current_state: ctx.current_state.clone(),
            requirements: ctx.requirements.clone(),
            modification_count: ctx.modifications.len(),
        });

        let recent_conversation = include_history.then(|| {
            let tail_start = session.messages.len().saturating_sub(RECENT_MESSAGES);
            session.messages[tail_start..]
                .iter()
                .map(|m| RecentMessage {
                    role: m.role,
                    content: truncate_content(&m.content),
                })
                .collect()
        });

        Ok(RelevantContext {
            session_id: session_id.clone(),
            message_count: session.messages.len(),
            project,
            recent_conversation,
        })
    }

    /// Extract domain entities via fixed keyword lists. Case-insensitive
    /// substring match; no stemming.
    pub fn extract_entities(&self, text: &str) -> ExtractedEntities {
        let lower = text.to_lowercase();
        let collect = |keywords: &[&str]| {
            keywords
                .iter()
                .filter(|k| lower.contains(**k))
                .map(|k| k.to_string())
                .collect()
        };
        ExtractedEntities {
            technologies: collect(TECH_KEYWORDS),
            features: collect(FEATURE_KEYWORDS),
            project_types: collect(PROJECT_TYPE_KEYWORDS),
        }
    }

    /// Keyword intent heuristic over message + context.
    pub fn determine_intent(&self, message: &str, context: &RelevantContext) -> HeuristicIntent {
        let lower = message.to_lowercase();
        let contains_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

        if contains_any(CREATE_KEYWORDS) && !context.has_project() {
            return HeuristicIntent {
                primary: "PROJECT_CREATE",
                confidence: 0.9,
                entities: Some(self.extract_entities(message)),
                sub_intent: None,
                reason: None,
            };
        }

        if contains_any(MODIFY_KEYWORDS) && context.has_project() {
            return HeuristicIntent {
                primary: "PROJECT_MODIFY",
                confidence: 0.85,
                entities: Some(self.extract_entities(message)),
                sub_intent: None,
                reason: None,
            };
        }

        if contains_any(INFO_KEYWORDS) {
            return HeuristicIntent {
                primary: "INFORMATION_REQUEST",
                confidence: 0.8,
                entities: None,
                sub_intent: Some(if context.has_project() {
                    "project_info"
                } else {
                    "general_info"
                }),
                reason: None,
            };
        }

        if contains_any(HELP_KEYWORDS) {
            return HeuristicIntent {
                primary: "HELP_REQUEST",
                confidence: 0.9,
                entities: None,
                sub_intent: None,
                reason: None,
            };
        }

        HeuristicIntent {
            primary: "CLARIFICATION_NEEDED",
            confidence: 0.6,
            entities: None,
            sub_intent: None,
            reason: Some("Unable to determine clear intent"),
        }
    }
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() > RECENT_CONTENT_CHARS {
        let truncated: String = content.chars().take(RECENT_CONTENT_CHARS).collect();
        format!("{truncated}...")
    } else {
        content.to_string()
    }
}
