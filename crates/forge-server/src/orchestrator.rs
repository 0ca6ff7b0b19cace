use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use forge_bus::{BusError, EventProducer};
use forge_core::ids::SessionId;
use forge_core::intent::Intent;
use forge_core::provider::ChatMessage;
use forge_core::session::Role;
use forge_core::state::{ConversationState, ProjectState};
use forge_engine::backend::{BackendProject, ProjectBackend};
use forge_engine::context::ContextAggregator;
use forge_engine::intent::IntentClassifier;
use forge_engine::state::StateTracker;
use forge_engine::EngineError;
use forge_llm::FallbackChain;
use forge_store::SessionStore;

use crate::frames::ServerFrame;
use crate::registry::ConnectionRegistry;

/// Default bound on a single AI generation.
const DEFAULT_AI_TIMEOUT: Duration = Duration::from_secs(60);

/// Event payloads carry at most this much of the raw message.
const EVENT_MESSAGE_CHARS: usize = 100;

/// Progress milestones pushed during project creation.
const CREATION_STEPS: &[(&str, f64)] = &[
    ("Analyzing requirements", 0.1),
    ("Setting up project structure", 0.3),
    ("Generating backend", 0.5),
    ("Generating frontend", 0.7),
    ("Setting up infrastructure", 0.9),
    ("Finalizing project", 1.0),
];

/// Result of one processed chat message.
#[derive(Clone, Debug)]
pub struct ChatOutcome {
    pub response: String,
    pub session_id: SessionId,
    pub intent: Intent,
    pub confidence: f64,
    pub message_count: usize,
    pub provider: String,
}

/// The message-processing façade: wires store, aggregator, classifier,
/// state machine, AI chain, backend, bus producer, and connection
/// registry into one pipeline.
///
/// Mutating work for a session is serialized through a per-session lock;
/// different sessions proceed in parallel.
pub struct Orchestrator {
    store: SessionStore,
    aggregator: ContextAggregator,
    classifier: IntentClassifier,
    tracker: StateTracker,
    ai: FallbackChain,
    backend: Arc<dyn ProjectBackend>,
    producer: Arc<EventProducer>,
    registry: Arc<ConnectionRegistry>,
    session_locks: DashMap<SessionId, Arc<Mutex<()>>>,
    ai_timeout: Duration,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: SessionStore,
        aggregator: ContextAggregator,
        classifier: IntentClassifier,
        tracker: StateTracker,
        ai: FallbackChain,
        backend: Arc<dyn ProjectBackend>,
        producer: Arc<EventProducer>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            store,
            aggregator,
            classifier,
            tracker,
            ai,
            backend,
            producer,
            registry,
            session_locks: DashMap::new(),
            ai_timeout: DEFAULT_AI_TIMEOUT,
        }
    }

    pub fn with_ai_timeout(mut self, timeout: Duration) -> Self {
        self.ai_timeout = timeout;
        self
    }

    pub fn ai_info(&self) -> forge_llm::ProviderInfo {
        self.ai.provider_info()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Session status surface: store stats plus both FSM positions.
    pub fn session_status(&self, session_id: &SessionId) -> Result<Value, EngineError> {
        let stats = self.store.stats(session_id)?;
        let summary = self.tracker.state_summary(session_id)?;
        let mut status = serde_json::to_value(&stats)
            .map_err(forge_store::StoreError::from)?
            .as_object()
            .cloned()
            .unwrap_or_default();
        status.insert("conversation_state".into(), json!(summary.conversation_state));
        status.insert("project_state".into(), json!(summary.project_state));
        Ok(Value::Object(status))
    }

    fn lock_for(&self, session_id: &SessionId) -> Arc<Mutex<()>> {
        self.session_locks
            .entry(session_id.clone())
            .or_default()
            .clone()
    }

    /// Process one inbound chat message end to end: classify, decide,
    /// transition, generate, append, publish.
    #[instrument(skip(self, text), fields(session_id = %session_id))]
    pub async fn process_message(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<ChatOutcome, EngineError> {
        if text.trim().is_empty() {
            return Err(EngineError::Validation("message must not be empty".into()));
        }

        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut received = Map::new();
        received.insert("message".into(), Value::String(head(text)));
        self.producer
            .conversation_event(session_id, "message.received", received)
            .await
            .map_err(bus_error)?;

        // Classify against the state before this message lands.
        let classification = self.classifier.classify(text, session_id)?;
        let action = self.tracker.next_action(session_id, classification.intent)?;

        let current = self.tracker.conversation_state(session_id)?;
        if action.next_state != current {
            let moved = self
                .tracker
                .transition(session_id, action.next_state, None)?;
            if !moved {
                warn!(
                    from = %current,
                    to = %action.next_state,
                    "decision table proposed an illegal transition"
                );
            }
        }

        // History excludes the message being processed.
        let history: Vec<ChatMessage> = self
            .store
            .history(session_id, None)?
            .iter()
            .map(ChatMessage::from)
            .collect();

        let mut user_meta = Map::new();
        user_meta.insert("intent".into(), json!(classification.intent));
        self.store
            .append_message(session_id, Role::User, text, user_meta)?;

        let reply = match tokio::time::timeout(self.ai_timeout, self.ai.generate(text, &history))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                return Err(self
                    .fail_conversation(session_id, &e.to_string(), e.into())
                    .await);
            }
            Err(_) => {
                let err = EngineError::external("ai-provider", "generation timed out");
                return Err(self
                    .fail_conversation(session_id, "generation timed out", err)
                    .await);
            }
        };

        let mut assistant_meta = Map::new();
        assistant_meta.insert("intent".into(), json!(classification.intent));
        assistant_meta.insert("confidence".into(), json!(classification.confidence));
        assistant_meta.insert("action".into(), json!(action.action));
        assistant_meta.insert("provider".into(), json!(reply.provider));
        self.store
            .append_message(session_id, Role::Assistant, &reply.text, assistant_meta)?;

        let mut generated = Map::new();
        generated.insert("response_length".into(), json!(reply.text.len()));
        generated.insert("intent".into(), json!(classification.intent));
        self.producer
            .conversation_event(session_id, "response.generated", generated)
            .await
            .map_err(bus_error)?;

        let message_count = history.len() + 2;
        info!(intent = %classification.intent, provider = %reply.provider, "message processed");

        Ok(ChatOutcome {
            response: reply.text,
            session_id: session_id.clone(),
            intent: classification.intent,
            confidence: classification.confidence,
            message_count,
            provider: reply.provider,
        })
    }

    /// Drive a project creation through the backend, publishing progress
    /// to the bus and pushing it to the session's live connections.
    #[instrument(skip(self, requirements), fields(session_id = %session_id))]
    pub async fn create_project(
        &self,
        session_id: &SessionId,
        requirements: Map<String, Value>,
    ) -> Result<BackendProject, EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        // Session must exist before a project can hang off it.
        self.aggregator.get_or_create_project_context(session_id, None)?;

        let mut started = Map::new();
        started.insert("requirements".into(), Value::Object(requirements.clone()));
        if let Some(ptype) = requirements.get("project_type") {
            started.insert("projectType".into(), ptype.clone());
        }
        self.producer
            .project_event("pending", "creation.started", started, Some(session_id))
            .await
            .map_err(bus_error)?;

        self.tracker
            .update_project_state(session_id, ProjectState::Planning, None)?;

        for (task, progress) in CREATION_STEPS {
            // Bus first, then fire-and-forget push to live connections.
            self.producer
                .progress_event(task, *progress, session_id, None)
                .await
                .map_err(bus_error)?;
            self.registry.send_to_session(
                session_id,
                &ServerFrame::Progress {
                    task: task.to_string(),
                    progress: *progress,
                },
            );
        }

        self.tracker
            .update_project_state(session_id, ProjectState::InProgress, None)?;

        let project = match self.backend.create_project(session_id, &requirements).await {
            Ok(project) => project,
            Err(e) => {
                return Err(self.fail_project(session_id, &requirements, e).await);
            }
        };

        let mut ctx = self
            .aggregator
            .get_or_create_project_context(session_id, Some(project.project_id.clone()))?;
        ctx.project_id = Some(project.project_id.clone());
        if ctx.project_type.is_none() {
            ctx.project_type = requirements
                .get("project_type")
                .and_then(|v| v.as_str())
                .map(String::from);
        }
        ctx.requirements = requirements.clone();
        self.aggregator.update_project_context(session_id, &ctx)?;

        let mut state_update = Map::new();
        state_update.insert("project_id".into(), json!(project.project_id.as_str()));
        state_update.insert("structure".into(), Value::Object(project.structure.clone()));
        state_update.insert("created_at".into(), json!(Utc::now().to_rfc3339()));
        self.aggregator.update_project_state(session_id, state_update)?;

        let validation = self
            .backend
            .validate_project(&project.project_id, "full")
            .await?;

        self.tracker
            .update_project_state(session_id, ProjectState::Completed, None)?;

        let mut completed = Map::new();
        completed.insert("status".into(), json!("success"));
        completed.insert("validation".into(), json!(validation.status));
        self.producer
            .project_event_for(&project.project_id, "creation.completed", completed, Some(session_id))
            .await
            .map_err(bus_error)?;

        info!(project_id = %project.project_id, "project created");
        Ok(project)
    }

    /// Drive a modification through the backend and record it.
    #[instrument(skip(self, change), fields(session_id = %session_id))]
    pub async fn modify_project(
        &self,
        session_id: &SessionId,
        change: &str,
    ) -> Result<(), EngineError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let ctx = self
            .aggregator
            .get_or_create_project_context(session_id, None)?;
        let project_id = ctx
            .project_id
            .ok_or_else(|| EngineError::NotFound("no active project for session".into()))?;

        self.tracker
            .update_project_state(session_id, ProjectState::Modifying, None)?;

        let modification = match self
            .backend
            .modify_project(session_id, &project_id, change)
            .await
        {
            Ok(m) => m,
            Err(e) => {
                let mut meta = Map::new();
                meta.insert("error".into(), json!(e.to_string()));
                self.tracker
                    .update_project_state(session_id, ProjectState::Failed, Some(meta))?;
                return Err(e);
            }
        };

        self.aggregator.add_modification(
            session_id,
            change,
            Value::Object(modification.impact.clone()),
            json!(modification.status),
        )?;

        self.tracker
            .update_project_state(session_id, ProjectState::Completed, None)?;

        info!(project_id = %project_id, "project modified");
        Ok(())
    }

    /// Mark the conversation errored and emit the error event. Returns the
    /// error to surface so callers can `return Err(...)` in one step.
    async fn fail_conversation(
        &self,
        session_id: &SessionId,
        reason: &str,
        err: EngineError,
    ) -> EngineError {
        let mut meta = Map::new();
        meta.insert("error".into(), json!(reason));
        // Never leave a session stuck in Processing; a false return here
        // means the edge was illegal from the current state, which is fine.
        match self
            .tracker
            .transition(session_id, ConversationState::Error, Some(meta))
        {
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to record error state"),
        }

        if let Err(e) = self
            .producer
            .error_event(
                "conversation_error",
                reason,
                Some(json!({"session_id": session_id.as_str()})),
                Some(session_id),
            )
            .await
        {
            warn!(error = %e, "failed to publish error event");
        }

        err
    }

    async fn fail_project(
        &self,
        session_id: &SessionId,
        requirements: &Map<String, Value>,
        err: EngineError,
    ) -> EngineError {
        let mut meta = Map::new();
        meta.insert("error".into(), json!(err.to_string()));
        if let Err(e) = self
            .tracker
            .update_project_state(session_id, ProjectState::Failed, Some(meta))
        {
            error!(error = %e, "failed to record failed project state");
        }

        let mut failed = Map::new();
        failed.insert("error".into(), json!(err.to_string()));
        failed.insert("requirements".into(), Value::Object(requirements.clone()));
        if let Err(e) = self
            .producer
            .project_event("unknown", "creation.failed", failed, Some(session_id))
            .await
        {
            warn!(error = %e, "failed to publish creation.failed event");
        }

        err
    }
}

fn bus_error(e: BusError) -> EngineError {
    EngineError::external("event-bus", e.to_string())
}

fn head(text: &str) -> String {
    text.chars().take(EVENT_MESSAGE_CHARS).collect()
}
