use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use forge_core::ids::SessionId;
use forge_core::intent::Intent;
use forge_core::session::STATE_UPDATED_AT_KEY;
use forge_core::state::{ConversationState, ProjectState};
use forge_store::SessionStore;

use crate::context::ContextAggregator;
use crate::error::EngineError;

/// A project is considered fully specified once it has this many
/// requirement entries (plus a type and a non-empty current state).
const MIN_REQUIREMENTS: usize = 3;

/// Legal non-self transitions (plus the noted self-loops) for the
/// conversation FSM. Anything absent here is rejected.
pub fn conversation_transitions(state: ConversationState) -> &'static [ConversationState] {
    use ConversationState::*;
    match state {
        Initial => &[GatheringRequirements, ConfirmingDetails, Error],
        // Gathering can loop while requirements trickle in.
        GatheringRequirements => &[ConfirmingDetails, GatheringRequirements, Error],
        // Back to gathering when confirmation surfaces gaps.
        ConfirmingDetails => &[Processing, GatheringRequirements, Error],
        Processing => &[AwaitingFeedback, Completed, Error],
        // Feedback can trigger more changes or a larger re-scope.
        AwaitingFeedback => &[Processing, Completed, GatheringRequirements, Error],
        Completed => &[GatheringRequirements, Initial],
        Error => &[Initial, GatheringRequirements],
    }
}

/// Decision produced by [`StateTracker::next_action`]. Pure data: the
/// caller is responsible for invoking `transition` when `next_state`
/// differs from the current state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NextAction {
    pub action: &'static str,
    pub next_state: ConversationState,
    pub message: &'static str,
}

/// Comprehensive state summary for one session.
#[derive(Clone, Debug, Serialize)]
pub struct StateSummary {
    pub conversation_state: ConversationState,
    pub project_state: ProjectState,
    pub has_active_project: bool,
    pub message_count: usize,
    pub session_duration: Option<f64>,
}

/// Tracks the two independent FSMs: conversation state (validated
/// transitions) and project state (unconditional merges).
#[derive(Clone)]
pub struct StateTracker {
    store: SessionStore,
    aggregator: ContextAggregator,
}

impl StateTracker {
    pub fn new(store: SessionStore, aggregator: ContextAggregator) -> Self {
        Self { store, aggregator }
    }

    /// Current conversation state; `Initial` for unknown sessions.
    pub fn conversation_state(&self, session_id: &SessionId) -> Result<ConversationState, EngineError> {
        Ok(self
            .store
            .peek(session_id)?
            .map(|s| s.conversation_state())
            .unwrap_or(ConversationState::Initial))
    }

    /// Current project state; `NotStarted` without a project.
    pub fn project_state(&self, session_id: &SessionId) -> Result<ProjectState, EngineError> {
        let context = self.aggregator.relevant_context(session_id, false)?;
        Ok(context
            .project
            .and_then(|p| {
                p.current_state
                    .get("state")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            })
            .unwrap_or(ProjectState::NotStarted))
    }

    /// Attempt a conversation-state transition. Returns false and mutates
    /// nothing when the edge is not in the transition table.
    #[instrument(skip(self, metadata), fields(session_id = %session_id, new_state = %new_state))]
    pub fn transition(
        &self,
        session_id: &SessionId,
        new_state: ConversationState,
        metadata: Option<Map<String, Value>>,
    ) -> Result<bool, EngineError> {
        let current = self.conversation_state(session_id)?;

        if !conversation_transitions(current).contains(&new_state) {
            warn!(
                from = %current,
                to = %new_state,
                "invalid conversation state transition"
            );
            return Ok(false);
        }

        let Some(mut session) = self.store.peek(session_id)? else {
            return Ok(false);
        };

        session.set_conversation_state(new_state);
        if let Some(extra) = metadata {
            for (k, v) in extra {
                session.metadata.insert(k, v);
            }
        }
        self.store.save(&session)?;

        info!(from = %current, to = %new_state, "conversation state transition");
        Ok(true)
    }

    /// Update project state. Unlike conversation transitions this is
    /// unconditional; it always merges into the project's current state.
    #[instrument(skip(self, metadata), fields(session_id = %session_id, new_state = %new_state))]
    pub fn update_project_state(
        &self,
        session_id: &SessionId,
        new_state: ProjectState,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), EngineError> {
        let mut update = Map::new();
        update.insert("state".into(), Value::String(new_state.to_string()));
        update.insert(
            STATE_UPDATED_AT_KEY.into(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        if let Some(extra) = metadata {
            for (k, v) in extra {
                update.insert(k, v);
            }
        }
        self.aggregator.update_project_state(session_id, update)?;
        info!(state = %new_state, "project state updated");
        Ok(())
    }

    /// Completeness predicate: do we still need more requirements?
    pub fn should_gather_more_info(&self, session_id: &SessionId) -> Result<bool, EngineError> {
        let context = self.aggregator.relevant_context(session_id, false)?;
        let Some(project) = context.project else {
            return Ok(true);
        };

        let has_type = project.project_type.as_deref().is_some_and(|t| !t.is_empty());
        let has_state = !project.current_state.is_empty();
        let enough_requirements = project.requirements.len() >= MIN_REQUIREMENTS;

        Ok(!(has_type && has_state && enough_requirements))
    }

    /// Decision table mapping (current conversation state, intent) to the
    /// next action. Never mutates state.
    pub fn next_action(
        &self,
        session_id: &SessionId,
        intent: Intent,
    ) -> Result<NextAction, EngineError> {
        let state = self.conversation_state(session_id)?;

        let action = match (state, intent) {
            (ConversationState::Initial, Intent::ProjectCreate) => NextAction {
                action: "gather_requirements",
                next_state: ConversationState::GatheringRequirements,
                message: "I'll help you create a new project. Can you tell me more about what you want to build?",
            },
            (ConversationState::Initial, Intent::Help) => NextAction {
                action: "provide_help",
                next_state: ConversationState::Initial,
                message: "I can help you create projects, modify existing ones, or answer questions.",
            },
            (ConversationState::GatheringRequirements, _) => {
                if self.should_gather_more_info(session_id)? {
                    NextAction {
                        action: "ask_clarification",
                        next_state: ConversationState::GatheringRequirements,
                        message: "I need more information to proceed.",
                    }
                } else {
                    NextAction {
                        action: "confirm_details",
                        next_state: ConversationState::ConfirmingDetails,
                        message: "Let me confirm the details before we proceed.",
                    }
                }
            }
            (ConversationState::ConfirmingDetails, _) => NextAction {
                action: "start_processing",
                next_state: ConversationState::Processing,
                message: "Great! I'll start creating your project now.",
            },
            // Identity action for every unmatched pair.
            (state, _) => NextAction {
                action: "continue_conversation",
                next_state: state,
                message: "How can I help you with your project?",
            },
        };

        Ok(action)
    }

    pub fn state_summary(&self, session_id: &SessionId) -> Result<StateSummary, EngineError> {
        let conversation_state = self.conversation_state(session_id)?;
        let project_state = self.project_state(session_id)?;
        let context = self.aggregator.relevant_context(session_id, false)?;

        let session_duration = self
            .store
            .peek(session_id)?
            .map(|s| (chrono::Utc::now() - s.created_at).num_milliseconds() as f64 / 1000.0);

        Ok(StateSummary {
            conversation_state,
            project_state,
            has_active_project: context.has_project(),
            message_count: context.message_count,
            session_duration,
        })
    }
}
