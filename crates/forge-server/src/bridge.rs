use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use forge_bus::{BusError, EventConsumer, FnHandler};
use forge_core::events::{event_types, BusEvent};
use forge_core::ids::SessionId;
use forge_core::session::Role;
use forge_core::state::ProjectState;
use forge_engine::context::ContextAggregator;
use forge_engine::state::StateTracker;
use forge_store::SessionStore;

use crate::frames::ServerFrame;
use crate::registry::ConnectionRegistry;

/// Shared services the bridge handlers close over.
#[derive(Clone)]
struct BridgeState {
    store: SessionStore,
    tracker: StateTracker,
    aggregator: ContextAggregator,
    registry: Arc<ConnectionRegistry>,
}

/// Install the inbound-event handlers that turn bus events into session
/// state changes and WebSocket pushes.
///
/// Handlers tolerate missing fields and duplicate delivery; an incomplete
/// event is logged and skipped rather than failing the dispatch.
pub fn register_event_handlers(
    consumer: &EventConsumer,
    store: SessionStore,
    tracker: StateTracker,
    aggregator: ContextAggregator,
    registry: Arc<ConnectionRegistry>,
) {
    let state = BridgeState {
        store,
        tracker,
        aggregator,
        registry,
    };

    {
        let state = state.clone();
        consumer.register_handler(
            event_types::PROJECT_UPDATED,
            Arc::new(FnHandler(move |event: BusEvent| {
                let state = state.clone();
                async move { handle_project_update(&state, &event) }
            })),
        );
    }

    {
        let state = state.clone();
        consumer.register_handler(
            event_types::PROJECT_GENERATION_COMPLETE,
            Arc::new(FnHandler(move |event: BusEvent| {
                let state = state.clone();
                async move { handle_generation_complete(&state, &event) }
            })),
        );
    }

    {
        let state = state.clone();
        consumer.register_handler(
            event_types::VALIDATION_COMPLETE,
            Arc::new(FnHandler(move |event: BusEvent| {
                let state = state.clone();
                async move { handle_validation_result(&state, &event) }
            })),
        );
    }

    {
        let state = state.clone();
        consumer.register_handler(
            event_types::ERROR,
            Arc::new(FnHandler(move |event: BusEvent| {
                let state = state.clone();
                async move { handle_error_event(&state, &event) }
            })),
        );
    }

    {
        let state = state.clone();
        consumer.register_handler(
            event_types::PROGRESS_UPDATE,
            Arc::new(FnHandler(move |event: BusEvent| {
                let state = state.clone();
                async move { handle_progress_update(&state, &event) }
            })),
        );
    }

    consumer.register_handler(
        event_types::WILDCARD,
        Arc::new(FnHandler(|event: BusEvent| async move {
            debug!(event_type = %event.event_type, "event received");
            Ok(())
        })),
    );

    info!("event handlers registered");
}

fn session_of(event: &BusEvent) -> Option<SessionId> {
    event.session_id().map(SessionId::from_raw)
}

fn str_field<'a>(event: &'a BusEvent, key: &str) -> Option<&'a str> {
    event.data.get(key).and_then(|v| v.as_str())
}

fn handle_project_update(state: &BridgeState, event: &BusEvent) -> Result<(), BusError> {
    let (Some(project_id), Some(update_type), Some(session_id)) = (
        str_field(event, "projectId"),
        str_field(event, "updateType"),
        session_of(event),
    ) else {
        warn!("incomplete project update event");
        return Ok(());
    };

    let mut update = Map::new();
    update.insert("last_update".into(), json!(Utc::now().to_rfc3339()));
    update.insert("update_type".into(), json!(update_type));
    update.insert("update_details".into(), Value::Object(event.data.clone()));
    state
        .aggregator
        .update_project_state(&session_id, update)
        .map_err(|e| BusError::Handler(e.to_string()))?;

    state.registry.send_to_session(
        &session_id,
        &ServerFrame::ProjectUpdate {
            project_id: project_id.to_string(),
            update_type: update_type.to_string(),
            timestamp: Utc::now(),
        },
    );
    Ok(())
}

fn handle_generation_complete(state: &BridgeState, event: &BusEvent) -> Result<(), BusError> {
    let Some(session_id) = session_of(event) else {
        warn!("generation complete event without session");
        return Ok(());
    };
    let project_id = str_field(event, "projectId").unwrap_or("unknown");
    let status = str_field(event, "status").unwrap_or("failed");

    let updated = if status == "success" {
        state
            .tracker
            .update_project_state(&session_id, ProjectState::Completed, None)
    } else {
        let mut meta = Map::new();
        if let Some(error) = event.data.get("error") {
            meta.insert("error".into(), error.clone());
        }
        state
            .tracker
            .update_project_state(&session_id, ProjectState::Failed, Some(meta))
    };
    updated.map_err(|e| BusError::Handler(e.to_string()))?;

    state.registry.send_to_session(
        &session_id,
        &ServerFrame::GenerationComplete {
            project_id: project_id.to_string(),
            status: status.to_string(),
            details: Value::Object(event.data.clone()),
        },
    );
    Ok(())
}

fn handle_validation_result(state: &BridgeState, event: &BusEvent) -> Result<(), BusError> {
    let Some(session_id) = session_of(event) else {
        return Ok(());
    };
    let project_id = str_field(event, "projectId").unwrap_or("unknown");
    let results = event.data.get("results").cloned().unwrap_or(json!({}));
    let issues: Vec<Value> = results
        .get("issues")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let mut update = Map::new();
    update.insert(
        "last_validation".into(),
        json!({
            "type": str_field(event, "validationType"),
            "status": results.get("status"),
            "timestamp": Utc::now().to_rfc3339(),
            "issues": issues,
        }),
    );
    state
        .aggregator
        .update_project_state(&session_id, update)
        .map_err(|e| BusError::Handler(e.to_string()))?;

    if !issues.is_empty() {
        state.registry.send_to_session(
            &session_id,
            &ServerFrame::ValidationIssues {
                project_id: project_id.to_string(),
                issues,
            },
        );
    }
    Ok(())
}

fn handle_error_event(state: &BridgeState, event: &BusEvent) -> Result<(), BusError> {
    let Some(session_id) = session_of(event) else {
        return Ok(());
    };
    let error_type = str_field(event, "errorType").unwrap_or("unknown");
    let message = str_field(event, "message").unwrap_or("unknown error");

    let mut meta = Map::new();
    meta.insert("error_type".into(), json!(error_type));
    state
        .store
        .append_message(
            &session_id,
            Role::System,
            &format!("An error occurred: {message}"),
            meta,
        )
        .map_err(|e| BusError::Handler(e.to_string()))?;

    state.registry.send_to_session(
        &session_id,
        &ServerFrame::error(error_type, message),
    );
    Ok(())
}

fn handle_progress_update(state: &BridgeState, event: &BusEvent) -> Result<(), BusError> {
    let Some(session_id) = session_of(event) else {
        return Ok(());
    };
    let task = str_field(event, "task").unwrap_or("").to_string();
    let progress = event
        .data
        .get("progress")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    state
        .registry
        .send_to_session(&session_id, &ServerFrame::Progress { task, progress });
    Ok(())
}
