use regex::Regex;
use serde::Serialize;
use tracing::debug;

use forge_core::ids::SessionId;
use forge_core::intent::Intent;
use forge_core::session::Role;

use crate::context::{ContextAggregator, ExtractedEntities, RelevantContext};
use crate::error::EngineError;

/// Base score for any pattern match.
const PATTERN_SCORE: f64 = 0.7;
/// Context boost applied to create/modify when the project situation fits.
const CONTEXT_BOOST: f64 = 0.2;

const PROJECT_TYPE_PHRASES: &[&str] = &["web app", "mobile app", "api", "microservice", "website"];
const MODIFICATION_TYPES: &[&str] = &["add", "remove", "change", "update", "delete"];

/// Metadata attached to every classification.
#[derive(Clone, Debug, Serialize)]
pub struct IntentMetadata {
    pub intent: Intent,
    pub entities: ExtractedEntities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modification_type: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub confidence: f64,
    pub metadata: IntentMetadata,
}

/// Pattern-based intent classifier.
///
/// The pattern table is an ordered Vec, not a map: when two intents score
/// equally, the one declared first wins (`Intent` declaration order). This
/// tie-break is intentional and covered by tests.
pub struct IntentClassifier {
    aggregator: ContextAggregator,
    patterns: Vec<(Intent, Vec<Regex>)>,
}

impl IntentClassifier {
    pub fn new(aggregator: ContextAggregator) -> Self {
        Self {
            aggregator,
            patterns: build_patterns(),
        }
    }

    /// Classify a message for a session. Pure apart from reading context;
    /// never errors on malformed text (degrades to `Unknown`).
    pub fn classify(
        &self,
        message: &str,
        session_id: &SessionId,
    ) -> Result<Classification, EngineError> {
        let context = self.aggregator.relevant_context(session_id, true)?;
        Ok(self.classify_with_context(message, &context))
    }

    pub fn classify_with_context(
        &self,
        message: &str,
        context: &RelevantContext,
    ) -> Classification {
        let mut best: Option<(Intent, f64)> = None;

        for (intent, patterns) in &self.patterns {
            if !patterns.iter().any(|p| p.is_match(message)) {
                continue;
            }
            let mut score = PATTERN_SCORE;
            if *intent == Intent::ProjectModify && context.has_project() {
                score += CONTEXT_BOOST;
            } else if *intent == Intent::ProjectCreate && !context.has_project() {
                score += CONTEXT_BOOST;
            }
            // Strictly greater: equal scores keep the earlier intent.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*intent, score));
            }
        }

        let (intent, confidence) =
            best.unwrap_or_else(|| context_fallback(message, context));

        debug!(intent = %intent, confidence, "classified intent");

        Classification {
            intent,
            confidence,
            metadata: self.metadata_for(message, intent),
        }
    }

    fn metadata_for(&self, message: &str, intent: Intent) -> IntentMetadata {
        let lower = message.to_lowercase();
        let project_type = (intent == Intent::ProjectCreate)
            .then(|| {
                PROJECT_TYPE_PHRASES
                    .iter()
                    .find(|p| lower.contains(**p))
                    .map(|p| p.to_string())
            })
            .flatten();
        let modification_type = (intent == Intent::ProjectModify)
            .then(|| {
                MODIFICATION_TYPES
                    .iter()
                    .find(|m| lower.contains(**m))
                    .map(|m| m.to_string())
            })
            .flatten();

        IntentMetadata {
            intent,
            entities: self.aggregator.extract_entities(message),
            project_type,
            modification_type,
        }
    }
}

/// Classification when no pattern matched: short or follow-up messages are
/// treated as clarification, anything else is unknown.
fn context_fallback(message: &str, context: &RelevantContext) -> (Intent, f64) {
    let last_from_assistant = context
        .recent_conversation
        .as_ref()
        .and_then(|msgs| msgs.last())
        .is_some_and(|m| m.role == Role::Assistant);

    if last_from_assistant {
        (Intent::Clarification, 0.6)
    } else if message.split_whitespace().count() < 5 {
        (Intent::Clarification, 0.5)
    } else {
        (Intent::Unknown, 0.3)
    }
}

fn build_patterns() -> Vec<(Intent, Vec<Regex>)> {
    let compile = |patterns: &[&str]| {
        patterns
            .iter()
            .map(|p| Regex::new(p).expect("static intent pattern"))
            .collect()
    };

    // Order follows Intent declaration order; it is the tie-break.
    vec![
        (
            Intent::ProjectCreate,
            compile(&[
                r"(?i)\b(?:create|build|make|develop|generate|start)\s+(?:a\s+|an\s+)?(?:new\s+)?(?:\w+[ -]){0,2}(?:project|app|application|website|api|service)\b",
                r"(?i)\b(?:i\s+want|i\s+need|help\s+me)\s+(?:to\s+)?(?:create|build|make)\b",
                r"(?i)\b(?:new|fresh)\s+(?:\w+\s+)?(?:project|application|app)\b",
            ]),
        ),
        (
            Intent::ProjectModify,
            compile(&[
                r"(?i)\b(?:change|modify|update|add|remove|delete|edit)\s+(?:the\s+)?\w+",
                r"(?i)\b(?:can\s+you|please|i\s+want\s+to)\s+(?:change|modify|update)",
                r"(?i)\b(?:implement|integrate|include)\s+\w+\s+(?:feature|functionality)",
            ]),
        ),
        (
            Intent::ProjectInfo,
            compile(&[
                r"(?i)\b(?:show|display|what|get)\s+(?:me\s+)?(?:the\s+)?(?:status|info|information|details|project)\b",
                r"(?i)\b(?:current|existing)\s+(?:project|state|status)\b",
                r"(?i)\bproject\s+(?:details|info|status)\b",
            ]),
        ),
        (
            Intent::Help,
            compile(&[
                r"(?i)\b(?:help|guide|how\s+to|tutorial|example|what\s+can)\b",
                r"(?i)\b(?:explain|tell\s+me)\s+(?:about|how)\b",
                r"(?i)\b(?:i\s+don't\s+understand|confused|not\s+sure)\b",
            ]),
        ),
        (
            Intent::Greeting,
            compile(&[
                r"(?i)^(?:hi|hello|hey|greetings|good\s+(?:morning|afternoon|evening))[\s!]*$",
                r"(?i)^(?:how\s+are\s+you|what's\s+up)[\s?]*$",
            ]),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::ids::ProjectId;
    use forge_store::{Database, SessionStore};
    use serde_json::Map;

    fn setup() -> (SessionStore, ContextAggregator, IntentClassifier, SessionId) {
        let store = SessionStore::new(Database::in_memory().unwrap());
        let aggregator = ContextAggregator::new(store.clone());
        let classifier = IntentClassifier::new(aggregator.clone());
        let id = SessionId::from_raw("sess_intent");
        store.create(&id).unwrap();
        (store, aggregator, classifier, id)
    }

    #[test]
    fn create_without_project_scores_high() {
        let (_, _, classifier, id) = setup();
        let c = classifier.classify("Create a new web application", &id).unwrap();
        assert_eq!(c.intent, Intent::ProjectCreate);
        assert!(c.confidence >= 0.7, "confidence {}", c.confidence);
        assert_eq!(c.metadata.project_type.as_deref(), Some("web app"));
    }

    #[test]
    fn help_me_build_is_create() {
        let (_, _, classifier, id) = setup();
        let c = classifier.classify("Help me build an API", &id).unwrap();
        assert_eq!(c.intent, Intent::ProjectCreate);
    }

    #[test]
    fn modify_with_project_boosted() {
        let (_, aggregator, classifier, id) = setup();
        aggregator
            .get_or_create_project_context(&id, Some(ProjectId::from_raw("proj_1")))
            .unwrap();

        let c = classifier
            .classify("Change the database to PostgreSQL", &id)
            .unwrap();
        assert_eq!(c.intent, Intent::ProjectModify);
        assert!(c.confidence >= 0.85, "confidence {}", c.confidence);
        assert_eq!(c.metadata.modification_type.as_deref(), Some("change"));
        assert!(c
            .metadata
            .entities
            .technologies
            .contains(&"postgresql".to_string()));
    }

    #[test]
    fn greeting_classified() {
        let (_, _, classifier, id) = setup();
        let c = classifier.classify("Hello!", &id).unwrap();
        assert_eq!(c.intent, Intent::Greeting);
    }

    #[test]
    fn project_info_classified() {
        let (_, _, classifier, id) = setup();
        let c = classifier.classify("Show me the project status", &id).unwrap();
        assert_eq!(c.intent, Intent::ProjectInfo);
    }

    #[test]
    fn create_boost_disabled_when_project_exists() {
        let (_, aggregator, classifier, id) = setup();
        let c = classifier.classify("Create a new web application", &id).unwrap();
        assert!((c.confidence - 0.9).abs() < 1e-9);

        aggregator.get_or_create_project_context(&id, None).unwrap();
        let c = classifier.classify("Create a new web application", &id).unwrap();
        assert_eq!(c.intent, Intent::ProjectCreate);
        assert!((c.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn tie_broken_by_declaration_order() {
        // "add ... feature" style messages can match modify patterns while a
        // create pattern also fires; with no project in context both create
        // and a competing intent can land on the same score.
        let (_, _, classifier, id) = setup();
        // Matches ProjectModify ("update the docs") and Help ("guide").
        // Both score 0.7 (no project → no modify boost): ProjectModify is
        // declared earlier and must win.
        let c = classifier.classify("update the docs guide", &id).unwrap();
        assert_eq!(c.intent, Intent::ProjectModify);
        assert!((c.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn fallback_clarification_after_assistant_message() {
        let (store, _, classifier, id) = setup();
        store
            .append_message(&id, Role::Assistant, "Which database do you prefer?", Map::new())
            .unwrap();

        let c = classifier.classify("postgres sounds fine thanks a lot", &id).unwrap();
        assert_eq!(c.intent, Intent::Clarification);
        assert!((c.confidence - 0.6).abs() < 1e-9);
    }

    #[test]
    fn fallback_short_message_is_clarification() {
        let (_, _, classifier, id) = setup();
        let c = classifier.classify("yes that one", &id).unwrap();
        assert_eq!(c.intent, Intent::Clarification);
        assert!((c.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn fallback_long_unmatched_message_is_unknown() {
        let (_, _, classifier, id) = setup();
        let c = classifier
            .classify("the quick brown fox jumps over the lazy dog today", &id)
            .unwrap();
        assert_eq!(c.intent, Intent::Unknown);
        assert!((c.confidence - 0.3).abs() < 1e-9);
    }

    #[test]
    fn classification_never_fails_on_odd_input() {
        let (_, _, classifier, id) = setup();
        for weird in ["", "!!!", "日本語のメッセージです、プロジェクトなし", "\n\t"] {
            let c = classifier.classify(weird, &id).unwrap();
            assert!(c.confidence > 0.0 && c.confidence <= 1.0, "{weird:?}");
        }
    }

    #[test]
    fn metadata_always_includes_entities() {
        let (_, _, classifier, id) = setup();
        let c = classifier
            .classify("Create a new React web app service", &id)
            .unwrap();
        assert!(c.metadata.entities.technologies.contains(&"react".to_string()));
    }
}
