use serde::{Deserialize, Serialize};

/// Dialogue progress for one session. Exactly one current value per
/// session, stored in session metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Initial,
    GatheringRequirements,
    ConfirmingDetails,
    Processing,
    AwaitingFeedback,
    Completed,
    Error,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::GatheringRequirements => "gathering_requirements",
            Self::ConfirmingDetails => "confirming_details",
            Self::Processing => "processing",
            Self::AwaitingFeedback => "awaiting_feedback",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ConversationState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "gathering_requirements" => Ok(Self::GatheringRequirements),
            "confirming_details" => Ok(Self::ConfirmingDetails),
            "processing" => Ok(Self::Processing),
            "awaiting_feedback" => Ok(Self::AwaitingFeedback),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown conversation state: {other}")),
        }
    }
}

/// Backend project-generation progress. Stored inside the session's
/// project context, independent of [`ConversationState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectState {
    NotStarted,
    Planning,
    InProgress,
    Modifying,
    Completed,
    Failed,
}

impl std::fmt::Display for ProjectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::Modifying => "modifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ProjectState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "planning" => Ok(Self::Planning),
            "in_progress" => Ok(Self::InProgress),
            "modifying" => Ok(Self::Modifying),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown project state: {other}")),
        }
    }
}
