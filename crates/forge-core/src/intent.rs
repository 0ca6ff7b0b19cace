use serde::{Deserialize, Serialize};

/// What a user message is trying to accomplish.
///
/// Declaration order is load-bearing: when two intents tie on score, the
/// classifier picks the one declared first. Keep new variants at the end
/// unless the tie-break should change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ProjectCreate,
    ProjectModify,
    ProjectInfo,
    Clarification,
    GeneralQuery,
    Help,
    Greeting,
    Unknown,
}

impl Intent {
    /// All intents in declaration (tie-break) order.
    pub const ALL: [Intent; 8] = [
        Intent::ProjectCreate,
        Intent::ProjectModify,
        Intent::ProjectInfo,
        Intent::Clarification,
        Intent::GeneralQuery,
        Intent::Help,
        Intent::Greeting,
        Intent::Unknown,
    ];

    pub fn description(&self) -> &'static str {
        match self {
            Self::ProjectCreate => "Create a new project",
            Self::ProjectModify => "Modify existing project",
            Self::ProjectInfo => "Get project information",
            Self::Clarification => "Provide clarification",
            Self::GeneralQuery => "General question",
            Self::Help => "Request for help",
            Self::Greeting => "Greeting",
            Self::Unknown => "Unknown intent",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ProjectCreate => "project_create",
            Self::ProjectModify => "project_modify",
            Self::ProjectInfo => "project_info",
            Self::Clarification => "clarification",
            Self::GeneralQuery => "general_query",
            Self::Help => "help",
            Self::Greeting => "greeting",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Intent {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project_create" => Ok(Self::ProjectCreate),
            "project_modify" => Ok(Self::ProjectModify),
            "project_info" => Ok(Self::ProjectInfo),
            "clarification" => Ok(Self::Clarification),
            "general_query" => Ok(Self::GeneralQuery),
            "help" => Ok(Self::Help),
            "greeting" => Ok(Self::Greeting),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown intent: {other}")),
        }
    }
}
