//! Coaching instructions for the built-in practice scenarios.

use std::fmt;

const BASE_INSTRUCTIONS: &str = "You are a helpful communication coach participating in a practice session.\n\
Be natural, conversational, and supportive.\n\
Provide constructive feedback when appropriate.\n\
Keep responses concise and focused.";

/// Built-in practice scenarios.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PracticeScenario {
    ConflictResolution,
    PerformanceReview,
    TeamStandup,
}

impl PracticeScenario {
    /// Scenario identifier as used by callers and the token endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConflictResolution => "conflict-resolution",
            Self::PerformanceReview => "performance-review",
            Self::TeamStandup => "team-standup",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conflict-resolution" => Some(Self::ConflictResolution),
            "performance-review" => Some(Self::PerformanceReview),
            "team-standup" => Some(Self::TeamStandup),
            _ => None,
        }
    }

    pub fn all() -> &'static [PracticeScenario] {
        &[
            Self::ConflictResolution,
            Self::PerformanceReview,
            Self::TeamStandup,
        ]
    }

    /// Role-play guidance appended to the base coaching prompt.
    fn role_play(&self) -> &'static str {
        match self {
            Self::ConflictResolution => {
                "You are playing the role of a team member in a conflict situation.\n\
                 Express frustration professionally and be open to finding solutions.\n\
                 Help the user practice active listening and de-escalation techniques."
            }
            Self::PerformanceReview => {
                "You are in a performance review discussion.\n\
                 Be receptive to feedback while also expressing your perspective.\n\
                 Help the user practice delivering constructive feedback effectively."
            }
            Self::TeamStandup => {
                "You are participating in a daily standup meeting.\n\
                 Share updates concisely and ask clarifying questions.\n\
                 Help the user practice facilitating efficient meetings."
            }
        }
    }
}

impl fmt::Display for PracticeScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compose the session instructions.
///
/// Unknown or missing scenario ids get the base coaching prompt. A cultural
/// context, when present, is appended on its own line.
pub fn instructions_for(scenario_id: Option<&str>, cultural_context: Option<&str>) -> String {
    let mut instructions = match scenario_id.and_then(PracticeScenario::parse) {
        Some(scenario) => format!("{BASE_INSTRUCTIONS}\n{}", scenario.role_play()),
        None => BASE_INSTRUCTIONS.to_string(),
    };

    if let Some(context) = cultural_context.map(str::trim).filter(|c| !c.is_empty()) {
        instructions.push_str("\nCultural context: ");
        instructions.push_str(context);
    }

    instructions
}
