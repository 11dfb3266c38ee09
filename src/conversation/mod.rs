//! Conversation types and the intake stage machine
//!
//! An intake conversation walks a fixed script:
//! Name → Age → MedicalHistory → FreeForm. Each inbound message is fed to
//! [`ConversationState::advance`], a pure function that decides the reply and
//! the next state. Talking to the AI responder and persisting messages is the
//! job of [`crate::core::IntakeEngine`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canned replies for the scripted part of the intake
pub mod replies {
    pub const ASK_MEDICAL_HISTORY: &str = "Thank you. Do you have any past medical conditions? Please describe them or say 'none' if you don't have any.";

    pub const INVALID_AGE: &str = "Please enter a valid age (numbers only).";

    pub const INTAKE_COMPLETE: &str = "Thank you for providing your information. Now I can help you with any medical questions you might have. What would you like to know?";

    /// No AI provider is configured
    pub const AI_UNAVAILABLE: &str = "I'm sorry, but the AI service is currently unavailable. Please try again later.";

    /// The AI provider failed or returned nothing usable
    pub const AI_FALLBACK: &str = "I'm sorry, I'm having trouble processing your request right now. Please try again or consult with a healthcare professional.";

    pub fn greet(name: &str) -> String {
        format!("Nice to meet you, {}! What is your age?", name)
    }
}

/// A step of the intake script
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Name,
    Age,
    MedicalHistory,
    FreeForm,
}

impl Stage {
    /// All stages in script order
    pub const ORDER: [Stage; 4] = [Stage::Name, Stage::Age, Stage::MedicalHistory, Stage::FreeForm];

    /// The stage that follows this one. `FreeForm` is terminal.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Name => Some(Stage::Age),
            Stage::Age => Some(Stage::MedicalHistory),
            Stage::MedicalHistory => Some(Stage::FreeForm),
            Stage::FreeForm => None,
        }
    }

    /// Forward single-step transitions are the only legal moves.
    /// Going back to `Name` happens through [`ConversationState::reset`].
    pub fn can_transition_to(self, target: Stage) -> bool {
        self.next() == Some(target)
    }

    /// Wire name used in storage and JSON
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Name => "name",
            Stage::Age => "age",
            Stage::MedicalHistory => "medical_history",
            Stage::FreeForm => "free_form",
        }
    }
}

impl Default for Stage {
    fn default() -> Self {
        Stage::Name
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage name that does not belong to the intake script
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chat stage: {0:?}")]
pub struct UnknownStage(pub String);

impl FromStr for Stage {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownStage(s.to_string()))
    }
}

/// Per-user intake progress and the profile collected so far
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub stage: Stage,
    pub name: Option<String>,
    pub age: Option<i64>,
    pub medical_history: Option<String>,
}

/// Outcome of feeding one message to the stage machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Input accepted; the script moved to the next stage
    Advanced {
        state: ConversationState,
        reply: String,
    },

    /// Input failed validation; the stage is unchanged
    Rejected { reply: &'static str },

    /// Free-form question that must go to the AI responder
    Consult { inquiry: String },
}

impl ConversationState {
    /// Decide what to do with one inbound message.
    ///
    /// `input` is expected to be non-empty; it is trimmed before use.
    pub fn advance(&self, input: &str) -> Step {
        let input = input.trim();

        match self.stage {
            Stage::Name => {
                let name = input.to_string();
                let reply = replies::greet(&name);
                Step::Advanced {
                    state: self.moved_on(|s| s.name = Some(name)),
                    reply,
                }
            }
            Stage::Age => match parse_age(input) {
                Some(age) => Step::Advanced {
                    state: self.moved_on(|s| s.age = Some(age)),
                    reply: replies::ASK_MEDICAL_HISTORY.to_string(),
                },
                None => Step::Rejected {
                    reply: replies::INVALID_AGE,
                },
            },
            Stage::MedicalHistory => {
                let history = input.to_string();
                Step::Advanced {
                    state: self.moved_on(|s| s.medical_history = Some(history)),
                    reply: replies::INTAKE_COMPLETE.to_string(),
                }
            }
            Stage::FreeForm => Step::Consult {
                inquiry: input.to_string(),
            },
        }
    }

    /// Back to the first stage with an empty profile
    pub fn reset(&self) -> Self {
        Self::default()
    }

    fn moved_on(&self, record: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        record(&mut next);
        if let Some(stage) = self.stage.next() {
            debug_assert!(self.stage.can_transition_to(stage));
            next.stage = stage;
        }
        next
    }
}

/// Base-10 integer with an optional sign and nothing else around it.
/// Zero and negative values are accepted.
fn parse_age(input: &str) -> Option<i64> {
    input.parse::<i64>().ok()
}

/// One entry of the chat log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub user_id: i64,
    /// Shared by a user message and the bot reply it produced
    pub turn_id: Uuid,
    pub text: String,
    pub is_bot: bool,
    /// Stage that was active when the user's message was processed
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn from_user(user_id: i64, turn_id: Uuid, stage: Stage, text: impl Into<String>) -> Self {
        Self {
            user_id,
            turn_id,
            text: text.into(),
            is_bot: false,
            stage,
            timestamp: Utc::now(),
        }
    }

    pub fn from_bot(user_id: i64, turn_id: Uuid, stage: Stage, text: impl Into<String>) -> Self {
        Self {
            user_id,
            turn_id,
            text: text.into(),
            is_bot: true,
            stage,
            timestamp: Utc::now(),
        }
    }
}
