//! Intake engine
//!
//! Drives one chat turn end to end:
//! 1. Serializes the turn against other requests of the same user
//! 2. Loads the user's conversation state
//! 3. Runs the stage machine, asking the AI responder in the free-form stage
//! 4. Logs the user message and the reply as one pair, saving the new state
//!    in the same transaction

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::conversation::{replies, ChatMessage, ConversationState, Stage, Step};
use crate::providers::Responder;

use super::db::StoreError;
use super::memory::{MessageStore, StoredMessage};
use super::prompt::PromptComposer;
use super::session::{SessionRecord, SessionStore};

/// Errors from the intake engine
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of one handled message
#[derive(Debug, Clone)]
pub struct Turn {
    /// State after the transition
    pub state: ConversationState,
    pub user_message: StoredMessage,
    pub bot_message: StoredMessage,
}

impl Turn {
    pub fn reply(&self) -> &str {
        &self.bot_message.message.text
    }

    pub fn stage(&self) -> Stage {
        self.state.stage
    }
}

pub struct IntakeEngine {
    messages: MessageStore,
    sessions: SessionStore,
    responder: Option<Arc<dyn Responder>>,
    composer: PromptComposer,
}

impl IntakeEngine {
    /// Without a responder every free-form question gets
    /// [`replies::AI_UNAVAILABLE`].
    pub fn new(
        messages: MessageStore,
        sessions: SessionStore,
        responder: Option<Arc<dyn Responder>>,
        composer: PromptComposer,
    ) -> Self {
        Self {
            messages,
            sessions,
            responder,
            composer,
        }
    }

    /// Handle a message for `user_id` using the stored state
    pub async fn process(&self, user_id: i64, raw: &str) -> Result<Turn, IntakeError> {
        let input = raw.trim();
        if input.is_empty() {
            return Err(IntakeError::EmptyMessage);
        }

        let _guard = self.sessions.lock(user_id).await;

        let state = self.sessions.load(user_id).await?;
        self.handle(user_id, &state, input).await
    }

    /// Run one transition and log the message pair.
    ///
    /// Both messages carry the stage that was active before the transition.
    /// A changed state is saved with the pair; if that commit fails nothing
    /// is written and the stored stage stays where it was.
    pub async fn handle(
        &self,
        user_id: i64,
        state: &ConversationState,
        input: &str,
    ) -> Result<Turn, IntakeError> {
        let stage = state.stage;
        let turn_id = Uuid::new_v4();
        let user_message = ChatMessage::from_user(user_id, turn_id, stage, input.trim());

        let (next, reply) = match state.advance(input) {
            Step::Advanced { state: next, reply } => {
                debug!(user_id, from = %stage, to = %next.stage, "Intake stage advanced");
                (next, reply)
            }
            Step::Rejected { reply } => {
                warn!(user_id, %stage, "Rejected intake answer");
                (state.clone(), reply.to_string())
            }
            Step::Consult { inquiry } => {
                let reply = self.answer(user_id, state, &inquiry).await;
                (state.clone(), reply)
            }
        };

        let bot_message = ChatMessage::from_bot(user_id, turn_id, stage, reply);

        let changed = (next != *state).then_some(&next);
        let (user_row, bot_row) = self
            .messages
            .append_pair(&user_message, &bot_message, changed)
            .await
            .map_err(|e| {
                error!(user_id, error = %e, "Failed to log chat turn");
                e
            })?;

        Ok(Turn {
            state: next,
            user_message: StoredMessage {
                id: user_row,
                message: user_message,
            },
            bot_message: StoredMessage {
                id: bot_row,
                message: bot_message,
            },
        })
    }

    /// One attempt at the AI responder; any failure becomes a canned reply
    async fn answer(&self, user_id: i64, profile: &ConversationState, inquiry: &str) -> String {
        let Some(responder) = &self.responder else {
            warn!(user_id, "No AI provider configured");
            return replies::AI_UNAVAILABLE.to_string();
        };

        let prompt = self.composer.compose(profile, inquiry);

        match responder.complete(&prompt).await {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!(user_id, provider = responder.name(), "AI provider returned empty text");
                replies::AI_FALLBACK.to_string()
            }
            Err(e) => {
                error!(user_id, provider = responder.name(), error = %e, "AI response error");
                replies::AI_FALLBACK.to_string()
            }
        }
    }

    /// Start the intake over. History is kept.
    pub async fn reset(&self, user_id: i64) -> Result<ConversationState, IntakeError> {
        let _guard = self.sessions.lock(user_id).await;

        let state = self.sessions.load(user_id).await?.reset();
        self.sessions.save(user_id, &state).await?;
        debug!(user_id, "Intake reset");

        Ok(state)
    }

    pub async fn state(&self, user_id: i64) -> Result<ConversationState, IntakeError> {
        Ok(self.sessions.load(user_id).await?)
    }

    pub async fn history(&self, user_id: i64) -> Result<Vec<StoredMessage>, IntakeError> {
        Ok(self.messages.list_by_user(user_id).await?)
    }

    pub async fn all_messages(&self) -> Result<Vec<StoredMessage>, IntakeError> {
        Ok(self.messages.list_all().await?)
    }

    /// Stored states joined with per-user message counts
    pub async fn users(&self) -> Result<Vec<(SessionRecord, i64)>, IntakeError> {
        let counts = self.messages.count_by_user().await?;
        let sessions = self.sessions.list().await?;

        Ok(sessions
            .into_iter()
            .map(|record| {
                let count = counts
                    .iter()
                    .find(|(user_id, _)| *user_id == record.user_id)
                    .map(|(_, count)| *count)
                    .unwrap_or(0);
                (record, count)
            })
            .collect())
    }

    /// Whether an AI provider is wired in
    pub fn has_responder(&self) -> bool {
        self.responder.is_some()
    }
}
