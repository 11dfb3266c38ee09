//! Chat message log using SQLite
//!
//! Append-only: messages are never updated or deleted, and resetting a
//! conversation leaves its history in place. Listings follow insertion
//! order, which is the order turns were handled.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqlitePool};
use uuid::Uuid;

use crate::conversation::{ChatMessage, ConversationState, Stage};

use super::db::StoreError;
use super::session;

/// A logged message with its row id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(flatten)]
    pub message: ChatMessage,
}

type MessageRow = (i64, i64, String, String, bool, String, String);

impl TryFrom<MessageRow> for StoredMessage {
    type Error = StoreError;

    fn try_from(
        (id, user_id, turn_id, text, is_bot, stage, timestamp): MessageRow,
    ) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptMessage { id, reason };

        Ok(StoredMessage {
            id,
            message: ChatMessage {
                user_id,
                turn_id: Uuid::parse_str(&turn_id).map_err(|e| corrupt(e.to_string()))?,
                text,
                is_bot,
                stage: stage.parse::<Stage>().map_err(|e| corrupt(e.to_string()))?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| corrupt(e.to_string()))?,
            },
        })
    }
}

/// Message store for the chat log
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                turn_id TEXT NOT NULL,
                message TEXT NOT NULL,
                is_bot INTEGER NOT NULL DEFAULT 0,
                chat_stage TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_chat_messages_user
            ON chat_messages(user_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a user message and its bot reply in one transaction, saving
    /// the user's new conversation state in the same transaction when given.
    /// Either everything is written or nothing is.
    pub async fn append_pair(
        &self,
        user_message: &ChatMessage,
        bot_message: &ChatMessage,
        next_state: Option<&ConversationState>,
    ) -> Result<(i64, i64), StoreError> {
        let mut tx = self.pool.begin().await?;
        let user_id = insert(&mut *tx, user_message).await?;
        let bot_id = insert(&mut *tx, bot_message).await?;
        if let Some(state) = next_state {
            session::upsert(&mut *tx, user_message.user_id, state).await?;
        }
        tx.commit().await?;

        Ok((user_id, bot_id))
    }

    /// All messages of one user, oldest first
    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, turn_id, message, is_bot, chat_stage, timestamp
            FROM chat_messages
            WHERE user_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    /// Every message in the log, oldest first
    pub async fn list_all(&self) -> Result<Vec<StoredMessage>, StoreError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, turn_id, message, is_bot, chat_stage, timestamp
            FROM chat_messages
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    /// Number of logged messages per user
    pub async fn count_by_user(&self) -> Result<Vec<(i64, i64)>, StoreError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*)
            FROM chat_messages
            GROUP BY user_id
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

async fn insert<'e, E>(executor: E, message: &ChatMessage) -> Result<i64, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    // Nanosecond precision so a message reads back exactly as written
    let timestamp = message
        .timestamp
        .to_rfc3339_opts(SecondsFormat::Nanos, true);

    let result = sqlx::query(
        r#"
        INSERT INTO chat_messages (user_id, turn_id, message, is_bot, chat_stage, timestamp)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(message.user_id)
    .bind(message.turn_id.to_string())
    .bind(&message.text)
    .bind(message.is_bot)
    .bind(message.stage.as_str())
    .bind(timestamp)
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use tokio_test::assert_ok;

    async fn store() -> MessageStore {
        let pool = db::open_in_memory().await.unwrap();
        MessageStore::new(pool).await.unwrap()
    }

    #[tokio::test]
    async fn test_append_pair_keeps_order() {
        let store = store().await;
        let turn = Uuid::new_v4();
        let user = ChatMessage::from_user(7, turn, Stage::Age, "thirty");
        let bot = ChatMessage::from_bot(7, turn, Stage::Age, "Please enter a valid age (numbers only).");

        let (user_id, bot_id) = store.append_pair(&user, &bot, None).await.unwrap();
        assert!(bot_id > user_id);

        let messages = store.list_by_user(7).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, user);
        assert_eq!(messages[1].message, bot);
    }

    #[tokio::test]
    async fn test_failed_reply_drops_the_whole_pair() {
        let pool = db::open_in_memory().await.unwrap();
        let store = MessageStore::new(pool.clone()).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_bot_rows BEFORE INSERT ON chat_messages \
             WHEN NEW.is_bot = 1 BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let turn = Uuid::new_v4();
        let result = store
            .append_pair(
                &ChatMessage::from_user(4, turn, Stage::Name, "Alice"),
                &ChatMessage::from_bot(4, turn, Stage::Name, "Nice to meet you, Alice! What is your age?"),
                None,
            )
            .await;

        assert!(matches!(result, Err(StoreError::Database(_))));
        assert!(store.list_by_user(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_per_user() {
        let store = store().await;

        for user_id in [1, 2, 2] {
            let turn = Uuid::new_v4();
            assert_ok!(
                store
                    .append_pair(
                        &ChatMessage::from_user(user_id, turn, Stage::Name, "hi"),
                        &ChatMessage::from_bot(user_id, turn, Stage::Name, "Nice to meet you, hi! What is your age?"),
                        None,
                    )
                    .await
            );
        }

        assert_eq!(store.list_by_user(1).await.unwrap().len(), 2);
        assert_eq!(store.list_by_user(2).await.unwrap().len(), 4);
        assert!(store.list_by_user(3).await.unwrap().is_empty());
        assert_eq!(store.list_all().await.unwrap().len(), 6);
        assert_eq!(store.count_by_user().await.unwrap(), vec![(1, 2), (2, 4)]);
    }

    #[tokio::test]
    async fn test_corrupt_stage_is_reported() {
        let pool = db::open_in_memory().await.unwrap();
        let store = MessageStore::new(pool.clone()).await.unwrap();

        sqlx::query(
            "INSERT INTO chat_messages (user_id, turn_id, message, is_bot, chat_stage, timestamp) \
             VALUES (1, ?, 'hello', 0, 'greeting', '2024-01-01T00:00:00.000000000Z')",
        )
        .bind(Uuid::new_v4().to_string())
        .execute(&pool)
        .await
        .unwrap();

        let err = store.list_by_user(1).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptMessage { .. }));
    }
}
