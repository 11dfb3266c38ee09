//! Per-user conversation state kept between requests
//!
//! The state lives in SQLite so it survives restarts. Requests from the same
//! user must not interleave their load → handle → save sequence, so the store
//! also hands out one async lock per user.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sqlx::sqlite::{Sqlite, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::conversation::{ConversationState, Stage};

use super::db::StoreError;

/// Stored state of one user, as listed for the admin view
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub user_id: i64,
    #[serde(flatten)]
    pub state: ConversationState,
    pub updated_at: String,
}

type StateRow = (String, Option<String>, Option<i64>, Option<String>);

type LockMap = SyncMutex<HashMap<i64, Arc<Mutex<()>>>>;

pub struct SessionStore {
    pool: SqlitePool,
    locks: LockMap,
}

/// Held while one user's turn is in progress.
///
/// Dropping it releases the user and forgets their lock once no other
/// request is waiting on it, so the map only holds users with work in flight.
pub struct UserLock<'a> {
    user_id: i64,
    locks: &'a LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for UserLock<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = lock_map(self.locks);
        let idle = locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1);
        if idle {
            locks.remove(&self.user_id);
        }
    }
}

// Only touched in short sections that cannot panic
fn lock_map(locks: &LockMap) -> MutexGuard<'_, HashMap<i64, Arc<Mutex<()>>>> {
    locks.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionStore {
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversation_states (
                user_id INTEGER PRIMARY KEY,
                stage TEXT NOT NULL,
                name TEXT,
                age INTEGER,
                medical_history TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            locks: SyncMutex::new(HashMap::new()),
        })
    }

    /// Exclusive access to one user's conversation until the guard drops
    pub async fn lock(&self, user_id: i64) -> UserLock<'_> {
        let lock = lock_map(&self.locks).entry(user_id).or_default().clone();

        // Built before waiting so a cancelled wait still cleans up its entry
        let mut held = UserLock {
            user_id,
            locks: &self.locks,
            guard: None,
        };
        held.guard = Some(lock.lock_owned().await);
        held
    }

    /// Current state, or a fresh one if the user has never chatted
    pub async fn load(&self, user_id: i64) -> Result<ConversationState, StoreError> {
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            SELECT stage, name, age, medical_history
            FROM conversation_states
            WHERE user_id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => decode_state(user_id, row),
            None => Ok(ConversationState::default()),
        }
    }

    pub async fn save(&self, user_id: i64, state: &ConversationState) -> Result<(), StoreError> {
        Ok(upsert(&self.pool, user_id, state).await?)
    }

    /// States of every user who has chatted, most recently active first
    pub async fn list(&self) -> Result<Vec<SessionRecord>, StoreError> {
        let rows: Vec<(i64, String, Option<String>, Option<i64>, Option<String>, String)> =
            sqlx::query_as(
                r#"
                SELECT user_id, stage, name, age, medical_history, updated_at
                FROM conversation_states
                ORDER BY updated_at DESC
                "#,
            )
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|(user_id, stage, name, age, history, updated_at)| {
                Ok(SessionRecord {
                    user_id,
                    state: decode_state(user_id, (stage, name, age, history))?,
                    updated_at,
                })
            })
            .collect()
    }
}

/// Insert or replace one user's state on any executor, so a turn can save
/// it inside the transaction that logs its messages
pub(super) async fn upsert<'e, E>(
    executor: E,
    user_id: i64,
    state: &ConversationState,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO conversation_states (user_id, stage, name, age, medical_history, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id) DO UPDATE SET
            stage = excluded.stage,
            name = excluded.name,
            age = excluded.age,
            medical_history = excluded.medical_history,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(user_id)
    .bind(state.stage.as_str())
    .bind(&state.name)
    .bind(state.age)
    .bind(&state.medical_history)
    .bind(now())
    .execute(executor)
    .await?;

    Ok(())
}

fn decode_state(
    user_id: i64,
    (stage, name, age, medical_history): StateRow,
) -> Result<ConversationState, StoreError> {
    let stage = stage
        .parse::<Stage>()
        .map_err(|source| StoreError::CorruptState { user_id, source })?;

    Ok(ConversationState {
        stage,
        name,
        age,
        medical_history,
    })
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db;
    use std::time::Duration;

    async fn store() -> (SqlitePool, SessionStore) {
        let pool = db::open_in_memory().await.unwrap();
        let store = SessionStore::new(pool.clone()).await.unwrap();
        (pool, store)
    }

    #[tokio::test]
    async fn test_unknown_user_starts_at_name() {
        let (_, store) = store().await;
        let state = store.load(42).await.unwrap();
        assert_eq!(state, ConversationState::default());
        assert_eq!(state.stage, Stage::Name);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_, store) = store().await;
        let state = ConversationState {
            stage: Stage::MedicalHistory,
            name: Some("Alice".to_string()),
            age: Some(30),
            medical_history: None,
        };

        store.save(1, &state).await.unwrap();
        assert_eq!(store.load(1).await.unwrap(), state);

        let advanced = ConversationState {
            stage: Stage::FreeForm,
            medical_history: Some("none".to_string()),
            ..state
        };
        store.save(1, &advanced).await.unwrap();
        assert_eq!(store.load(1).await.unwrap(), advanced);
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_stage_is_an_integrity_error() {
        let (pool, store) = store().await;
        sqlx::query(
            "INSERT INTO conversation_states (user_id, stage, updated_at) VALUES (5, 'chit_chat', '2024-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = store.load(5).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptState { user_id: 5, .. }));
    }

    #[tokio::test]
    async fn test_lock_is_per_user() {
        let (_, store) = store().await;

        let guard = store.lock(1).await;

        // Another user is not blocked
        let other = tokio::time::timeout(Duration::from_millis(100), store.lock(2)).await;
        assert!(other.is_ok());

        // The same user is
        let same = tokio::time::timeout(Duration::from_millis(50), store.lock(1)).await;
        assert!(same.is_err());

        drop(guard);
        let same = tokio::time::timeout(Duration::from_millis(100), store.lock(1)).await;
        assert!(same.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_are_forgotten() {
        let (_, store) = store().await;

        for user_id in 1..=1000 {
            drop(store.lock(user_id).await);
        }
        assert!(store.locks.lock().unwrap().is_empty());

        // A lock someone is waiting on stays until the last holder lets go
        let first = store.lock(7).await;
        let waiting = tokio::time::timeout(Duration::from_millis(20), store.lock(7)).await;
        assert!(waiting.is_err());
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        drop(first);
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lock_survives_while_contended() {
        let (_, store) = store().await;

        let first = store.lock(3).await;
        let (second, ()) = tokio::join!(store.lock(3), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(first);
        });
        assert_eq!(store.locks.lock().unwrap().len(), 1);

        drop(second);
        assert!(store.locks.lock().unwrap().is_empty());
    }
}
