//! API routes

mod admin;
mod identity;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};

use crate::conversation::{ConversationState, Stage};
use crate::core::IntakeError;
use crate::AppState;

pub use identity::{Admin, UserId};

/// JSON error body: `{"error": "..."}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map an engine error; `context` is the client-facing text for
    /// server-side failures, which are logged but not detailed to the client
    fn from_intake(err: IntakeError, context: &str) -> Self {
        match err {
            IntakeError::EmptyMessage => {
                Self::new(StatusCode::BAD_REQUEST, "Message cannot be empty")
            }
            IntakeError::Store(e) => {
                tracing::error!(error = %e, "{}", context);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, context)
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ai_configured: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub stage: Stage,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub message: String,
    pub is_bot: bool,
    pub timestamp: String,
    pub stage: Stage,
}

#[derive(Debug, Serialize)]
struct ResetResponse {
    message: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ai_configured: state.intake.has_responder(),
    })
}

async fn chat(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = request?;
    if request.message.trim().is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "Message cannot be empty"));
    }

    let turn = state
        .intake
        .process(user_id, &request.message)
        .await
        .map_err(|e| ApiError::from_intake(e, "An error occurred processing your message"))?;

    Ok(Json(ChatResponse {
        response: turn.reply().to_string(),
        stage: turn.stage(),
    }))
}

async fn history(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    let messages = state
        .intake
        .history(user_id)
        .await
        .map_err(|e| ApiError::from_intake(e, "Failed to load chat history"))?;

    Ok(Json(
        messages
            .into_iter()
            .map(|stored| HistoryEntry {
                message: stored.message.text,
                is_bot: stored.message.is_bot,
                timestamp: stored.message.timestamp.to_rfc3339(),
                stage: stored.message.stage,
            })
            .collect(),
    ))
}

async fn reset(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<ResetResponse>, ApiError> {
    state
        .intake
        .reset(user_id)
        .await
        .map_err(|e| ApiError::from_intake(e, "Failed to reset chat"))?;

    Ok(Json(ResetResponse {
        message: "Chat reset successfully",
    }))
}

async fn conversation_state(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> Result<Json<ConversationState>, ApiError> {
    state
        .intake
        .state(user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_intake(e, "Failed to load chat state"))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/chat/history", get(history))
        .route("/api/chat/reset", post(reset))
        .route("/api/chat/state", get(conversation_state))
        .merge(admin::router())
}


#[cfg(test)]
mod tests {
    use super::identity::USER_ID_HEADER;
    use super::test_support::*;
    use super::*;
    use crate::core::db;
    use axum::body::Body;
    use axum::http::Request;

    fn post_raw(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .header(USER_ID_HEADER, "1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(None).await;
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ai_configured"], false);
    }

    #[tokio::test]
    async fn test_chat_walks_the_intake() {
        let app = app(None).await;

        let (status, body) = send(&app, post_chat(1, "Alice")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Nice to meet you, Alice! What is your age?");
        assert_eq!(body["stage"], "age");

        let (_, body) = send(&app, post_chat(1, "thirty")).await;
        assert_eq!(body["response"], "Please enter a valid age (numbers only).");
        assert_eq!(body["stage"], "age");

        let (_, body) = send(&app, post_chat(1, "30")).await;
        assert_eq!(body["stage"], "medical_history");

        let (_, body) = send(&app, post_chat(1, "none")).await;
        assert_eq!(body["stage"], "free_form");

        let (status, body) = send(&app, post_chat(1, "I have a headache")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["response"],
            "I'm sorry, but the AI service is currently unavailable. Please try again later."
        );
        assert_eq!(body["stage"], "free_form");
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let app = app(None).await;

        let (status, body) = send(&app, post_chat(1, "   ")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Message cannot be empty");

        let (_, history) = send(&app, get_as(1, "/api/chat/history")).await;
        assert_eq!(history.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_identity() {
        let app = app(None).await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"message":"Alice"}"#))
            .unwrap();

        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Authentication required");

        let (status, _) = send(&app, get_as(-3, "/api/chat/history")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_history_and_reset() {
        let app = app(None).await;
        send(&app, post_chat(9, "Alice")).await;
        send(&app, post_chat(9, "41")).await;

        let (status, history) = send(&app, get_as(9, "/api/chat/history")).await;
        assert_eq!(status, StatusCode::OK);
        let entries = history.as_array().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0]["message"], "Alice");
        assert_eq!(entries[0]["is_bot"], false);
        assert_eq!(entries[0]["stage"], "name");
        assert_eq!(entries[1]["is_bot"], true);
        assert_eq!(entries[1]["stage"], "name");
        assert_eq!(entries[3]["stage"], "age");
        assert!(entries[0]["timestamp"].is_string());

        let reset = Request::builder()
            .method("POST")
            .uri("/api/chat/reset")
            .header(USER_ID_HEADER, "9")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app, reset).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Chat reset successfully");

        let (_, state) = send(&app, get_as(9, "/api/chat/state")).await;
        assert_eq!(state["stage"], "name");
        assert!(state["name"].is_null());
        assert!(state["age"].is_null());

        let (_, history) = send(&app, get_as(9, "/api/chat/history")).await;
        assert_eq!(history.as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_bad_json_gets_error_body() {
        let app = app(None).await;

        let (status, body) = send(&app, post_raw(r#"{"message": 5}"#)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].is_string());

        let (status, body) = send(&app, post_raw("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (_, history) = send(&app, get_as(1, "/api/chat/history")).await;
        assert_eq!(history.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_is_a_server_error() {
        let pool = db::open_in_memory().await.unwrap();
        let app = app_on(pool.clone(), None).await;
        sqlx::query(
            "CREATE TRIGGER reject_messages BEFORE INSERT ON chat_messages \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let (status, body) = send(&app, post_chat(1, "Alice")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "An error occurred processing your message");

        let (_, state) = send(&app, get_as(1, "/api/chat/state")).await;
        assert_eq!(state["stage"], "name");
        assert!(state["name"].is_null());
    }
}
