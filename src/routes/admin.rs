//! Admin dashboard data
//!
//! Read-only JSON views over every user's intake state and the full message
//! log. Requires `MEDBOT_ADMIN_TOKEN`; without it these routes answer 404.

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

use crate::core::{SessionRecord, StoredMessage};
use crate::AppState;

use super::{Admin, ApiError};

#[derive(Debug, Serialize)]
struct UserSummary {
    #[serde(flatten)]
    record: SessionRecord,
    message_count: i64,
}

async fn users(
    _admin: Admin,
    State(state): State<AppState>,
) -> Result<Json<Vec<UserSummary>>, ApiError> {
    let users = state
        .intake
        .users()
        .await
        .map_err(|e| ApiError::from_intake(e, "Error loading admin data."))?;

    Ok(Json(
        users
            .into_iter()
            .map(|(record, message_count)| UserSummary {
                record,
                message_count,
            })
            .collect(),
    ))
}

async fn messages(
    _admin: Admin,
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredMessage>>, ApiError> {
    state
        .intake
        .all_messages()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_intake(e, "Error loading admin data."))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(users))
        .route("/api/admin/messages", get(messages))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};

    fn admin_get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let app = app(None).await;
        let (status, _) = send(&app, admin_get("/api/admin/users", Some("anything"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_requires_matching_token() {
        let app = app(Some("s3cret")).await;

        let (status, body) = send(&app, admin_get("/api/admin/messages", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Access denied. Admin privileges required.");

        let (status, _) = send(&app, admin_get("/api/admin/messages", Some("admin"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_views() {
        let app = app(Some("s3cret")).await;
        send(&app, post_chat(1, "Alice")).await;
        send(&app, post_chat(2, "Bob")).await;
        send(&app, post_chat(2, "52")).await;

        let (status, users) = send(&app, admin_get("/api/admin/users", Some("s3cret"))).await;
        assert_eq!(status, StatusCode::OK);
        let users = users.as_array().unwrap();
        assert_eq!(users.len(), 2);
        let bob = users.iter().find(|u| u["user_id"] == 2).unwrap();
        assert_eq!(bob["name"], "Bob");
        assert_eq!(bob["age"], 52);
        assert_eq!(bob["stage"], "medical_history");
        assert_eq!(bob["message_count"], 4);

        let (status, messages) =
            send(&app, admin_get("/api/admin/messages", Some("s3cret"))).await;
        assert_eq!(status, StatusCode::OK);
        let messages = messages.as_array().unwrap();
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0]["user_id"], 1);
        assert_eq!(messages[0]["text"], "Alice");
        assert_eq!(messages[1]["is_bot"], true);
    }
}
