//! HTTP endpoints: message history and health.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::state::AppState;
use crate::store::{MessageStore, StoreError, DEFAULT_RECENT_LIMIT};
use crate::types::ChatMessage;

/// Upper bound for an explicit `?limit=`
pub const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("history unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "msg": "Error fetching messages" })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Most recent stored messages, newest first
pub async fn get_recent(
    store: &dyn MessageStore,
    limit: usize,
) -> Result<Vec<ChatMessage>, QueryError> {
    Ok(store.recent(limit).await?)
}

/// Fetch message history.
///
/// GET /messages
///
/// Returns the 50 most recent messages unless `?limit=` asks for a
/// different amount (clamped to 1..=200).
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<Vec<ChatMessage>>, QueryError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);

    match get_recent(state.store.as_ref(), limit).await {
        Ok(messages) => Ok(Json(messages)),
        Err(e) => {
            tracing::error!(error = %e, "Error fetching messages");
            Err(e)
        }
    }
}

/// Liveness plus the current connection count.
///
/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.clients_total().await {
        Ok(total) => Json(json!({ "status": "ok", "clientsTotal": total })).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenVerifier;
    use crate::hub::spawn_hub;
    use crate::store::InMemoryMessageStore;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request, routing::get, Router};
    use tower::ServiceExt;

    struct UnavailableStore;

    #[async_trait]
    impl MessageStore for UnavailableStore {
        async fn append(&self, _message: ChatMessage) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<ChatMessage>, StoreError> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    fn app(store: Arc<dyn MessageStore>) -> Router {
        let state = Arc::new(AppState::new(TokenVerifier::new(b"secret"), store, spawn_hub()));
        Router::new()
            .route("/messages", get(history))
            .route("/api/health", get(health))
            .with_state(state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn message(i: usize) -> ChatMessage {
        ChatMessage {
            user_id: format!("user-{}", i),
            name: format!("Name {}", i),
            message: format!("message {}", i),
            date_time: chrono::DateTime::from_timestamp(1_700_000_000 + i as i64, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_history_returns_fifty_newest() {
        let store = Arc::new(InMemoryMessageStore::new());
        for i in 0..60 {
            store.append(message(i)).await.unwrap();
        }

        let (status, body) = get_json(app(store), "/messages").await;
        assert_eq!(status, StatusCode::OK);

        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 50);
        assert_eq!(items[0]["message"], "message 59");
        assert_eq!(items[49]["message"], "message 10");
        assert_eq!(items[0]["userId"], "user-59");
        assert!(items[0]["dateTime"].is_string());
    }

    #[tokio::test]
    async fn test_history_limit_param() {
        let store = Arc::new(InMemoryMessageStore::new());
        for i in 0..5 {
            store.append(message(i)).await.unwrap();
        }

        let (_, body) = get_json(app(store.clone()), "/messages?limit=2").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        // Zero is clamped up to one
        let (_, body) = get_json(app(store), "/messages?limit=0").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_empty_store() {
        let store = Arc::new(InMemoryMessageStore::new());
        let (status, body) = get_json(app(store), "/messages").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_history_store_unavailable() {
        let (status, body) = get_json(app(Arc::new(UnavailableStore)), "/messages").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"msg": "Error fetching messages"}));
    }

    #[tokio::test]
    async fn test_get_recent_maps_store_error() {
        let result = get_recent(&UnavailableStore, 50).await;
        assert!(matches!(result, Err(QueryError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_health_reports_clients_total() {
        let store = Arc::new(InMemoryMessageStore::new());
        let (status, body) = get_json(app(store), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok", "clientsTotal": 0}));
    }
}
