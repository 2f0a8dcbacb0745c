//! HTTP API over the router and conversation memory.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::memory::ConversationMemory;
use crate::router::RequestRouter;
use crate::store::{Metadata, is_valid_conversation_id};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<RequestRouter>,
    pub memory: Arc<ConversationMemory>,
}

/// Build the API router.
pub fn api_routes(router: Arc<RequestRouter>) -> Router {
    let state = AppState {
        memory: Arc::clone(router.memory()),
        router,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/conversations/{id}/history", get(history))
        .route("/api/users/{user_id}/conversations", get(list_conversations))
        .route("/api/users/{user_id}/search", get(search))
        .layer(cors)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    query: String,
    user_id: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    context: Option<Metadata>,
}

async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> impl IntoResponse {
    if body.query.trim().is_empty() || body.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"success": false, "error": "query and user_id are required"})),
        );
    }

    match state
        .router
        .process_request(
            &body.query,
            &body.user_id,
            body.conversation_id.as_deref(),
            body.context,
        )
        .await
    {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"success": false, "error": e.to_string()})),
        ),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    if !is_valid_conversation_id(&id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid conversation ID"})),
        );
    }

    match state.memory.get_history(&id, params.limit).await {
        Ok(history) => (
            StatusCode::OK,
            Json(serde_json::json!({"conversation_id": id, "history": history})),
        ),
        Err(e) => {
            tracing::error!(conversation_id = %id, error = %e, "Failed to load history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to load history"})),
            )
        }
    }
}

async fn list_conversations(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    match state.memory.list_conversations(&user_id).await {
        Ok(conversations) => (
            StatusCode::OK,
            Json(serde_json::json!({"user_id": user_id, "conversations": conversations})),
        ),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Failed to list conversations");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Failed to list conversations"})),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: String,
}

async fn search(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    match state.memory.search(&user_id, &params.q).await {
        Ok(matches) => (
            StatusCode::OK,
            Json(serde_json::json!({"user_id": user_id, "query": params.q, "matches": matches})),
        ),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Conversation search failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({"error": "Search failed"})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{CapabilityRegistry, ConversationResponder, Dispatcher};
    use crate::classifier::{IntentClassifier, TaskTaxonomy};
    use crate::error::LlmError;
    use crate::llm::{CompletionRequest, CompletionResponse, LlmProvider};
    use crate::router::{RouterConfig, RouterDeps};
    use crate::store::LibSqlStore;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct StubLlm {
        reachable: bool,
    }

    #[async_trait]
    impl LlmProvider for StubLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            if !self.reachable {
                return Err(LlmError::RequestFailed {
                    provider: "stub".into(),
                    reason: "offline".into(),
                });
            }
            let content = if request.messages[0].content.contains("task classifier") {
                r#"{"task": "conversation", "params": {}}"#
            } else {
                "stub reply"
            };
            Ok(CompletionResponse {
                content: content.to_string(),
                ..Default::default()
            })
        }
    }

    async fn app(reachable: bool) -> Router {
        let llm: Arc<dyn LlmProvider> = Arc::new(StubLlm { reachable });
        let memory = Arc::new(ConversationMemory::new(Arc::new(
            LibSqlStore::new_memory().await.unwrap(),
        )));
        let router = RequestRouter::new(
            RouterConfig::default(),
            RouterDeps {
                memory,
                classifier: Arc::new(IntentClassifier::new(llm.clone(), TaskTaxonomy::default())),
                dispatcher: Arc::new(Dispatcher::new(Arc::new(CapabilityRegistry::new()))),
                responder: Arc::new(ConversationResponder::new(llm)),
            },
        );
        api_routes(Arc::new(router))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(true).await;
        let (status, json) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn chat_then_history() {
        let app = app(true).await;
        let (status, json) = send(&app, post_chat(serde_json::json!({"query": "hi", "user_id": "u1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["content"], "stub reply");
        assert_eq!(json["task_type"], "conversation");

        let id = json["conversation_id"].as_str().unwrap().to_string();
        let (status, json) = send(&app, get_request(&format!("/api/conversations/{id}/history?limit=5"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
        assert_eq!(json["history"][0]["user_query"], "hi");

        let (_, json) = send(&app, get_request("/api/users/u1/conversations")).await;
        assert_eq!(json["conversations"][0]["id"], id.as_str());

        let (_, json) = send(&app, get_request("/api/users/u1/search?q=STUB")).await;
        assert_eq!(json["matches"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn classification_failure_is_503() {
        let app = app(false).await;
        let (status, json) = send(&app, post_chat(serde_json::json!({"query": "hi", "user_id": "u1"}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["success"], false);
        assert!(json["error"].as_str().unwrap().contains("Failed to classify"));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let app = app(true).await;
        let (status, _) = send(&app, post_chat(serde_json::json!({"query": " ", "user_id": "u1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn invalid_conversation_id_is_rejected() {
        let app = app(true).await;
        let (status, _) = send(&app, get_request("/api/conversations/bad..id/history")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
