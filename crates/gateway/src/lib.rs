//! HTTP gateway for replyd.
//!
//! The messaging transport posts inbound turns here once it has decided a
//! reply is warranted, and delivers whatever text comes back. Operators use
//! the conversation routes to inspect or reset history.
//!
//! Built on Axum for high performance async HTTP.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use replyd_config::{AppConfig, ConfigError};
use replyd_core::message::Turn;
use replyd_dispatch::{Attempt, Dispatcher, OutcomeKind};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Shared application state for the gateway.
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            started_at: Utc::now(),
        }
    }
}

type SharedState = Arc<GatewayState>;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the Axum router with all gateway routes.
///
/// Layers: 1 MB request body limit, HTTP trace logging.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/reply", post(reply_handler))
        .route("/v1/conversations", get(list_conversations_handler))
        .route(
            "/v1/conversations/{id}",
            get(get_conversation_handler).delete(clear_conversation_handler),
        )
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the dispatcher from `config` and serve until Ctrl-C.
pub async fn start(config: AppConfig) -> Result<(), GatewayError> {
    let dispatcher = Arc::new(replyd_dispatch::build_from_config(&config).await?);
    serve(dispatcher, &config).await
}

/// Serve an existing dispatcher on the configured address.
pub async fn serve(dispatcher: Arc<Dispatcher>, config: &AppConfig) -> Result<(), GatewayError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let store = Arc::clone(dispatcher.store());
    store.sweep_expired().await;
    let sweeper = store.spawn_sweeper(config.memory.sweep_interval());
    let cooldown_sweeper = dispatcher
        .cooldown()
        .spawn_sweeper(config.memory.sweep_interval());

    let app = build_router(Arc::new(GatewayState::new(Arc::clone(&dispatcher))));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| GatewayError::Bind {
            addr: addr.clone(),
            source,
        })?;

    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    dispatcher.shutdown();
    cooldown_sweeper.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
    providers: usize,
    conversations: usize,
    persistence_failures: u64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        providers: dispatcher.registry().len(),
        conversations: dispatcher.store().conversation_count().await,
        persistence_failures: dispatcher.store().persistence_failures(),
    })
}

#[derive(Deserialize)]
struct ReplyRequest {
    conversation_id: String,
    text: String,
}

#[derive(Serialize)]
struct ReplyResponse {
    reply: String,
    outcome: OutcomeKind,
    attempts: Vec<Attempt>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn reply_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ReplyRequest>,
) -> Result<Json<ReplyResponse>, (StatusCode, Json<ErrorResponse>)> {
    let conversation_id = payload.conversation_id.trim();
    if conversation_id.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "conversation_id must not be empty".into(),
            }),
        ));
    }

    let outcome = state.dispatcher.dispatch(conversation_id, &payload.text).await;

    Ok(Json(ReplyResponse {
        reply: outcome.reply,
        outcome: outcome.kind,
        attempts: outcome.attempts,
    }))
}

#[derive(Serialize)]
struct ConversationListResponse {
    conversations: Vec<String>,
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
) -> Json<ConversationListResponse> {
    Json(ConversationListResponse {
        conversations: state.dispatcher.store().conversation_ids().await,
    })
}

#[derive(Serialize)]
struct ConversationResponse {
    conversation_id: String,
    turns: Vec<Turn>,
}

async fn get_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Json<ConversationResponse> {
    let turns = state.dispatcher.store().get_history(&id).await;
    Json(ConversationResponse {
        conversation_id: id,
        turns,
    })
}

async fn clear_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> StatusCode {
    state.dispatcher.store().clear(&id).await;
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use replyd_core::error::ProviderError;
    use replyd_core::provider::{Provider, ProviderRequest, ProviderResponse};
    use replyd_dispatch::{CooldownTracker, RequestThrottle};
    use replyd_memory::{ConversationStore, InMemoryBackend};
    use replyd_providers::ProviderRegistry;
    use std::time::Duration;
    use tower::ServiceExt;

    struct EchoProvider;

    #[async_trait]
    impl Provider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(
            &self,
            request: ProviderRequest,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            let last = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ProviderResponse {
                content: format!("echo: {last}"),
                model: request.model,
                usage: None,
            })
        }
    }

    async fn test_state() -> SharedState {
        let registry = ProviderRegistry::new().with(Arc::new(EchoProvider), vec!["echo-1".into()]);
        let store = ConversationStore::load(Arc::new(InMemoryBackend::new()), 10).await;
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            Arc::new(store),
            Arc::new(RequestThrottle::new(1, Duration::ZERO)),
            Arc::new(CooldownTracker::new(Duration::from_secs(5))),
        );
        Arc::new(GatewayState::new(Arc::new(dispatcher)))
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn post_reply(conversation_id: &str, text: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/reply")
            .header("Content-Type", "application/json")
            .body(Body::from(
                serde_json::json!({"conversation_id": conversation_id, "text": text}).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let app = build_router(test_state().await);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["providers"], 1);
    }

    #[tokio::test]
    async fn reply_then_history() {
        let state = test_state().await;

        let response = build_router(state.clone())
            .oneshot(post_reply("alice@s.whatsapp.net", "Hi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["reply"], "echo: Hi");
        assert_eq!(json["outcome"], "replied");
        assert_eq!(json["attempts"][0]["provider"], "echo");

        let req = Request::builder()
            .uri("/v1/conversations/alice@s.whatsapp.net")
            .body(Body::empty())
            .unwrap();
        let json = json_body(build_router(state).oneshot(req).await.unwrap()).await;
        let turns = json["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["role"], "user");
        assert_eq!(turns[1]["role"], "assistant");
    }

    #[tokio::test]
    async fn cooldown_is_still_200() {
        let state = test_state().await;
        build_router(state.clone())
            .oneshot(post_reply("bob", "first"))
            .await
            .unwrap();

        let response = build_router(state)
            .oneshot(post_reply("bob", "second"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["outcome"], "cooldown");
    }

    #[tokio::test]
    async fn empty_conversation_id_is_rejected() {
        let response = build_router(test_state().await)
            .oneshot(post_reply("  ", "Hi"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let req = Request::builder()
            .method("POST")
            .uri("/v1/reply")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"text": "missing id"}"#))
            .unwrap();
        let response = build_router(test_state().await).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn delete_clears_history() {
        let state = test_state().await;
        build_router(state.clone())
            .oneshot(post_reply("carol", "Hi"))
            .await
            .unwrap();

        let req = Request::builder()
            .method("DELETE")
            .uri("/v1/conversations/carol")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state.clone()).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.dispatcher.store().get_history("carol").await.is_empty());

        let req = Request::builder()
            .uri("/v1/conversations")
            .body(Body::empty())
            .unwrap();
        let json = json_body(build_router(state).oneshot(req).await.unwrap()).await;
        assert!(json["conversations"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty() {
        let req = Request::builder()
            .uri("/v1/conversations/nobody")
            .body(Body::empty())
            .unwrap();
        let response = build_router(test_state().await).oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(json_body(response).await["turns"].as_array().unwrap().is_empty());
    }
}
