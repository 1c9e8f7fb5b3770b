use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use comet_core::llm::LlmDriver;
use comet_core::relay::{relay_body, STREAM_HEADERS};
use comet_core::state::MessageRole;
use comet_core::wire::{GenerationRequest, GenerationResponse, ResponseMessage};
use comet_core::ProviderError;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

#[derive(Clone)]
pub struct ServerState {
    driver: Arc<LlmDriver>,
}

impl ServerState {
    pub fn new(driver: LlmDriver) -> Self {
        Self {
            driver: Arc::new(driver),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            AppError::Provider(err) => {
                tracing::error!(%err, "generation failed");
                (StatusCode::BAD_GATEWAY, "Failed to connect to AI service")
            }
        };
        let body = Json(json!({
            "error": error,
            "details": self.to_string(),
        }));
        (status, body).into_response()
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/api/chat", post(chat))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, driver: LlmDriver) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, driver).await
}

pub async fn serve_on(listener: TcpListener, driver: LlmDriver) -> anyhow::Result<()> {
    tracing::info!(
        addr = %listener.local_addr()?,
        provider = %driver.default_provider(),
        "relay listening"
    );
    axum::serve(listener, router(ServerState::new(driver))).await?;
    Ok(())
}

async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    let providers: Vec<&str> = state
        .driver
        .configured_providers()
        .into_iter()
        .map(|kind| kind.as_str())
        .collect();
    Json(json!({
        "status": "ok",
        "defaultProvider": state.driver.default_provider().as_str(),
        "providers": providers,
    }))
}

async fn chat(
    State(state): State<ServerState>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|err| AppError::BadRequest(err.body_text()))?;
    request
        .validate()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    if request.is_streaming() {
        let fragments = state.driver.stream(&request).await?;
        let mut response = Response::new(Body::from_stream(relay_body(fragments)));
        for (name, value) in STREAM_HEADERS {
            response
                .headers_mut()
                .insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        return Ok(response);
    }

    let content = state.driver.complete(&request).await?;
    let response = GenerationResponse {
        id: request
            .chat_id
            .clone()
            .unwrap_or_else(|| format!("chat-{}", Uuid::new_v4())),
        messages: vec![
            response_message(MessageRole::User, request.message),
            response_message(MessageRole::Assistant, content),
        ],
    };
    Ok(Json(response).into_response())
}

fn response_message(role: MessageRole, content: String) -> ResponseMessage {
    ResponseMessage {
        role,
        content,
        id: format!("msg-{}", Uuid::new_v4()),
        created_at: Utc::now().to_rfc3339(),
    }
}
