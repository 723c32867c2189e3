//! Dial-in webhook server
//!
//! `POST /start` receives the calling provider's dial-in webhook and asks the
//! provisioner to start a bot session for the call. `GET /health` is a
//! liveness check.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::Instrument;

use crate::provision::{DialinRequest, ProvisionError, SessionProvisioner};

/// Webhook fields that must all be present.
pub const REQUIRED_FIELDS: [&str; 4] = ["From", "To", "callId", "callDomain"];

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Missing properties 'From', 'To', 'callId', 'callDomain'")]
    MissingProperties,

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Server error: {0}")]
    Server(String),
}

impl WebhookError {
    pub fn status(&self) -> StatusCode {
        match self {
            WebhookError::MissingProperties => StatusCode::BAD_REQUEST,
            WebhookError::Provision(_) | WebhookError::Server(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Clone)]
pub struct AppState {
    pub provisioner: Arc<dyn SessionProvisioner>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/start", post(start_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(address = %addr, "starting webhook server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

async fn start_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    let request_id = uuid::Uuid::new_v4();
    start_session(&state, &body)
        .instrument(tracing::info_span!("dialin_webhook", %request_id))
        .await
}

async fn start_session(state: &AppState, body: &[u8]) -> Result<Json<Value>, WebhookError> {
    tracing::info!("received dial-in webhook");
    let data: Value =
        serde_json::from_slice(body).map_err(|e| WebhookError::Server(e.to_string()))?;

    if data.as_object().is_some_and(|o| o.contains_key("test")) {
        tracing::debug!("webhook check passed through");
        return Ok(Json(json!({ "test": true })));
    }

    let request = dialin_request(&data)?;
    tracing::info!(from = %request.from, to = %request.to, call_id = %request.call_id, "processing call");
    state.provisioner.start_dialin_session(&request).await?;
    Ok(Json(json!({})))
}

/// Pull the call identifiers out of a webhook body. Values of any JSON type
/// are accepted and rendered as text.
pub fn dialin_request(data: &Value) -> Result<DialinRequest, WebhookError> {
    let object = data.as_object().ok_or(WebhookError::MissingProperties)?;
    if !REQUIRED_FIELDS.iter().all(|key| object.contains_key(*key)) {
        return Err(WebhookError::MissingProperties);
    }
    Ok(DialinRequest {
        from: text(object, "From"),
        to: text(object, "To"),
        call_id: text(object, "callId"),
        call_domain: text(object, "callDomain"),
    })
}

fn text(object: &Map<String, Value>, key: &str) -> String {
    match object.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}
