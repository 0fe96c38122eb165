// API request handlers

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::Instrument;

use super::AppState;
use crate::proxy::error::BridgeError;
use crate::proxy::ProxyRequest;

// Root endpoint
pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Ollama Bridge",
        "endpoints": [
            "POST /api/chat",
            "POST /api/generate",
            "GET /v1/models",
            "GET /bridge/config",
            "GET /healthz"
        ]
    }))
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

/// Remote catalog in OpenAI list shape; always refreshes
pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, BridgeError> {
    let lookup = state.bridge.catalog().get(true).await;

    if lookup.models.is_empty() {
        if let Some(e) = lookup.error {
            tracing::warn!("Remote model listing failed: {}", e);
            return Err(BridgeError::Catalog(e));
        }
    }

    // BTreeSet iterates sorted
    let data = lookup
        .models
        .iter()
        .map(|id| ModelInfo {
            id: id.clone(),
            object: "model",
        })
        .collect();

    Ok(Json(ModelsResponse {
        object: "list",
        data,
    }))
}

pub async fn bridge_config(State(state): State<AppState>) -> Json<Value> {
    let bridge = &state.bridge;
    let config = bridge.config();
    let catalog = bridge.catalog().status();

    Json(json!({
        "local_upstream": config.local_upstream,
        "remote_url": config.remote_url,
        "remote_enabled": config.remote_enabled(),
        "model_map": bridge.routes(),
        "remote_models_ttl_seconds": config.remote_models_ttl,
        "remote_catalog": {
            "model_count": catalog.model_count,
            "refreshed_at": catalog.refreshed_at.map(|t| t.to_rfc3339()),
            "error": catalog.error.map(|e| e.to_string()),
        }
    }))
}

pub async fn api_chat(State(state): State<AppState>, body: Bytes) -> Response {
    proxy_generation(state, "/api/chat", body).await
}

pub async fn api_generate(State(state): State<AppState>, body: Bytes) -> Response {
    proxy_generation(state, "/api/generate", body).await
}

async fn proxy_generation(state: AppState, endpoint: &'static str, body: Bytes) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "request",
        id = %request_id,
        endpoint,
        model = tracing::field::Empty
    );

    async move {
        let payload: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                return BridgeError::InvalidRequest(format!("body is not valid JSON: {}", e))
                    .into_response()
            }
        };

        let request = match ProxyRequest::from_json(endpoint, payload) {
            Ok(r) => r,
            Err(e) => return e.into_response(),
        };

        tracing::Span::current().record("model", request.model.as_str());
        tracing::info!(
            "Incoming request: model='{}', stream={}",
            request.model,
            request.stream
        );

        match state.bridge.route_request(request).await {
            Ok(response) => response.into_response(),
            Err(e) => {
                let status = e.status();
                if status.is_server_error() {
                    tracing::error!("Request failed ({}): {}", status.as_u16(), e);
                } else if status != StatusCode::NOT_FOUND {
                    tracing::warn!("Request rejected ({}): {}", status.as_u16(), e);
                } else {
                    tracing::info!("Request not routable: {}", e);
                }
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}
