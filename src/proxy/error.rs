// Bridge error taxonomy and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

use super::catalog::CatalogError;
use super::paths::BackendKind;

/// Upper bound for `detail` strings returned to callers
pub const MAX_DETAIL_CHARS: usize = 1000;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("authorization failed on the {backend} upstream")]
    Auth {
        backend: BackendKind,
        status: StatusCode,
        detail: String,
    },

    #[error("no remote model available for '{requested_model}'")]
    NoRemoteModel {
        requested_model: String,
        candidates: Vec<String>,
        available_sample: Vec<String>,
    },

    #[error("model '{requested_model}' not found on any tried endpoint")]
    ModelNotFound {
        requested_model: String,
        candidates: Vec<String>,
        detail: String,
    },

    #[error("{backend} upstream returned HTTP {status}")]
    Upstream {
        backend: BackendKind,
        status: StatusCode,
        detail: String,
    },

    #[error("failed to reach the {backend} upstream")]
    BadGateway {
        backend: BackendKind,
        requested_model: Option<String>,
        candidates: Vec<String>,
        detail: String,
    },

    #[error("remote routing unavailable: {0}")]
    Unavailable(String),

    #[error("remote model catalog unavailable")]
    Catalog(#[from] CatalogError),
}

impl BridgeError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Auth { status, .. } => *status,
            Self::NoRemoteModel { .. } | Self::ModelNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } | Self::BadGateway { .. } | Self::Catalog(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// JSON body: `{error, detail, ...context}`
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("error".to_string(), json!(self.to_string()));

        match self {
            Self::InvalidRequest(detail) | Self::Unavailable(detail) => {
                body.insert("detail".to_string(), json!(truncate_detail(detail)));
            }
            Self::Auth {
                backend,
                status,
                detail,
            }
            | Self::Upstream {
                backend,
                status,
                detail,
            } => {
                body.insert("detail".to_string(), json!(truncate_detail(detail)));
                body.insert("backend".to_string(), json!(backend));
                body.insert("upstream_status".to_string(), json!(status.as_u16()));
            }
            Self::NoRemoteModel {
                requested_model,
                candidates,
                available_sample,
            } => {
                body.insert(
                    "detail".to_string(),
                    json!("none of the mapped candidates is listed in the remote catalog"),
                );
                body.insert("requested_model".to_string(), json!(requested_model));
                body.insert("mapped_candidates".to_string(), json!(candidates));
                body.insert("available_models_sample".to_string(), json!(available_sample));
            }
            Self::ModelNotFound {
                requested_model,
                candidates,
                detail,
            } => {
                body.insert("detail".to_string(), json!(truncate_detail(detail)));
                body.insert("requested_model".to_string(), json!(requested_model));
                body.insert("mapped_candidates".to_string(), json!(candidates));
            }
            Self::BadGateway {
                backend,
                requested_model,
                candidates,
                detail,
            } => {
                body.insert("detail".to_string(), json!(truncate_detail(detail)));
                body.insert("backend".to_string(), json!(backend));
                if let Some(model) = requested_model {
                    body.insert("requested_model".to_string(), json!(model));
                }
                if !candidates.is_empty() {
                    body.insert("mapped_candidates".to_string(), json!(candidates));
                }
            }
            Self::Catalog(e) => {
                body.insert("detail".to_string(), json!(truncate_detail(&e.to_string())));
            }
        }

        Value::Object(body)
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_json())).into_response()
    }
}

/// Cap a detail string at `MAX_DETAIL_CHARS` characters
pub fn truncate_detail(detail: &str) -> String {
    match detail.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((idx, _)) => detail[..idx].to_string(),
        None => detail.to_string(),
    }
}
