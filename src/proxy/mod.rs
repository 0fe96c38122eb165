// Proxy module - routes generation requests between the local and remote backends

pub mod catalog;
pub mod error;
pub mod paths;
pub mod router;
pub mod upstream;

use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::config::{BridgeConfig, RouteTable};
use catalog::RemoteCatalog;
use error::BridgeError;
use paths::{build_url, candidate_paths, BackendKind};
use upstream::{ForwardOutcome, ForwardTarget, Upstream, UpstreamResponse};

/// How many catalog entries to echo back when no candidate is available
const AVAILABLE_SAMPLE_SIZE: usize = 30;

/// Inbound generation request, already parsed
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    /// Logical endpoint, e.g. `/api/chat`
    pub endpoint: String,
    pub model: String,
    pub stream: bool,
    pub body: Map<String, Value>,
}

impl ProxyRequest {
    /// Build from a JSON body; the body must be an object
    pub fn from_json(endpoint: &str, payload: Value) -> Result<Self, BridgeError> {
        let Value::Object(body) = payload else {
            return Err(BridgeError::InvalidRequest(
                "request body must be a JSON object".to_string(),
            ));
        };
        let model = body
            .get("model")
            .and_then(Value::as_str)
            .map(|m| m.trim().to_string())
            .unwrap_or_default();
        let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

        Ok(Self {
            endpoint: endpoint.to_string(),
            model,
            stream,
            body,
        })
    }
}

/// Routing orchestrator. Owns the route table, the remote catalog and the forwarder.
pub struct Bridge {
    config: BridgeConfig,
    routes: RouteTable,
    catalog: RemoteCatalog,
    upstream: Upstream,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Result<Arc<Self>> {
        let routes = config.route_table();

        let catalog_client = reqwest::Client::builder()
            .timeout(config.model_list_timeout())
            .build()
            .context("Failed to build catalog HTTP client")?;
        let upstream_client = Upstream::build_client(
            config.upstream_connect_timeout(),
            config.upstream_read_timeout(),
        )
        .context("Failed to build upstream HTTP client")?;

        let catalog = RemoteCatalog::new(
            catalog_client,
            config.remote_url.clone(),
            config.api_key.clone(),
            config.remote_models_ttl(),
        );

        tracing::info!(
            "Bridge configured: local={}, remote={}, remote_enabled={}, routes={}",
            config.local_upstream,
            config.remote_url,
            config.remote_enabled(),
            routes.len()
        );

        Ok(Arc::new(Self {
            config,
            routes,
            catalog,
            upstream: Upstream::new(upstream_client),
        }))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn catalog(&self) -> &RemoteCatalog {
        &self.catalog
    }

    /// Resolve the request's model and try candidates until one succeeds
    pub async fn route_request(
        &self,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, BridgeError> {
        let candidates = router::resolve_remote_candidates(&request.model, &self.routes);
        if candidates.is_empty() {
            self.forward_local(request).await
        } else {
            self.forward_remote(request, candidates).await
        }
    }

    async fn forward_remote(
        &self,
        request: ProxyRequest,
        candidates: Vec<String>,
    ) -> Result<UpstreamResponse, BridgeError> {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return Err(BridgeError::Unavailable(
                "OLLAMA_API_KEY is required for remote routing".to_string(),
            ));
        };

        let lookup = self.catalog.get(false).await;
        let selected: Vec<String> = if lookup.models.is_empty() {
            if let Some(e) = &lookup.error {
                tracing::warn!("Could not validate remote models before routing: {}", e);
            }
            candidates.clone()
        } else {
            let filtered: Vec<String> = candidates
                .iter()
                .filter(|model| lookup.models.contains(model.as_str()))
                .cloned()
                .collect();
            if filtered.is_empty() {
                return Err(BridgeError::NoRemoteModel {
                    requested_model: request.model,
                    candidates,
                    available_sample: lookup
                        .models
                        .iter()
                        .take(AVAILABLE_SAMPLE_SIZE)
                        .cloned()
                        .collect(),
                });
            }
            filtered
        };

        let paths = candidate_paths(&request.endpoint, BackendKind::Remote);
        let mut last_error: Option<String> = None;
        let mut saw_not_found = false;

        for model in &selected {
            let mut body = request.body.clone();
            body.insert("model".to_string(), json!(model));
            let payload = Value::Object(body);

            for path in &paths {
                let target = ForwardTarget {
                    backend: BackendKind::Remote,
                    url: build_url(&self.config.remote_url, path),
                    model: Some(model.as_str()),
                    bearer: Some(api_key),
                };

                match self
                    .upstream
                    .forward(&target, &payload, request.stream, true)
                    .await
                {
                    ForwardOutcome::Success(response) => {
                        tracing::info!(
                            "Remote route used: {} (requested='{}', remote='{}', stream={})",
                            target.url,
                            request.model,
                            model,
                            request.stream
                        );
                        return Ok(response);
                    }
                    ForwardOutcome::NotFound { .. } => {
                        saw_not_found = true;
                        tracing::debug!("Model '{}' not found at {}", model, target.url);
                    }
                    ForwardOutcome::AuthFailure { status, detail } => {
                        tracing::warn!("Remote upstream rejected credential at {} ({})", target.url, status);
                        return Err(BridgeError::Auth {
                            backend: BackendKind::Remote,
                            status,
                            detail,
                        });
                    }
                    ForwardOutcome::UpstreamError { status, detail } => {
                        tracing::warn!("Remote upstream {} returned HTTP {}", target.url, status);
                        last_error = Some(format!("HTTP {} from {}: {}", status.as_u16(), target.url, detail));
                    }
                    ForwardOutcome::NetworkError(e) => {
                        tracing::warn!("Network error on remote upstream {}: {}", target.url, e);
                        last_error = Some(e);
                    }
                }
            }
        }

        let detail = last_error
            .or_else(|| lookup.error.as_ref().map(|e| e.to_string()))
            .unwrap_or_else(|| "model not found on any tried endpoint".to_string());

        if saw_not_found {
            Err(BridgeError::ModelNotFound {
                requested_model: request.model,
                candidates,
                detail,
            })
        } else {
            Err(BridgeError::BadGateway {
                backend: BackendKind::Remote,
                requested_model: Some(request.model),
                candidates,
                detail,
            })
        }
    }

    async fn forward_local(&self, request: ProxyRequest) -> Result<UpstreamResponse, BridgeError> {
        let paths = candidate_paths(&request.endpoint, BackendKind::Local);
        let payload = Value::Object(request.body);
        let mut last_error: Option<String> = None;

        for (idx, path) in paths.iter().enumerate() {
            let is_last = idx + 1 == paths.len();
            let target = ForwardTarget {
                backend: BackendKind::Local,
                url: build_url(&self.config.local_upstream, path),
                model: Some(request.model.as_str()).filter(|m| !m.is_empty()),
                bearer: None,
            };

            match self
                .upstream
                .forward(&target, &payload, request.stream, false)
                .await
            {
                ForwardOutcome::Success(response) => {
                    tracing::info!("Local route used: {} (stream={})", target.url, request.stream);
                    return Ok(response);
                }
                ForwardOutcome::NotFound { status, detail }
                | ForwardOutcome::UpstreamError { status, detail }
                    if status.as_u16() == 404 && !is_last =>
                {
                    tracing::debug!("Local path {} answered 404, trying next", target.url);
                    last_error = Some(format!("HTTP 404 from {}: {}", target.url, detail));
                }
                ForwardOutcome::NotFound { status, detail }
                | ForwardOutcome::UpstreamError { status, detail } => {
                    return Err(BridgeError::Upstream {
                        backend: BackendKind::Local,
                        status,
                        detail,
                    });
                }
                ForwardOutcome::AuthFailure { status, detail } => {
                    return Err(BridgeError::Auth {
                        backend: BackendKind::Local,
                        status,
                        detail,
                    });
                }
                ForwardOutcome::NetworkError(e) => {
                    tracing::warn!("Network error on local upstream {}: {}", target.url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(BridgeError::BadGateway {
            backend: BackendKind::Local,
            requested_model: Some(request.model).filter(|m| !m.is_empty()),
            candidates: Vec::new(),
            detail: last_error.unwrap_or_else(|| "no local route responded successfully".to_string()),
        })
    }
}
