// Remote model catalog - TTL cache with a single in-flight refresh

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::paths::{build_url, CATALOG_PATHS};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("OLLAMA_API_KEY is not configured")]
    MissingCredential,
    #[error("authorization failed on model catalog endpoint {url} (HTTP {status})")]
    Unauthorized { url: String, status: u16 },
    #[error("network error at {url}: {message}")]
    Network { url: String, message: String },
    #[error("failed to list models at {url} (HTTP {status})")]
    Status { url: String, status: u16 },
    #[error("invalid response from {url} (not JSON)")]
    InvalidPayload { url: String },
    #[error("no models listed at {url}")]
    Empty { url: String },
    #[error("no catalog endpoints configured")]
    NoEndpoints,
    #[error("catalog refresh task failed: {0}")]
    Task(String),
}

/// Snapshot handed to readers; the set is shared, never mutated in place
#[derive(Debug, Clone, Default)]
pub struct CatalogLookup {
    pub models: Arc<BTreeSet<String>>,
    pub error: Option<CatalogError>,
}

impl CatalogLookup {
    fn failed(error: CatalogError) -> Self {
        Self {
            models: Arc::new(BTreeSet::new()),
            error: Some(error),
        }
    }
}

/// Cache status for introspection
#[derive(Debug, Clone, Default)]
pub struct CatalogStatus {
    pub model_count: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub error: Option<CatalogError>,
}

#[derive(Default)]
struct CatalogState {
    models: Arc<BTreeSet<String>>,
    fetched_at: Option<Instant>,
    refreshed_at: Option<DateTime<Utc>>,
    last_error: Option<CatalogError>,
}

type PendingRefresh = Shared<BoxFuture<'static, CatalogLookup>>;

struct CatalogInner {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    ttl: Duration,
    state: RwLock<CatalogState>,
    inflight: Mutex<Option<PendingRefresh>>,
}

/// Set of model ids served by the remote backend.
///
/// Concurrent refreshes (forced or not) collapse into one shared network fetch.
#[derive(Clone)]
pub struct RemoteCatalog {
    inner: Arc<CatalogInner>,
}

impl RemoteCatalog {
    pub fn new(
        http_client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        ttl: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                http_client,
                base_url: base_url.into(),
                api_key,
                ttl,
                state: RwLock::new(CatalogState::default()),
                inflight: Mutex::new(None),
            }),
        }
    }

    /// Return the cached catalog, refreshing when stale or when forced
    pub async fn get(&self, force_refresh: bool) -> CatalogLookup {
        if self.inner.api_key.is_none() {
            return CatalogLookup::failed(CatalogError::MissingCredential);
        }

        if !force_refresh {
            if let Some(hit) = self.inner.fresh_snapshot() {
                return hit;
            }
        }

        let pending = {
            let mut inflight = self.inner.inflight.lock();
            if let Some(pending) = inflight.as_ref() {
                pending.clone()
            } else {
                // Re-check under the lock: a refresh may have committed meanwhile.
                if !force_refresh {
                    if let Some(hit) = self.inner.fresh_snapshot() {
                        return hit;
                    }
                }
                let inner = Arc::clone(&self.inner);
                let task = tokio::spawn(async move { inner.refresh().await });
                let pending = share_refresh(Arc::clone(&self.inner), task);
                *inflight = Some(pending.clone());
                pending
            }
        };

        pending.await
    }

    pub fn status(&self) -> CatalogStatus {
        let state = self.inner.state.read();
        CatalogStatus {
            model_count: state.models.len(),
            refreshed_at: state.refreshed_at,
            error: state.last_error.clone(),
        }
    }
}

/// Wrap a refresh task so every waiter shares its result.
///
/// `refresh` clears the in-flight slot itself; a task that died before doing so is cleared here.
fn share_refresh(
    inner: Arc<CatalogInner>,
    task: JoinHandle<CatalogLookup>,
) -> PendingRefresh {
    async move {
        match task.await {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::error!("[Catalog] Refresh task failed: {}", e);
                *inner.inflight.lock() = None;
                CatalogLookup::failed(CatalogError::Task(e.to_string()))
            }
        }
    }
    .boxed()
    .shared()
}

impl CatalogInner {
    fn fresh_snapshot(&self) -> Option<CatalogLookup> {
        let state = self.state.read();
        let fetched_at = state.fetched_at?;
        if fetched_at.elapsed() >= self.ttl {
            return None;
        }
        let error = if state.models.is_empty() {
            state.last_error.clone()
        } else {
            None
        };
        Some(CatalogLookup {
            models: Arc::clone(&state.models),
            error,
        })
    }

    async fn refresh(&self) -> CatalogLookup {
        let fetched = self.fetch().await;

        let lookup = {
            let mut state = self.state.write();
            state.fetched_at = Some(Instant::now());
            state.refreshed_at = Some(Utc::now());
            match fetched {
                Ok(models) => {
                    tracing::debug!("[Catalog] {} remote models cached", models.len());
                    state.models = Arc::new(models);
                    state.last_error = None;
                }
                Err(e) => {
                    tracing::warn!("[Catalog] Remote model listing failed: {}", e);
                    state.models = Arc::new(BTreeSet::new());
                    state.last_error = Some(e);
                }
            }
            CatalogLookup {
                models: Arc::clone(&state.models),
                error: state.last_error.clone(),
            }
        };

        *self.inflight.lock() = None;
        lookup
    }

    async fn fetch(&self) -> Result<BTreeSet<String>, CatalogError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(CatalogError::MissingCredential)?;
        let mut last_error = None;

        for path in CATALOG_PATHS {
            let url = build_url(&self.base_url, path);
            let response = match self.http_client.get(&url).bearer_auth(api_key).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(CatalogError::Network {
                        url,
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                return Err(CatalogError::Unauthorized { url, status });
            }
            if status >= 400 {
                last_error = Some(CatalogError::Status { url, status });
                continue;
            }

            let body: Value = match response.json().await {
                Ok(v) => v,
                Err(_) => {
                    last_error = Some(CatalogError::InvalidPayload { url });
                    continue;
                }
            };

            let models = extract_models(&body);
            if !models.is_empty() {
                tracing::info!("[Catalog] Loaded {} remote models from {}", models.len(), url);
                return Ok(models);
            }
            last_error = Some(CatalogError::Empty { url });
        }

        Err(last_error.unwrap_or(CatalogError::NoEndpoints))
    }
}

/// Pull model ids out of `{"data": [...]}`, `{"models": [...]}` or a bare array
pub fn extract_models(payload: &Value) -> BTreeSet<String> {
    let mut models = BTreeSet::new();
    let mut collect = |items: &Vec<Value>| {
        models.extend(items.iter().filter_map(model_from_item));
    };

    match payload {
        Value::Object(map) => {
            for key in ["data", "models"] {
                if let Some(items) = map.get(key).and_then(Value::as_array) {
                    collect(items);
                }
            }
        }
        Value::Array(items) => collect(items),
        _ => {}
    }
    models
}

fn model_from_item(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(map) => ["id", "model", "name"].iter().find_map(|key| {
            map.get(*key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_upstream(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn catalog(base_url: String, ttl: Duration) -> RemoteCatalog {
        RemoteCatalog::new(
            reqwest::Client::new(),
            base_url,
            Some("test-key".to_string()),
            ttl,
        )
    }

    #[test]
    fn test_extract_models_shapes() {
        let payload = json!({"data": [{"id": "a"}, {"object": "model"}], "models": [{"name": "b"}, {"model": " c "}]});
        let models: Vec<_> = extract_models(&payload).into_iter().collect();
        assert_eq!(models, vec!["a", "b", "c"]);

        let payload = json!(["x", "", {"id": "  "}, {"name": "y"}]);
        let models: Vec<_> = extract_models(&payload).into_iter().collect();
        assert_eq!(models, vec!["x", "y"]);

        assert!(extract_models(&json!({"object": "list"})).is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_skips_network() {
        let catalog = RemoteCatalog::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9",
            None,
            Duration::from_secs(60),
        );
        let lookup = catalog.get(true).await;
        assert!(lookup.models.is_empty());
        assert_eq!(lookup.error, Some(CatalogError::MissingCredential));
    }

    #[tokio::test]
    async fn test_concurrent_forced_refreshes_share_one_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/v1/models",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Json(json!({"object": "list", "data": [{"id": "gpt-oss:120b"}]}))
                }
            }),
        );
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        let lookups = futures::future::join_all((0..16).map(|_| catalog.get(true))).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        for lookup in lookups {
            assert!(lookup.error.is_none());
            assert!(lookup.models.contains("gpt-oss:120b"));
        }
    }

    #[tokio::test]
    async fn test_dead_refresh_task_does_not_wedge_the_cache() {
        let app = Router::new().route(
            "/v1/models",
            get(|| async { Json(json!({"data": [{"id": "a"}]})) }),
        );
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        let task: JoinHandle<CatalogLookup> = tokio::spawn(async { panic!("refresh crashed") });
        *catalog.inner.inflight.lock() =
            Some(share_refresh(Arc::clone(&catalog.inner), task));

        let failed = catalog.get(true).await;
        assert!(failed.models.is_empty());
        assert!(matches!(failed.error, Some(CatalogError::Task(_))));
        assert!(catalog.inner.inflight.lock().is_none());

        let recovered = catalog.get(true).await;
        assert!(recovered.error.is_none());
        assert!(recovered.models.contains("a"));
    }

    #[tokio::test]
    async fn test_fresh_cache_is_served_without_fetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/v1/models",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"data": [{"id": "a"}]}))
                }
            }),
        );
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        catalog.get(false).await;
        catalog.get(false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        catalog.get(true).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(catalog.status().model_count, 1);
        assert!(catalog.status().refreshed_at.is_some());
    }

    #[tokio::test]
    async fn test_falls_back_to_tags_endpoint() {
        let app = Router::new()
            .route("/v1/models", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/api/tags",
                get(|| async { Json(json!({"models": [{"name": "qwen3:32b"}]})) }),
            );
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        let lookup = catalog.get(false).await;
        assert!(lookup.error.is_none());
        assert!(lookup.models.contains("qwen3:32b"));
    }

    #[tokio::test]
    async fn test_auth_failure_stops_endpoint_search() {
        let tags_hits = Arc::new(AtomicUsize::new(0));
        let counter = tags_hits.clone();
        let app = Router::new()
            .route("/v1/models", get(|| async { StatusCode::UNAUTHORIZED }))
            .route(
                "/api/tags",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"models": [{"name": "a"}]}))
                    }
                }),
            );
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        let lookup = catalog.get(false).await;
        assert!(lookup.models.is_empty());
        assert!(matches!(
            lookup.error,
            Some(CatalogError::Unauthorized { status: 401, .. })
        ));
        assert_eq!(tags_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_is_cached_until_ttl() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({"data": []}))
            }
        });
        let catalog = catalog(spawn_upstream(app).await, Duration::from_secs(60));

        let first = catalog.get(false).await;
        assert!(first.models.is_empty());
        assert!(matches!(first.error, Some(CatalogError::Empty { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let second = catalog.get(false).await;
        assert!(matches!(second.error, Some(CatalogError::Empty { .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_ttl_triggers_refetch() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/v1/models",
            get(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Json(json!({"data": ["a"]}))
                }
            }),
        );
        let catalog = catalog(spawn_upstream(app).await, Duration::ZERO);

        catalog.get(false).await;
        catalog.get(false).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
