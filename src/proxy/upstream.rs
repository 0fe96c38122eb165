// Upstream forwarder - one HTTP call against a resolved (backend, path, model) target

use async_stream::stream;
use axum::http::StatusCode;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

use super::error::truncate_detail;
use super::paths::BackendKind;

// Constant pattern, exercised by test_model_not_found_phrases; cannot fail at runtime
static MODEL_NOT_FOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)model not found|no such model|unknown model").expect("valid regex")
});

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const JSON_CONTENT_TYPE: &str = "application/json";

/// Streamed upstream body; dropping it closes the upstream connection
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

pub enum UpstreamBody {
    Json(Value),
    Raw(Bytes),
    Stream(ByteStream),
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Raw(b) => f.debug_tuple("Raw").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Successful upstream response, ready to be mirrored to the caller
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: UpstreamBody,
}

/// Classified result of one forward attempt
#[derive(Debug)]
pub enum ForwardOutcome {
    Success(UpstreamResponse),
    /// Upstream says the model does not exist here; try the next candidate
    NotFound { status: StatusCode, detail: String },
    AuthFailure { status: StatusCode, detail: String },
    UpstreamError { status: StatusCode, detail: String },
    NetworkError(String),
}

/// One fully resolved call
#[derive(Debug, Clone)]
pub struct ForwardTarget<'a> {
    pub backend: BackendKind,
    pub url: String,
    pub model: Option<&'a str>,
    pub bearer: Option<&'a str>,
}

/// "Model missing" heuristic over an upstream error body.
///
/// Wording-dependent: an unrelated error quoting one of these phrases is misread as a miss.
pub fn is_model_not_found(body: &str) -> bool {
    MODEL_NOT_FOUND.is_match(body)
}

/// Classify a status >= 400 once its body has been read
fn classify_failure(status: StatusCode, body: &str, retry_not_found: bool) -> ForwardOutcome {
    let detail = truncate_detail(body);
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ForwardOutcome::AuthFailure { status, detail };
    }
    if retry_not_found && is_model_not_found(body) {
        return ForwardOutcome::NotFound { status, detail };
    }
    ForwardOutcome::UpstreamError { status, detail }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let media_type = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
            media_type == "application/json" || media_type.ends_with("+json")
        }
    }
}

#[derive(Clone)]
pub struct Upstream {
    http_client: reqwest::Client,
}

impl Upstream {
    pub fn new(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// Client for generation calls: model output can take minutes to start
    pub fn build_client(
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .build()
    }

    pub async fn forward(
        &self,
        target: &ForwardTarget<'_>,
        payload: &Value,
        stream: bool,
        retry_not_found: bool,
    ) -> ForwardOutcome {
        tracing::debug!(
            "Forwarding to {} upstream {} (model={}, stream={})",
            target.backend,
            target.url,
            target.model.unwrap_or("-"),
            stream
        );

        let mut request = self.http_client.post(&target.url).json(payload);
        if let Some(token) = target.bearer {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => return ForwardOutcome::NetworkError(describe_network_error(&target.url, &e)),
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status.as_u16() >= 400 {
            let body = match response.bytes().await {
                Ok(b) => String::from_utf8_lossy(&b).into_owned(),
                Err(e) => {
                    return ForwardOutcome::NetworkError(describe_network_error(&target.url, &e))
                }
            };
            return classify_failure(status, &body, retry_not_found);
        }

        if stream {
            return ForwardOutcome::Success(UpstreamResponse {
                status,
                content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                body: UpstreamBody::Stream(passthrough(response, target.url.clone())),
            });
        }

        let raw = match response.bytes().await {
            Ok(b) => b,
            Err(e) => return ForwardOutcome::NetworkError(describe_network_error(&target.url, &e)),
        };

        let body = if is_json_content_type(content_type.as_deref()) {
            match serde_json::from_slice::<Value>(&raw) {
                Ok(v) => UpstreamBody::Json(v),
                Err(_) => UpstreamBody::Raw(raw),
            }
        } else {
            UpstreamBody::Raw(raw)
        };
        let fallback_content_type = match body {
            UpstreamBody::Json(_) => JSON_CONTENT_TYPE,
            _ => DEFAULT_CONTENT_TYPE,
        };

        ForwardOutcome::Success(UpstreamResponse {
            status,
            content_type: content_type.unwrap_or_else(|| fallback_content_type.to_string()),
            body,
        })
    }
}

fn describe_network_error(url: &str, e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("timed out calling {}: {}", url, e)
    } else if e.is_connect() {
        format!("connection failed to {}: {}", url, e)
    } else {
        format!("request to {} failed: {}", url, e)
    }
}

/// Logs when a streamed upstream body is dropped, on every exit path
struct StreamRelease {
    url: String,
    bytes: usize,
}

impl Drop for StreamRelease {
    fn drop(&mut self) {
        tracing::debug!("Upstream stream released: {} ({} bytes)", self.url, self.bytes);
    }
}

/// Expose the upstream body as a byte stream that owns the response
fn passthrough(response: reqwest::Response, url: String) -> ByteStream {
    let release = StreamRelease { url, bytes: 0 };
    Box::pin(stream! {
        let mut release = release;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) if bytes.is_empty() => continue,
                Ok(bytes) => {
                    release.bytes += bytes.len();
                    yield Ok(bytes);
                }
                Err(e) => {
                    tracing::warn!("Upstream stream from {} failed: {}", release.url, e);
                    yield Err(std::io::Error::other(e));
                    break;
                }
            }
        }
    })
}
