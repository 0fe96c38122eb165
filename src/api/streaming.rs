// Mirroring upstream responses back to the caller

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};

use crate::proxy::upstream::{UpstreamBody, UpstreamResponse};

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let content_type = HeaderValue::from_str(&self.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

        let mut response = match self.body {
            UpstreamBody::Json(value) => match serde_json::to_vec(&value) {
                Ok(bytes) => Response::new(Body::from(bytes)),
                Err(e) => {
                    tracing::error!("Failed to serialize upstream JSON: {}", e);
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            },
            UpstreamBody::Raw(bytes) => Response::new(Body::from(bytes)),
            UpstreamBody::Stream(stream) => Response::new(Body::from_stream(stream)),
        };

        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, content_type);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;
    use http_body_util::BodyExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_raw_body_keeps_content_type() {
        let response = UpstreamResponse {
            status: StatusCode::OK,
            content_type: "text/plain".to_string(),
            body: UpstreamBody::Raw(Bytes::from_static(b"hello")),
        }
        .into_response();

        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_json_body_keeps_upstream_content_type() {
        let response = UpstreamResponse {
            status: StatusCode::CREATED,
            content_type: "application/json; charset=utf-8".to_string(),
            body: UpstreamBody::Json(json!({"model": "a", "done": true})),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"model": "a", "done": true}));
    }

    #[tokio::test]
    async fn test_stream_body_is_passed_through() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"a\":1}\n")),
            Ok(Bytes::from_static(b"{\"done\":true}\n")),
        ];
        let response = UpstreamResponse {
            status: StatusCode::OK,
            content_type: "application/x-ndjson".to_string(),
            body: UpstreamBody::Stream(Box::pin(stream::iter(chunks))),
        }
        .into_response();

        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-ndjson");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"{\"a\":1}\n{\"done\":true}\n");
    }
}
