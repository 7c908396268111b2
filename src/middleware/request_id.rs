//! Request correlation.
//!
//! Every request runs inside a span carrying its request id. The id is
//! taken from an incoming `X-Request-Id` when it looks sane, echoed on the
//! response, and copied into JSON error bodies.

use axum::{
    body::Body,
    extract::Request,
    http::{
        HeaderValue,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use tracing::Instrument;
use uuid::Uuid;

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest incoming request id we propagate.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Extension containing the request ID for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied id if it is short printable ASCII.
    pub fn from_header(value: &HeaderValue) -> Option<Self> {
        let s = value.to_str().ok()?;
        let ok = !s.is_empty()
            && s.len() <= MAX_REQUEST_ID_LEN
            && s.bytes().all(|b| b.is_ascii_graphic());
        ok.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

pub async fn request_id_middleware(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(RequestId::from_header)
        .unwrap_or_default();

    req.extensions_mut().insert(request_id.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    async move {
        let response = next.run(req).await;
        let mut response = inject_request_id_into_error(response, &request_id).await;

        if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Add `error.request_id` to JSON error bodies.
async fn inject_request_id_into_error(response: Response, request_id: &RequestId) -> Response {
    let status = response.status();
    if !status.is_client_error() && !status.is_server_error() {
        return response;
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));
    if !is_json {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return (parts, Body::empty()).into_response(),
    };

    let body = match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(mut json) => {
            if let Some(error) = json.get_mut("error").and_then(|e| e.as_object_mut()) {
                error.insert("request_id".to_string(), request_id.as_str().into());
            }
            serde_json::to_vec(&json).unwrap_or_else(|_| bytes.to_vec())
        }
        Err(_) => bytes.to_vec(),
    };

    parts.headers.remove(CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(body))
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode, routing::get};
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;
    use crate::auth::AuthError;

    fn app() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route("/denied", get(|| async { AuthError::Unauthorized }))
            .layer(axum::middleware::from_fn(request_id_middleware))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[rstest]
    #[case("abc-123", true)]
    #[case("", false)]
    #[case("has space", false)]
    fn test_incoming_id_validation(#[case] raw: &str, #[case] accepted: bool) {
        let value = HeaderValue::from_str(raw).unwrap();
        assert_eq!(RequestId::from_header(&value).is_some(), accepted);
    }

    #[test]
    fn test_overlong_id_rejected() {
        let value = HeaderValue::from_str(&"a".repeat(MAX_REQUEST_ID_LEN + 1)).unwrap();
        assert!(RequestId::from_header(&value).is_none());
    }

    #[tokio::test]
    async fn test_incoming_id_echoed() {
        let response = app()
            .oneshot(
                http::Request::get("/ok")
                    .header(REQUEST_ID_HEADER, "trace-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-42");
    }

    #[tokio::test]
    async fn test_generated_id_when_absent() {
        let response = app()
            .oneshot(http::Request::get("/ok").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let id = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn test_error_body_carries_request_id() {
        let response = app()
            .oneshot(
                http::Request::get("/denied")
                    .header(REQUEST_ID_HEADER, "trace-43")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let json = body_json(response).await;
        assert_eq!(json["error"]["request_id"], "trace-43");
        assert_eq!(json["error"]["code"], "unauthorized");
    }

    #[tokio::test]
    async fn test_non_json_error_untouched() {
        let response = inject_request_id_into_error(
            Response::builder()
                .status(StatusCode::BAD_REQUEST)
                .header(CONTENT_TYPE, "text/plain")
                .body(Body::from("Bad Request"))
                .unwrap(),
            &RequestId::new(),
        )
        .await;

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), b"Bad Request");
    }
}
