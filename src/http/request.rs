//! Request identity and translation into a [`RequestContext`].
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - An inbound `x-request-id` is kept; otherwise a UUID v4 is minted
//! - The body is buffered once so filters and shadows can read it

use axum::body::{Body, Bytes};
use axum::http::{request::Parts, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::chain::RequestContext;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Mints UUID v4 request ids for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Build the filter context for one inbound request.
pub fn context_from_parts(parts: &Parts, body: Bytes) -> RequestContext {
    let request_id = parts
        .headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let mut ctx = RequestContext::new(parts.method.as_str(), parts.uri.path()).with_request_id(request_id);
    ctx.query = parts.uri.query().map(str::to_string);
    for (name, value) in &parts.headers {
        // Non-UTF-8 header values are not visible to filters.
        if let Ok(value) = value.to_str() {
            ctx.set_request_header(name.as_str(), value);
        }
    }
    ctx.request_body = body.to_vec();
    ctx
}

/// Split a request and buffer its body up to `limit` bytes.
pub async fn buffer(request: Request<Body>, limit: usize) -> Result<(Parts, Bytes), axum::Error> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit).await?;
    Ok((parts, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_parts() {
        let request = Request::builder()
            .method("POST")
            .uri("/api/users?page=2")
            .header("X-Request-Id", "abc")
            .header("X-Api-Key", "secret")
            .body(())
            .unwrap();
        let (parts, _) = request.into_parts();

        let ctx = context_from_parts(&parts, Bytes::from_static(b"{}"));
        assert_eq!(ctx.request_id, "abc");
        assert_eq!(ctx.method, "POST");
        assert_eq!(ctx.path, "/api/users");
        assert_eq!(ctx.query.as_deref(), Some("page=2"));
        assert_eq!(ctx.request_header("x-api-key"), Some("secret"));
        assert_eq!(ctx.request_body, b"{}");
    }

    #[test]
    fn test_mints_uuid() {
        let request = Request::builder().body(()).unwrap();
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }
}
