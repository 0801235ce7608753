//! Request identification and body buffering.
//!
//! # Responsibilities
//! - Generate a unique request ID (UUID v4) when the client sent none
//! - Echo the ID on the response and forward it to backends
//! - Buffer request bodies under the configured size limit
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Declared `Content-Length` is checked before any body byte is read

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

use crate::error::ProxyError;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Produces a fresh UUID v4 per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Sets `x-request-id` on requests that lack one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies `x-request-id` from the request onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Read the whole body, failing with 413 past `limit` bytes.
pub async fn buffer_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, ProxyError> {
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ProxyError::PayloadTooLarge(limit));
    }

    axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ProxyError::PayloadTooLarge(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_request_id_is_uuid() {
        let request = Request::new(());
        let id = MakeRequestUuid.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn test_request_id_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), "unknown");
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc"));
        assert_eq!(request_id(&headers), "abc");
    }

    #[tokio::test]
    async fn test_buffer_body_limits() {
        let headers = HeaderMap::new();
        let bytes = buffer_body(&headers, Body::from("hello"), 16).await.unwrap();
        assert_eq!(&bytes[..], b"hello");

        let err = buffer_body(&headers, Body::from(vec![0u8; 32]), 16)
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge(16)));

        let mut declared = HeaderMap::new();
        declared.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1000"));
        let err = buffer_body(&declared, Body::empty(), 16).await.unwrap_err();
        assert!(matches!(err, ProxyError::PayloadTooLarge(16)));
    }
}
