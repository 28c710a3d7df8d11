//! Request echo.
//!
//! `GET|POST /_/echo` answers `208 Already Reported` with the request
//! rendered back in HTTP/1.x wire form, and logs the same dump.

use axum::body::Bytes;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode, Uri, Version};
use axum::response::IntoResponse;
use tracing::{info, instrument};

#[instrument(skip_all)]
pub async fn echo(
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let dump = dump_request(&method, &uri, version, &headers, &body);
    info!(dump = %String::from_utf8_lossy(&dump), "Echoing request");

    (
        StatusCode::ALREADY_REPORTED,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        dump,
    )
}

/// Render a request as `METHOD target VERSION`, headers, blank line, body.
fn dump_request(
    method: &Method,
    uri: &Uri,
    version: Version,
    headers: &HeaderMap,
    body: &[u8],
) -> Vec<u8> {
    let target = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), ToString::to_string);

    let mut out = format!("{method} {target} {version:?}\r\n").into_bytes();
    for (name, value) in headers {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::HeaderValue;

    #[test]
    fn test_dump_layout() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("webprobe.local"));
        headers.insert("x-test", HeaderValue::from_static("1"));
        let uri: Uri = "/_/echo?a=b".parse().unwrap();

        let dump = dump_request(&Method::POST, &uri, Version::HTTP_11, &headers, b"hello");

        assert_eq!(
            String::from_utf8(dump).unwrap(),
            "POST /_/echo?a=b HTTP/1.1\r\nhost: webprobe.local\r\nx-test: 1\r\n\r\nhello"
        );
    }

    #[test]
    fn test_dump_without_body() {
        let uri: Uri = "/_/echo".parse().unwrap();
        let dump = dump_request(
            &Method::GET,
            &uri,
            Version::HTTP_10,
            &HeaderMap::new(),
            b"",
        );
        assert_eq!(dump, b"GET /_/echo HTTP/1.0\r\n\r\n");
    }

    #[tokio::test]
    async fn test_echo_status_and_body() {
        let response = echo(
            Method::POST,
            "/_/echo".parse().unwrap(),
            Version::HTTP_11,
            HeaderMap::new(),
            Bytes::from_static(b"ping"),
        )
        .await
        .into_response();

        assert_eq!(response.status(), StatusCode::ALREADY_REPORTED);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(body.ends_with(b"\r\n\r\nping"));
    }
}
