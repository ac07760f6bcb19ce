//! HTTP utility functions

use hyper::{header::{HeaderName, HeaderValue}, Body, HeaderMap, Response, StatusCode};
use crate::models::HeaderFields;
use tracing::debug;

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    let hop_by_hop_headers = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    hop_by_hop_headers.contains(&name.to_lowercase().as_str())
}

/// Collect header values by lowercased name, dropping hop-by-hop headers.
///
/// Repeated headers keep every value in arrival order.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderFields {
    let mut map = HeaderFields::new();
    let mut skipped = 0;

    for (name, value) in headers {
        if is_hop_by_hop_header(name.as_str()) {
            skipped += 1;
            continue;
        }
        if let Ok(value_str) = value.to_str() {
            map.entry(name.as_str().to_lowercase())
                .or_default()
                .push(value_str.to_string());
        }
    }

    debug!("Extracted {} headers ({} hop-by-hop skipped)", map.len(), skipped);
    map
}

/// Rebuild a HeaderMap, appending every value of repeated headers
pub fn map_to_headers(map: &HeaderFields) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, values) in map {
        let name = match name.parse::<HeaderName>() {
            Ok(name) => name,
            Err(_) => continue,
        };
        for value in values {
            if let Ok(value) = value.parse::<HeaderValue>() {
                headers.append(name.clone(), value);
            }
        }
    }

    headers
}

/// Build error response
pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Body::from(message.to_string()));
    *response.status_mut() = status;
    response
}
