//! HTTP request conversion for rooms.
//!
//! Rooms see absolute URLs, so the origin is rebuilt from the `Host` header
//! of the incoming request.

use axum::http::request::Parts;
use axum::http::header::HOST;
use bytes::Bytes;

use partyroom_core::RoomRequest;

/// Origin used when a request carries no `Host` header.
const FALLBACK_HOST: &str = "localhost";

/// Convert axum request parts and a buffered body into a [`RoomRequest`].
pub fn room_request_from_parts(parts: &Parts, body: Bytes) -> RoomRequest {
    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or(FALLBACK_HOST);
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |pq| pq.as_str());

    let url = format!("http://{host}{path_and_query}");
    let mut request = RoomRequest::new(parts.method.as_str(), &url).with_body(body);

    request.headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect();

    request
}
