//! HTTP response conversion from rooms.
//!
//! Plain [`RoomResponse`]s map one to one onto axum responses. Upgrade
//! responses are handled by the edge handler, which bridges the socket.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use tracing::warn;

use partyroom_core::RoomResponse;

/// Convert a room response into an axum response.
///
/// Headers that are not valid HTTP are dropped. A status outside the valid
/// range becomes a 500.
pub fn into_axum_response(response: RoomResponse) -> Response<Body> {
    let status = StatusCode::from_u16(response.status).unwrap_or_else(|_| {
        warn!(status = response.status, "Room answered with an invalid status");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = status;

    let headers = out.headers_mut();
    for (name, value) in &response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            headers.append(name, value);
        }
    }

    out
}
