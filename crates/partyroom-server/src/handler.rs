//! Request handlers.
//!
//! Everything that is not a health check or an admin route lands in
//! [`handle_edge`], which hands the request to the edge router and turns the
//! room's answer back into HTTP.

use axum::extract::{Request, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{debug, instrument, warn};

use partyroom_core::{ABNORMAL_CLOSURE_CODE, SWITCHING_PROTOCOLS};

use crate::bridge::bridge;
use crate::request::room_request_from_parts;
use crate::response::into_axum_response;
use crate::state::AppState;

/// Route any request through the edge router.
///
/// This handler:
/// 1. Buffers the body up to the configured limit
/// 2. Converts the request and routes it to a room (or a fallback)
/// 3. Bridges the returned socket onto the upgraded connection, or converts
///    the plain response
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle_edge(
    State(state): State<AppState>,
    upgrade: Option<WebSocketUpgrade>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.max_body_bytes()).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Request body rejected");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let room_request = room_request_from_parts(&parts, body);
    let mut response = state.host().fetch(room_request).await;

    let Some(client) = response.web_socket.take() else {
        return into_axum_response(response);
    };

    match upgrade {
        Some(upgrade) => {
            if response.status != SWITCHING_PROTOCOLS {
                debug!(status = response.status, "Bridging socket from a non-101 response");
            }
            upgrade.on_upgrade(move |ws| bridge(ws, client))
        }
        None => {
            warn!("Room returned a socket for a request that cannot be upgraded");
            client.close(ABNORMAL_CLOSURE_CODE, "request cannot be upgraded");
            (StatusCode::UPGRADE_REQUIRED, "WebSocket upgrade required").into_response()
        }
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler.
///
/// Returns 200 OK with the configured parties and resident rooms.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let parties = state.party_names();
    let body = serde_json::json!({
        "status": "ready",
        "parties": parties.len(),
        "live_rooms": state.host().live_rooms().len(),
    });

    (StatusCode::OK, axum::Json(body))
}
