//! Admin API handlers for room management.
//!
//! This module provides HTTP handlers for inspecting the host and forcing
//! rooms into hibernation.
//!
//! # Authentication
//!
//! All Admin API endpoints require the `X-Admin-Token` header
//! to match the configured admin token. The comparison is constant time.
//!
//! # Endpoints
//!
//! - `GET /admin/parties` - List configured parties
//! - `GET /admin/rooms` - List resident rooms
//! - `POST /admin/rooms/hibernate` - Hibernate every room that allows it
//! - `POST /admin/rooms/:party/:room/hibernate` - Hibernate one room

use axum::{
    Extension, Json, Router,
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument, warn};

use partyroom_host::{HibernateOutcome, RoomSummary};

use crate::state::AppState;

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Admin API state containing app state and auth token.
#[derive(Clone)]
pub struct AdminState {
    /// Application state (host, limits).
    pub app_state: AppState,
    /// Expected admin token for authentication.
    pub admin_token: String,
}

/// Resident room information for API responses.
#[derive(Debug, Serialize)]
pub struct RoomInfo {
    /// Party name.
    pub party: String,
    /// Room name, if known yet.
    pub room: Option<String>,
    /// Host address.
    pub address: String,
    /// Worker lifecycle state.
    pub state: String,
    /// Open connections.
    pub connections: usize,
    /// Whether the room could be hibernated now.
    pub hibernatable: bool,
}

impl From<RoomSummary> for RoomInfo {
    fn from(summary: RoomSummary) -> Self {
        Self {
            party: summary.party,
            room: summary.room,
            address: summary.address.to_string(),
            state: format!("{:?}", summary.state).to_lowercase(),
            connections: summary.connections,
            hibernatable: summary.hibernatable,
        }
    }
}

/// Build the Admin API router.
///
/// Returns a router that uses Extension to pass the admin state,
/// allowing it to be nested into routers with different state types.
pub fn build_admin_router(admin_state: AdminState) -> Router<AppState> {
    Router::new()
        .route("/parties", get(list_parties))
        .route("/rooms", get(list_rooms))
        .route("/rooms/hibernate", post(hibernate_all))
        .route("/rooms/:party/:room/hibernate", post(hibernate_room))
        .layer(Extension(admin_state))
}

/// Verify the admin token from request headers.
fn verify_token(headers: &HeaderMap, expected: &str) -> Result<(), (StatusCode, &'static str)> {
    let Some(token) = headers.get(ADMIN_TOKEN_HEADER) else {
        return Err((StatusCode::UNAUTHORIZED, "Missing X-Admin-Token header"));
    };

    if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "Invalid admin token"))
    }
}

/// List configured parties.
///
/// # Response
///
/// ```json
/// { "parties": ["chat", "main"], "count": 2 }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn list_parties(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let parties = admin_state.app_state.party_names();
    let count = parties.len();
    Json(serde_json::json!({
        "parties": parties,
        "count": count,
    }))
    .into_response()
}

/// List resident rooms.
///
/// # Response
///
/// ```json
/// {
///   "rooms": [
///     {
///       "party": "main",
///       "room": "lobby",
///       "address": "5f0c...",
///       "state": "ready",
///       "connections": 2,
///       "hibernatable": true
///     }
///   ],
///   "count": 1
/// }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn list_rooms(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let rooms: Vec<RoomInfo> = admin_state
        .app_state
        .host()
        .live_rooms()
        .into_iter()
        .map(RoomInfo::from)
        .collect();
    let count = rooms.len();

    Json(serde_json::json!({
        "rooms": rooms,
        "count": count,
    }))
    .into_response()
}

/// Hibernate one room.
///
/// Answers 404 for an unknown party and 409 when the room holds
/// connections that cannot survive eviction.
///
/// # Response
///
/// ```json
/// { "party": "main", "room": "lobby", "outcome": "evicted" }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn hibernate_room(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
    Path((party, room)): Path<(String, String)>,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let host = admin_state.app_state.host();
    let Some(address) = host.address_of(&party, &room) else {
        return (StatusCode::NOT_FOUND, format!("Party not found: {party}")).into_response();
    };

    let (status, outcome) = match host.hibernate(address) {
        HibernateOutcome::Evicted => {
            info!(party = %party, room_id = %room, "Room hibernated by admin");
            (StatusCode::OK, "evicted")
        }
        HibernateOutcome::NotResident => (StatusCode::OK, "not_resident"),
        HibernateOutcome::Refused => {
            warn!(party = %party, room_id = %room, "Room refused hibernation");
            (StatusCode::CONFLICT, "refused")
        }
    };

    (
        status,
        Json(serde_json::json!({
            "party": party,
            "room": room,
            "outcome": outcome,
        })),
    )
        .into_response()
}

/// Hibernate every room that allows it.
///
/// # Response
///
/// ```json
/// { "evicted": 3 }
/// ```
#[instrument(skip(admin_state, headers))]
pub async fn hibernate_all(
    Extension(admin_state): Extension<AdminState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Err(e) = verify_token(&headers, &admin_state.admin_token) {
        return e.into_response();
    }

    let evicted = admin_state.app_state.host().hibernate_all();
    info!(evicted, "Rooms hibernated by admin");
    Json(serde_json::json!({ "evicted": evicted })).into_response()
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_verify_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, "secret".parse().unwrap());

        assert_ok!(verify_token(&headers, "secret"));
    }

    #[test]
    fn test_verify_token_invalid() {
        let mut headers = HeaderMap::new();
        headers.insert(ADMIN_TOKEN_HEADER, "secret-but-longer".parse().unwrap());

        let (status, _) = assert_err!(verify_token(&headers, "secret"));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_verify_token_missing() {
        let headers = HeaderMap::new();

        let (status, message) = assert_err!(verify_token(&headers, "secret"));
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(message, "Missing X-Admin-Token header");
    }
}
