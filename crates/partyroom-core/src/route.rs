//! Room path parsing.
//!
//! Two path shapes address a room:
//! - `/party/:room` addresses `room` in the main party
//! - `/parties/:party/:room` addresses `room` in `party`
//!
//! Segments after the room id are allowed and ignored for addressing, so a
//! room can serve sub-paths of its own.

/// Result of parsing a request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePath {
    /// The path addresses a room.
    Room {
        /// Party namespace.
        party: String,
        /// Room name within the party.
        room: String,
    },
    /// The path does not address a room.
    Unmatched,
}

impl RoutePath {
    /// Parse `path`, resolving the short form to `main_party`.
    pub fn parse(path: &str, main_party: &str) -> Self {
        let mut segments = path.trim_start_matches('/').split('/');

        let (party, room) = match segments.next() {
            Some("party") => (Some(main_party), segments.next()),
            Some("parties") => (segments.next(), segments.next()),
            _ => (None, None),
        };

        match (party, room) {
            (Some(party), Some(room)) if !party.is_empty() && !room.is_empty() => Self::Room {
                party: party.to_string(),
                room: room.to_string(),
            },
            _ => Self::Unmatched,
        }
    }

    /// Returns `true` if the path addresses a room.
    pub fn is_room(&self) -> bool {
        matches!(self, Self::Room { .. })
    }
}

/// Path under which a room is reachable from inside the runtime.
pub fn room_path(party: &str, room: &str) -> String {
    format!("/parties/{party}/{room}")
}
