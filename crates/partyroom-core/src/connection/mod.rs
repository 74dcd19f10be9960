//! Connection management for a room.
//!
//! Two interchangeable strategies implement [`ConnectionManager`]:
//! - [`PersistingConnectionManager`]: sockets are accepted through the host's
//!   hibernation-eligible primitive and found again by tag, so the roster
//!   survives the room's memory being evicted.
//! - [`InMemoryConnectionManager`]: a roster kept in this process, for workers
//!   that cannot hibernate.
//!
//! A room picks one strategy when its worker is constructed and keeps it for
//! the rest of the wake cycle.

mod in_memory;
mod persisting;

use std::collections::HashMap;

use partyroom_common::{PartyError, RoomConfig};

use crate::attachment::{Attachment, LazyConnection};
use crate::socket::SocketHandle;

pub use in_memory::InMemoryConnectionManager;
pub use persisting::PersistingConnectionManager;

/// Roster of a room's live connections.
pub trait ConnectionManager: Send + Sync {
    /// Accept `socket` as the connection described by `attachment`.
    ///
    /// The connection id is always registered as a tag, ahead of `tags`.
    fn accept(
        &self,
        socket: SocketHandle,
        attachment: Attachment,
        tags: Vec<String>,
    ) -> Result<LazyConnection, PartyError>;

    /// Look a connection up by id.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if more than one open socket carries the
    /// id tag; ids are unique tags, so this is a tag collision in user code.
    fn get(&self, id: &str) -> Result<Option<LazyConnection>, PartyError>;

    /// Snapshot of the open connections, optionally filtered by tag.
    fn get_all(&self, tag: Option<&str>) -> Connections;

    /// View an already-accepted socket as a connection.
    fn wrap(&self, socket: SocketHandle) -> LazyConnection;

    /// Returns `true` if this roster survives eviction.
    fn is_persistent(&self) -> bool;

    /// Legacy id-keyed view of every open connection.
    fn legacy_map(&self) -> HashMap<String, LazyConnection> {
        self.get_all(None)
            .map(|conn| (conn.id().to_string(), conn))
            .collect()
    }

    /// Number of open connections.
    fn count(&self) -> usize {
        self.get_all(None).len()
    }
}

/// Single-pass snapshot of connections taken when it was created.
#[derive(Debug)]
pub struct Connections {
    inner: std::vec::IntoIter<LazyConnection>,
}

impl Connections {
    pub(crate) fn new(connections: Vec<LazyConnection>) -> Self {
        Self {
            inner: connections.into_iter(),
        }
    }

    /// An empty snapshot.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for Connections {
    type Item = LazyConnection;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Connections {}

/// Check user-supplied tags against the configured limits.
///
/// `tags` excludes the id tag, which always occupies one slot.
pub fn validate_tags(tags: &[String], config: &RoomConfig) -> Result<(), PartyError> {
    if tags.len() + 1 > config.max_connection_tags {
        return Err(PartyError::connect(format!(
            "A connection can only have {} tags, including the default id tag.",
            config.max_connection_tags
        )));
    }

    for tag in tags {
        if tag.is_empty() {
            return Err(PartyError::connect("Connection tags must not be empty."));
        }
        if tag.len() > config.max_tag_length {
            return Err(PartyError::connect(format!(
                "Connection tags must be at most {} characters.",
                config.max_tag_length
            )));
        }
    }

    Ok(())
}

/// Reject an id that already belongs to an open connection.
fn ensure_unused(manager: &dyn ConnectionManager, id: &str) -> Result<(), PartyError> {
    if manager.get(id)?.is_some() {
        return Err(PartyError::connect(format!(
            "Connection id '{id}' is already in use in this room"
        )));
    }
    Ok(())
}
