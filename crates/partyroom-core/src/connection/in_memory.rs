//! Connection roster kept in process memory.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use partyroom_common::PartyError;

use super::{ConnectionManager, Connections, ensure_unused};
use crate::attachment::{Attachment, AttachmentCache, LazyConnection};
use crate::socket::SocketHandle;

struct Entry {
    connection: LazyConnection,
    tags: Vec<String>,
}

type Roster = Mutex<Vec<Entry>>;

/// Roster for workers that cannot hibernate.
///
/// There is no host redelivery for these sockets, so `accept` wires a close
/// listener on each handle that drops it from the roster when the socket
/// closes or fails.
#[derive(Default)]
pub struct InMemoryConnectionManager {
    roster: Arc<Roster>,
    cache: Arc<AttachmentCache>,
}

impl InMemoryConnectionManager {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    fn watch_close(&self, socket: SocketHandle) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Closed entries are still filtered out on every read.
            return;
        };

        let roster: Weak<Roster> = Arc::downgrade(&self.roster);
        runtime.spawn(async move {
            socket.closed().await;
            if let Some(roster) = roster.upgrade() {
                roster
                    .lock()
                    .retain(|entry| entry.connection.socket() != &socket);
            }
        });
    }
}

impl ConnectionManager for InMemoryConnectionManager {
    fn accept(
        &self,
        socket: SocketHandle,
        attachment: Attachment,
        tags: Vec<String>,
    ) -> Result<LazyConnection, PartyError> {
        ensure_unused(self, &attachment.id)?;

        socket.accept()?;
        socket.serialize_attachment(&attachment)?;

        let mut all_tags = Vec::with_capacity(tags.len() + 1);
        all_tags.push(attachment.id.clone());
        all_tags.extend(tags);

        let connection =
            LazyConnection::with_attachment(socket.clone(), self.cache.clone(), attachment);
        self.roster.lock().push(Entry {
            connection: connection.clone(),
            tags: all_tags,
        });
        self.watch_close(socket);

        debug!(connection_id = %connection.id(), "Accepted in-memory connection");
        Ok(connection)
    }

    fn get(&self, id: &str) -> Result<Option<LazyConnection>, PartyError> {
        let mut matches = self.get_all(Some(id)).collect::<Vec<_>>();
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            n => Err(PartyError::configuration(format!(
                "{n} open connections carry the tag '{id}'; connection ids must be unique tags"
            ))),
        }
    }

    fn get_all(&self, tag: Option<&str>) -> Connections {
        let roster = self.roster.lock();
        Connections::new(
            roster
                .iter()
                .filter(|entry| entry.connection.is_open())
                .filter(|entry| tag.is_none_or(|tag| entry.tags.iter().any(|t| t == tag)))
                .map(|entry| entry.connection.clone())
                .collect(),
        )
    }

    fn wrap(&self, socket: SocketHandle) -> LazyConnection {
        let roster = self.roster.lock();
        roster
            .iter()
            .find(|entry| entry.connection.socket() == &socket)
            .map_or_else(
                || LazyConnection::new(socket.clone(), self.cache.clone()),
                |entry| entry.connection.clone(),
            )
    }

    fn is_persistent(&self) -> bool {
        false
    }
}
