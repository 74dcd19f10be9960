//! Connection roster backed by the host's socket registry.

use std::sync::Arc;

use tracing::debug;

use partyroom_common::PartyError;

use super::{ConnectionManager, Connections, ensure_unused};
use crate::attachment::{Attachment, AttachmentCache, LazyConnection};
use crate::host::SocketRegistry;
use crate::socket::SocketHandle;

/// Roster that lives in the host rather than in this process.
///
/// Nothing here is load-bearing across an eviction: every lookup asks the
/// registry for open handles and wraps them lazily, so a freshly constructed
/// manager sees exactly what the previous wake cycle left open.
pub struct PersistingConnectionManager {
    sockets: Arc<dyn SocketRegistry>,
    cache: Arc<AttachmentCache>,
}

impl PersistingConnectionManager {
    /// Create a manager over the room's socket registry.
    pub fn new(sockets: Arc<dyn SocketRegistry>) -> Self {
        Self {
            sockets,
            cache: Arc::new(AttachmentCache::new()),
        }
    }
}

impl ConnectionManager for PersistingConnectionManager {
    fn accept(
        &self,
        socket: SocketHandle,
        attachment: Attachment,
        tags: Vec<String>,
    ) -> Result<LazyConnection, PartyError> {
        ensure_unused(self, &attachment.id)?;

        let mut all_tags = Vec::with_capacity(tags.len() + 1);
        all_tags.push(attachment.id.clone());
        all_tags.extend(tags);

        // The attachment goes on before the host takes the handle: once
        // registered, the host may deliver events from another thread.
        socket.serialize_attachment(&attachment)?;
        self.sockets.accept(&socket, all_tags)?;

        debug!(connection_id = %attachment.id, "Accepted hibernatable connection");
        Ok(LazyConnection::with_attachment(
            socket,
            self.cache.clone(),
            attachment,
        ))
    }

    fn get(&self, id: &str) -> Result<Option<LazyConnection>, PartyError> {
        let mut matches = self.sockets.open_sockets(Some(id));
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop().map(|socket| self.wrap(socket))),
            n => Err(PartyError::configuration(format!(
                "{n} open connections carry the tag '{id}'; connection ids must be unique tags"
            ))),
        }
    }

    fn get_all(&self, tag: Option<&str>) -> Connections {
        Connections::new(
            self.sockets
                .open_sockets(tag)
                .into_iter()
                .map(|socket| self.wrap(socket))
                .collect(),
        )
    }

    fn wrap(&self, socket: SocketHandle) -> LazyConnection {
        LazyConnection::new(socket, self.cache.clone())
    }

    fn is_persistent(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::TestRegistry;
    use crate::socket::WebSocketPair;

    fn manager() -> (PersistingConnectionManager, Arc<TestRegistry>) {
        let registry = Arc::new(TestRegistry::default());
        (PersistingConnectionManager::new(registry.clone()), registry)
    }

    fn accept(
        manager: &PersistingConnectionManager,
        id: &str,
        tags: &[&str],
    ) -> (LazyConnection, SocketHandle) {
        let pair = WebSocketPair::new();
        let conn = manager
            .accept(
                pair.server,
                Attachment::new(id, "http://localhost/party/r"),
                tags.iter().map(ToString::to_string).collect(),
            )
            .unwrap();
        (conn, pair.client)
    }

    #[test]
    fn test_accept_registers_id_as_first_tag() {
        let (manager, registry) = manager();
        let (_conn, _client) = accept(&manager, "a", &["red"]);

        assert_eq!(registry.tags_of(0), vec!["a".to_string(), "red".to_string()]);
    }

    #[test]
    fn test_accept_writes_attachment() {
        let (manager, _registry) = manager();
        let (conn, _client) = accept(&manager, "a", &[]);

        let stored: Attachment = conn.socket().deserialize_attachment().unwrap().unwrap();
        assert_eq!(stored.id, "a");
    }

    #[test]
    fn test_get_zero_one() {
        let (manager, _registry) = manager();
        assert!(manager.get("a").unwrap().is_none());

        let (conn, _client) = accept(&manager, "a", &[]);
        assert_eq!(manager.get("a").unwrap(), Some(conn));
    }

    #[test]
    fn test_get_tag_collision_is_configuration_error() {
        let (manager, _registry) = manager();
        let (_a, _ca) = accept(&manager, "a", &["shared"]);
        let (_b, _cb) = accept(&manager, "b", &["shared"]);

        let err = manager.get("shared").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (manager, _registry) = manager();
        let (_a, _client) = accept(&manager, "a", &[]);

        let pair = WebSocketPair::new();
        let err = manager
            .accept(pair.server, Attachment::new("a", "u"), Vec::new())
            .unwrap_err();
        assert!(matches!(err, PartyError::Connect { .. }));
    }

    #[test]
    fn test_get_all_filters_by_tag() {
        let (manager, _registry) = manager();
        let (_a, _ca) = accept(&manager, "a", &["red"]);
        let (_b, _cb) = accept(&manager, "b", &["blue"]);

        let red: Vec<String> = manager
            .get_all(Some("red"))
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(red, vec!["a".to_string()]);
        assert_eq!(manager.get_all(None).len(), 2);
    }

    #[test]
    fn test_closed_sockets_drop_out() {
        let (manager, _registry) = manager();
        let (_a, client) = accept(&manager, "a", &[]);

        client.close(1000, "bye");
        assert!(manager.get("a").unwrap().is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_fresh_manager_sees_previous_roster() {
        let registry = Arc::new(TestRegistry::default());
        let first = PersistingConnectionManager::new(registry.clone());
        let (_a, _client) = accept(&first, "survivor", &[]);
        drop(first);

        let second = PersistingConnectionManager::new(registry);
        let conn = second.get("survivor").unwrap().unwrap();
        assert_eq!(conn.id(), "survivor");
        assert!(second.legacy_map().contains_key("survivor"));
    }
}
