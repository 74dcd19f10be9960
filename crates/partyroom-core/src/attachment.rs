//! Durable connection identity and the lazy view over it.
//!
//! An [`Attachment`] is written onto a socket handle once, at accept time,
//! and is the only per-connection state that survives eviction. A
//! [`LazyConnection`] materializes it on first access and memoizes the result
//! against the handle in an [`AttachmentCache`] owned by the current wake
//! cycle.

use std::fmt;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use partyroom_common::PartyError;

use crate::socket::{SocketHandle, WsMessage};

/// Identity record persisted on a socket handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Connection id, unique within the room.
    pub id: String,
    /// URL of the request that opened the connection.
    pub uri: String,
}

impl Attachment {
    /// Create an attachment.
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
        }
    }
}

/// Per-socket memo of deserialized attachments.
#[derive(Debug, Default)]
pub struct AttachmentCache {
    entries: DashMap<Uuid, Attachment>,
}

impl AttachmentCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attachment of `socket`, deserializing on first access.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle carries no attachment or it is malformed.
    pub fn resolve(&self, socket: &SocketHandle) -> Result<Attachment, PartyError> {
        if let Some(entry) = self.entries.get(&socket.handle_id()) {
            return Ok(entry.clone());
        }

        let attachment: Attachment = socket.deserialize_attachment()?.ok_or_else(|| {
            PartyError::socket(format!(
                "socket {} has no attachment",
                socket.handle_id()
            ))
        })?;

        self.entries
            .insert(socket.handle_id(), attachment.clone());
        Ok(attachment)
    }

    /// Seed the cache with a known attachment.
    pub(crate) fn prime(&self, socket: &SocketHandle, attachment: Attachment) {
        self.entries.insert(socket.handle_id(), attachment);
    }

    /// Number of memoized handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been memoized.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A connection whose identity is read lazily from its socket handle.
///
/// This is the connection type handed to worker handlers by both connection
/// manager strategies.
#[derive(Clone)]
pub struct LazyConnection {
    socket: SocketHandle,
    cache: Arc<AttachmentCache>,
    identity: Arc<OnceLock<Attachment>>,
}

impl LazyConnection {
    /// Wrap a handle; nothing is read until `id()` or `uri()` is called.
    pub fn new(socket: SocketHandle, cache: Arc<AttachmentCache>) -> Self {
        Self {
            socket,
            cache,
            identity: Arc::new(OnceLock::new()),
        }
    }

    /// Wrap a handle whose attachment is already known.
    pub(crate) fn with_attachment(
        socket: SocketHandle,
        cache: Arc<AttachmentCache>,
        attachment: Attachment,
    ) -> Self {
        cache.prime(&socket, attachment.clone());
        let identity = OnceLock::new();
        let _ = identity.set(attachment);
        Self {
            socket,
            cache,
            identity: Arc::new(identity),
        }
    }

    fn identity(&self) -> &Attachment {
        self.identity.get_or_init(|| match self.cache.resolve(&self.socket) {
            Ok(attachment) => attachment,
            Err(e) => {
                warn!(socket = %self.socket.handle_id(), error = %e, "Connection has no readable identity");
                Attachment::new("", "")
            }
        })
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        &self.identity().id
    }

    /// URL of the request that opened the connection.
    pub fn uri(&self) -> &str {
        &self.identity().uri
    }

    /// Send a message to the client.
    pub fn send(&self, message: impl Into<WsMessage>) -> Result<(), PartyError> {
        self.socket.send(message)
    }

    /// Close the connection.
    pub fn close(&self, code: u16, reason: &str) {
        self.socket.close(code, reason);
    }

    /// Returns `true` while the socket is open.
    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    /// The underlying socket handle.
    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }
}

impl PartialEq for LazyConnection {
    fn eq(&self, other: &Self) -> bool {
        self.socket == other.socket
    }
}

impl Eq for LazyConnection {}

impl fmt::Debug for LazyConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyConnection")
            .field("socket", &self.socket.handle_id())
            .field("identity", &self.identity.get())
            .finish()
    }
}
