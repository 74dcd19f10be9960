//! Linked socket pairs and raw socket handles.
//!
//! A [`WebSocketPair`] is two [`SocketHandle`]s wired back to back: whatever
//! one end sends lands in the other end's inbound queue. The room keeps the
//! `server` end; the `client` end is handed back in the upgrade response and
//! bridged onto the real connection by whoever serves HTTP.
//!
//! A handle is the one durable thing a room owns. The host keeps accepted
//! handles open while the room's memory is evicted, and the opaque attachment
//! slot on the handle is the only per-connection state that survives.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use partyroom_common::PartyError;

/// Close code used when a connect-time failure is reported over the socket.
pub const ABNORMAL_CLOSURE_CODE: u16 = 1011;

/// Close code for an orderly close.
pub const NORMAL_CLOSURE_CODE: u16 = 1000;

/// Close code recorded when a socket dies without a close handshake.
pub const ABNORMAL_DROP_CODE: u16 = 1006;

/// A WebSocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl WsMessage {
    /// Text content, if this is a text frame.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Returns `true` if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for WsMessage {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for WsMessage {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for WsMessage {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

impl From<Bytes> for WsMessage {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

/// Code and reason of a close handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close code.
    pub code: u16,
    /// Close reason.
    pub reason: String,
}

/// An event raised on a socket by its peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// The peer sent a message.
    Message(WsMessage),
    /// The peer closed the connection.
    Close(CloseFrame),
    /// The connection failed.
    Error(String),
}

/// Lifecycle of a socket handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Created but not yet accepted.
    Connecting,
    /// Accepted; messages flow.
    Open,
    /// Closed by either side.
    Closed,
}

/// Single-consumer stream of inbound socket events.
#[derive(Debug)]
pub struct SocketEvents {
    rx: mpsc::UnboundedReceiver<SocketEvent>,
}

impl SocketEvents {
    /// Wait for the next event.
    ///
    /// Consumers stop after a `Close` or `Error` event; nothing follows them.
    pub async fn next(&mut self) -> Option<SocketEvent> {
        self.rx.recv().await
    }

    /// Wait for the next event on `socket`, giving up once it is closed.
    ///
    /// A socket closed from its own side receives no `Close` event, so plain
    /// `next` would wait forever on it.
    pub async fn next_while_open(&mut self, socket: &SocketHandle) -> Option<SocketEvent> {
        tokio::select! {
            biased;
            event = self.rx.recv() => event,
            () = socket.closed() => self.rx.try_recv().ok(),
        }
    }
}

struct SocketInner {
    id: Uuid,
    state: watch::Sender<ReadyState>,
    inbox_tx: mpsc::UnboundedSender<SocketEvent>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<SocketEvent>>>,
    peer: Mutex<Weak<SocketInner>>,
    close_frame: Mutex<Option<CloseFrame>>,
    attachment: RwLock<Option<serde_json::Value>>,
}

impl SocketInner {
    fn new() -> Arc<Self> {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ReadyState::Connecting);
        Arc::new(Self {
            id: Uuid::new_v4(),
            state,
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            peer: Mutex::new(Weak::new()),
            close_frame: Mutex::new(None),
            attachment: RwLock::new(None),
        })
    }

    fn ready_state(&self) -> ReadyState {
        *self.state.borrow()
    }

    /// Record the close frame (first writer wins) and mark the end closed.
    fn mark_closed(&self, frame: CloseFrame) {
        {
            let mut slot = self.close_frame.lock();
            if slot.is_none() {
                *slot = Some(frame);
            }
        }
        self.state.send_replace(ReadyState::Closed);
    }
}

/// A raw socket handle.
///
/// Cloning a handle yields another reference to the same socket; equality is
/// handle identity.
#[derive(Clone)]
pub struct SocketHandle {
    inner: Arc<SocketInner>,
}

impl SocketHandle {
    /// Stable identity of this handle.
    pub fn handle_id(&self) -> Uuid {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn ready_state(&self) -> ReadyState {
        self.inner.ready_state()
    }

    /// Returns `true` while messages can be sent.
    pub fn is_open(&self) -> bool {
        self.ready_state() == ReadyState::Open
    }

    /// Move from `Connecting` to `Open`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle was already accepted or closed.
    pub fn accept(&self) -> Result<(), PartyError> {
        let mut accepted = false;
        self.inner.state.send_if_modified(|state| {
            if *state == ReadyState::Connecting {
                *state = ReadyState::Open;
                accepted = true;
                true
            } else {
                false
            }
        });

        if accepted {
            Ok(())
        } else {
            Err(PartyError::socket(format!(
                "socket {} cannot be accepted in state {:?}",
                self.inner.id,
                self.ready_state()
            )))
        }
    }

    /// Send a message to the peer.
    ///
    /// # Errors
    ///
    /// Returns an error if this end is not open or the peer is gone.
    pub fn send(&self, message: impl Into<WsMessage>) -> Result<(), PartyError> {
        if !self.is_open() {
            return Err(PartyError::socket(format!(
                "socket {} is not open",
                self.inner.id
            )));
        }

        let peer = self.peer()?;
        if peer.ready_state() == ReadyState::Closed {
            return Err(PartyError::socket("peer socket is closed"));
        }

        peer.inbox_tx
            .send(SocketEvent::Message(message.into()))
            .map_err(|_| PartyError::socket("peer socket is gone"))
    }

    /// Close the socket, notifying the peer.
    ///
    /// Closing an already closed socket is a no-op.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }

        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.inner.mark_closed(frame.clone());

        if let Ok(peer) = self.peer() {
            if peer.ready_state() != ReadyState::Closed {
                let _ = peer.inbox_tx.send(SocketEvent::Close(frame.clone()));
                peer.mark_closed(frame);
            }
        }
    }

    /// Tear the connection down without a close handshake.
    ///
    /// The peer receives an `Error` event and both ends record code 1006.
    pub fn fail(&self, reason: impl Into<String>) {
        if self.ready_state() == ReadyState::Closed {
            return;
        }

        let reason = reason.into();
        let frame = CloseFrame {
            code: ABNORMAL_DROP_CODE,
            reason: reason.clone(),
        };
        self.inner.mark_closed(frame.clone());

        if let Ok(peer) = self.peer() {
            if peer.ready_state() != ReadyState::Closed {
                let _ = peer.inbox_tx.send(SocketEvent::Error(reason));
                peer.mark_closed(frame);
            }
        }
    }

    /// The close frame recorded on this end, if it is closed.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.inner.close_frame.lock().clone()
    }

    /// Take the inbound event stream.
    ///
    /// Only one consumer may listen; later calls return `None`.
    pub fn take_events(&self) -> Option<SocketEvents> {
        self.inner
            .inbox_rx
            .lock()
            .take()
            .map(|rx| SocketEvents { rx })
    }

    /// Resolve once this end is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| *state == ReadyState::Closed).await;
    }

    /// Store a serializable value on the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn serialize_attachment<T: Serialize>(&self, value: &T) -> Result<(), PartyError> {
        let value = serde_json::to_value(value)?;
        *self.inner.attachment.write() = Some(value);
        Ok(())
    }

    /// Read the value stored on the handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value does not deserialize into `T`.
    pub fn deserialize_attachment<T: DeserializeOwned>(&self) -> Result<Option<T>, PartyError> {
        let guard = self.inner.attachment.read();
        match guard.as_ref() {
            Some(value) => Ok(Some(T::deserialize(value)?)),
            None => Ok(None),
        }
    }

    /// Returns `true` if an attachment has been written.
    pub fn has_attachment(&self) -> bool {
        self.inner.attachment.read().is_some()
    }

    fn peer(&self) -> Result<Arc<SocketInner>, PartyError> {
        self.inner
            .peer
            .lock()
            .upgrade()
            .ok_or_else(|| PartyError::socket("peer socket is gone"))
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for SocketHandle {}

impl fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandle")
            .field("id", &self.inner.id)
            .field("state", &self.ready_state())
            .finish_non_exhaustive()
    }
}

/// Two linked socket ends.
#[derive(Debug, Clone)]
pub struct WebSocketPair {
    /// End handed to the caller in the upgrade response.
    pub client: SocketHandle,
    /// End kept by the room.
    pub server: SocketHandle,
}

impl WebSocketPair {
    /// Create a linked pair. Both ends start in `Connecting`.
    pub fn new() -> Self {
        let client = SocketInner::new();
        let server = SocketInner::new();
        *client.peer.lock() = Arc::downgrade(&server);
        *server.peer.lock() = Arc::downgrade(&client);

        Self {
            client: SocketHandle { inner: client },
            server: SocketHandle { inner: server },
        }
    }
}

impl Default for WebSocketPair {
    fn default() -> Self {
        Self::new()
    }
}
