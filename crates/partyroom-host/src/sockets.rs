//! Per-room registry of hibernatable sockets.
//!
//! [`LocalSockets`] keeps accepted handles and their tags for one address
//! and owns event delivery for them: each accepted socket gets a pump task
//! that wakes the room's runtime for every inbound event, whether or not the
//! runtime was evicted in between.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Instrument, debug, info_span, warn};

use partyroom_common::PartyError;
use partyroom_core::{
    ReadyState, RoomAddress, RoomRuntime, SocketEvent, SocketEvents, SocketHandle, SocketRegistry,
};

/// Produces the runtime for an address, creating it if it was evicted.
pub type Resurrect = Arc<dyn Fn() -> Option<Arc<RoomRuntime>> + Send + Sync>;

struct Entry {
    socket: SocketHandle,
    tags: Vec<String>,
}

/// Socket registry for one room address.
pub struct LocalSockets {
    address: RoomAddress,
    entries: Mutex<Vec<Entry>>,
    resurrect: Resurrect,
}

impl LocalSockets {
    /// Create a registry whose events are delivered through `resurrect`.
    pub fn new(address: RoomAddress, resurrect: Resurrect) -> Self {
        Self {
            address,
            entries: Mutex::new(Vec::new()),
            resurrect,
        }
    }

    /// Number of registered sockets that are still open.
    pub fn open_count(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.socket.is_open())
            .count()
    }

    fn spawn_pump(&self, socket: SocketHandle, events: SocketEvents) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(address = %self.address, "No async runtime; socket events will not be delivered");
            return;
        };

        let span = info_span!("pump", address = %self.address, socket = %socket.handle_id());
        runtime.spawn(pump(socket, events, self.resurrect.clone()).instrument(span));
    }
}

async fn pump(socket: SocketHandle, mut events: SocketEvents, resurrect: Resurrect) {
    while let Some(event) = events.next_while_open(&socket).await {
        let Some(runtime) = resurrect() else {
            debug!("Host is gone; stopping delivery");
            return;
        };

        let terminal = !matches!(event, SocketEvent::Message(_));
        let result = match event {
            SocketEvent::Message(message) => {
                runtime.on_hibernated_message(socket.clone(), message).await
            }
            SocketEvent::Close(frame) => runtime.on_hibernated_close(socket.clone(), frame).await,
            SocketEvent::Error(reason) => runtime.on_hibernated_error(socket.clone(), reason).await,
        };

        if let Err(e) = result {
            warn!(error = %e, "Hibernated socket handler failed");
        }
        if terminal {
            break;
        }
    }
    debug!("Socket pump finished");
}

impl SocketRegistry for LocalSockets {
    fn accept(&self, socket: &SocketHandle, tags: Vec<String>) -> Result<(), PartyError> {
        socket.accept()?;
        let events = socket
            .take_events()
            .ok_or_else(|| PartyError::socket("socket events are already being consumed"))?;

        {
            let mut entries = self.entries.lock();
            entries.retain(|entry| entry.socket.ready_state() != ReadyState::Closed);
            entries.push(Entry {
                socket: socket.clone(),
                tags,
            });
        }

        self.spawn_pump(socket.clone(), events);
        Ok(())
    }

    fn open_sockets(&self, tag: Option<&str>) -> Vec<SocketHandle> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.socket.is_open())
            .filter(|entry| tag.is_none_or(|tag| entry.tags.iter().any(|t| t == tag)))
            .map(|entry| entry.socket.clone())
            .collect()
    }
}

impl fmt::Debug for LocalSockets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSockets")
            .field("address", &self.address)
            .field("open", &self.open_count())
            .finish_non_exhaustive()
    }
}
