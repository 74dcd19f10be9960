//! The room handle exposed to user code.
//!
//! A [`Room`] is owned by exactly one runtime and lives for one wake cycle.
//! Its id and party bindings are filled in from the first request that
//! reaches the runtime; its connection roster is chosen when the worker is
//! constructed.
//!
//! - [`Room`]: id, environment, storage, connections and broadcast
//! - [`Parties`]: every configured party, for calls into other rooms
//! - [`PartyNamespace`] and [`PartyStub`]: one party, and one room within it

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::{debug, warn};
use uuid::Uuid;

use partyroom_common::PartyError;

use crate::attachment::LazyConnection;
use crate::connection::{ConnectionManager, Connections};
use crate::host::{PartyDirectory, RoomAddress, Storage};
use crate::request::RoomRequest;
use crate::response::{RoomResponse, SWITCHING_PROTOCOLS};
use crate::route::room_path;
use crate::socket::{ReadyState, SocketHandle, WsMessage};

/// Value of [`Room::id`] before the first request assigns it.
pub const UNSET_ROOM_ID: &str = "<unset>";

/// Origin used for requests made between rooms.
const INTERNAL_ORIGIN: &str = "http://internal";

/// A room as seen by worker handlers.
pub struct Room {
    id: OnceLock<String>,
    address: RoomAddress,
    party: String,
    env: Arc<BTreeMap<String, String>>,
    storage: Arc<dyn Storage>,
    parties: OnceLock<Parties>,
    connections: OnceLock<Arc<dyn ConnectionManager>>,
}

impl Room {
    pub(crate) fn new(
        address: RoomAddress,
        party: impl Into<String>,
        env: Arc<BTreeMap<String, String>>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            id: OnceLock::new(),
            address,
            party: party.into(),
            env,
            storage,
            parties: OnceLock::new(),
            connections: OnceLock::new(),
        }
    }

    /// Room name, or [`UNSET_ROOM_ID`] if no request has reached the room in
    /// this wake cycle (an alarm wake, for instance).
    pub fn id(&self) -> &str {
        self.id.get().map_or(UNSET_ROOM_ID, String::as_str)
    }

    /// Room name, if assigned.
    pub fn try_id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    /// Host address of this room.
    pub fn internal_id(&self) -> RoomAddress {
        self.address
    }

    /// Party this room belongs to.
    pub fn party(&self) -> &str {
        &self.party
    }

    /// Environment variables.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Durable storage of this room.
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Party bindings, once a request has supplied them.
    pub fn parties(&self) -> Option<&Parties> {
        self.parties.get()
    }

    /// Assign the room name. Later assignments are ignored.
    pub(crate) fn assign_id(&self, id: &str) {
        if let Err(rejected) = self.id.set(id.to_string()) {
            if self.id.get() != Some(&rejected) {
                debug!(current = %self.id(), rejected = %rejected, "Room id already assigned");
            }
        }
    }

    pub(crate) fn assign_parties(&self, parties: Parties) {
        let _ = self.parties.set(parties);
    }

    pub(crate) fn assign_connections(&self, manager: Arc<dyn ConnectionManager>) {
        let _ = self.connections.set(manager);
    }

    pub(crate) fn connection_manager(&self) -> Result<&Arc<dyn ConnectionManager>, PartyError> {
        self.connections.get().ok_or_else(|| {
            PartyError::room_unavailable(format!(
                "{} has no connection manager before its worker starts",
                self.address
            ))
        })
    }

    /// Look a connection up by id.
    pub fn get_connection(&self, id: &str) -> Result<Option<LazyConnection>, PartyError> {
        match self.connections.get() {
            Some(manager) => manager.get(id),
            None => Ok(None),
        }
    }

    /// Snapshot of open connections, optionally filtered by tag.
    pub fn get_connections(&self, tag: Option<&str>) -> Connections {
        self.connections
            .get()
            .map_or_else(Connections::empty, |manager| manager.get_all(tag))
    }

    /// Legacy id-keyed map of open connections.
    pub fn connections(&self) -> HashMap<String, LazyConnection> {
        self.connections
            .get()
            .map(|manager| manager.legacy_map())
            .unwrap_or_default()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.get().map_or(0, |manager| manager.count())
    }

    /// Send `message` to every open connection whose id is not in `exclude`.
    ///
    /// Returns the number of connections the message was handed to. The
    /// roster is a snapshot: a connection accepted mid-broadcast may miss it.
    pub fn broadcast(&self, message: impl Into<WsMessage>, exclude: &[&str]) -> usize {
        let message = message.into();
        let mut delivered = 0;

        for connection in self.get_connections(None) {
            if exclude.iter().any(|excluded| *excluded == connection.id()) {
                continue;
            }
            match connection.send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(connection_id = %connection.id(), error = %e, "Broadcast skipped connection");
                }
            }
        }

        delivered
    }
}

impl fmt::Debug for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id())
            .field("party", &self.party)
            .field("address", &self.address)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// Every configured party, keyed by name.
#[derive(Clone)]
pub struct Parties {
    directory: Arc<dyn PartyDirectory>,
    id_param: Arc<str>,
}

impl Parties {
    /// `id_param` is the query parameter that carries connection ids.
    pub(crate) fn new(directory: Arc<dyn PartyDirectory>, id_param: &str) -> Self {
        Self {
            directory,
            id_param: Arc::from(id_param),
        }
    }

    /// Namespace for `name`, if such a party is configured.
    pub fn get(&self, name: &str) -> Option<PartyNamespace> {
        self.directory.has_party(name).then(|| PartyNamespace {
            name: name.to_string(),
            directory: self.directory.clone(),
            id_param: self.id_param.clone(),
        })
    }

    /// Names of every configured party.
    pub fn names(&self) -> Vec<String> {
        self.directory.party_names()
    }
}

impl fmt::Debug for Parties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parties")
            .field("names", &self.names())
            .finish()
    }
}

/// One party namespace.
#[derive(Clone)]
pub struct PartyNamespace {
    name: String,
    directory: Arc<dyn PartyDirectory>,
    id_param: Arc<str>,
}

impl PartyNamespace {
    /// Party name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stub for `room` within this party.
    pub fn resolve(&self, room: &str) -> Result<PartyStub, PartyError> {
        let address = self
            .directory
            .address_of(&self.name, room)
            .ok_or_else(|| PartyError::party_not_found(&self.name))?;

        Ok(PartyStub {
            party: self.name.clone(),
            room: room.to_string(),
            address,
            directory: self.directory.clone(),
            id_param: self.id_param.clone(),
        })
    }
}

impl fmt::Debug for PartyNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartyNamespace")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Handle on another room, reached without going through the edge router.
#[derive(Clone)]
pub struct PartyStub {
    party: String,
    room: String,
    address: RoomAddress,
    directory: Arc<dyn PartyDirectory>,
    id_param: Arc<str>,
}

impl PartyStub {
    /// Address of the target room.
    pub fn address(&self) -> RoomAddress {
        self.address
    }

    /// URL of the target room.
    pub fn url(&self) -> String {
        format!("{INTERNAL_ORIGIN}{}", room_path(&self.party, &self.room))
    }

    /// A request addressed to the target room.
    pub fn request(&self, method: &str) -> RoomRequest {
        RoomRequest::new(method, &self.url())
    }

    /// Send `request` to the target room.
    ///
    /// The request URL is used as-is; build it with [`PartyStub::request`].
    pub async fn fetch(&self, request: RoomRequest) -> Result<RoomResponse, PartyError> {
        self.directory.invoke(&self.party, self.address, request).await
    }

    /// Open a socket to the target room.
    ///
    /// The returned handle is the accepted client end. The connection gets
    /// a fresh id under the configured id parameter.
    pub async fn connect(&self) -> Result<SocketHandle, PartyError> {
        let url = format!("{}?{}={}", self.url(), self.id_param, Uuid::new_v4());
        let response = self
            .directory
            .invoke(&self.party, self.address, RoomRequest::websocket(&url))
            .await?;

        let Some(socket) = response.web_socket else {
            return Err(PartyError::connect(format!(
                "{} answered the upgrade with status {}",
                self.url(),
                response.status
            )));
        };
        if response.status != SWITCHING_PROTOCOLS {
            warn!(status = response.status, "Upgrade response carried a socket with an unexpected status");
        }

        match socket.ready_state() {
            ReadyState::Connecting => socket.accept()?,
            ReadyState::Open => {}
            ReadyState::Closed => {
                let reason = socket.close_frame().map(|frame| frame.reason).unwrap_or_default();
                return Err(PartyError::connect(reason));
            }
        }
        Ok(socket)
    }
}

impl fmt::Debug for PartyStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartyStub")
            .field("party", &self.party)
            .field("room", &self.room)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}
