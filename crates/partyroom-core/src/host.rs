//! Host primitives consumed by the room runtime.
//!
//! The runtime never owns memory that must outlive an eviction. Everything
//! durable is reached through these traits, implemented by a host (see the
//! `partyroom-host` crate for the in-process one):
//!
//! - [`RoomAddress`]: deterministic instance address derived from a name
//! - [`SocketRegistry`]: hibernation-eligible accept and tag lookup, per room
//! - [`Storage`]: small durable key-value store and alarm slot, per room
//! - [`PartyDirectory`]: name resolution and invocation across rooms

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use uuid::Uuid;

use partyroom_common::PartyError;

use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::socket::SocketHandle;

/// Address of a single room instance.
///
/// A pure function of `(party, room)`: the same names always yield the same
/// address, with no coordination required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomAddress(Uuid);

impl RoomAddress {
    /// Derive the address of `room` within the `party` namespace.
    pub fn from_name(party: &str, room: &str) -> Self {
        let namespace = Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("partyroom:{party}").as_bytes());
        Self(Uuid::new_v5(&namespace, room.as_bytes()))
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RoomAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Per-room registry of hibernation-eligible sockets.
pub trait SocketRegistry: Send + Sync {
    /// Accept `socket` and register it under `tags`.
    ///
    /// After this the host owns event delivery for the socket: inbound events
    /// are redelivered to the room even if its memory was evicted.
    fn accept(&self, socket: &SocketHandle, tags: Vec<String>) -> Result<(), PartyError>;

    /// Open sockets carrying `tag`, or every open socket of this room.
    fn open_sockets(&self, tag: Option<&str>) -> Vec<SocketHandle>;
}

/// Durable per-room storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PartyError>;

    /// Write a value.
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), PartyError>;

    /// Delete a value. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool, PartyError>;

    /// All entries whose key starts with `prefix` (all entries if `None`).
    async fn list(
        &self,
        prefix: Option<&str>,
    ) -> Result<BTreeMap<String, serde_json::Value>, PartyError>;

    /// Schedule the room's alarm, replacing any pending one.
    async fn set_alarm(&self, at: SystemTime) -> Result<(), PartyError>;

    /// Time of the pending alarm.
    async fn get_alarm(&self) -> Result<Option<SystemTime>, PartyError>;

    /// Cancel the pending alarm.
    async fn delete_alarm(&self) -> Result<(), PartyError>;
}

/// Name resolution and invocation across rooms.
#[async_trait]
pub trait PartyDirectory: Send + Sync {
    /// Names of every configured party.
    fn party_names(&self) -> Vec<String>;

    /// Returns `true` if `party` has a binding.
    fn has_party(&self, party: &str) -> bool {
        self.party_names().iter().any(|name| name == party)
    }

    /// Resolve a room name within a party to its instance address.
    ///
    /// Pure: resolving an address never brings the instance into being.
    fn address_of(&self, party: &str, room: &str) -> Option<RoomAddress> {
        self.has_party(party)
            .then(|| RoomAddress::from_name(party, room))
    }

    /// Forward `request` to the instance of `party` at `address`.
    ///
    /// `address` comes from [`PartyDirectory::address_of`] for the same
    /// party. The instance is created on first invocation.
    async fn invoke(
        &self,
        party: &str,
        address: RoomAddress,
        request: RoomRequest,
    ) -> Result<RoomResponse, PartyError>;
}
