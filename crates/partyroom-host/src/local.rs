//! The in-process host.
//!
//! [`LocalHost`] implements the host primitives for every configured party:
//! - deterministic addressing of `(party, room)` pairs
//! - one durable slot per address (socket registry and storage) that
//!   outlives the room's runtime
//! - runtimes created on demand and dropped by [`LocalHost::hibernate`]
//! - event redelivery: hibernatable sockets and alarms wake the runtime back
//!   up through the same path

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{debug, info, warn};

use partyroom_common::{PartyError, RuntimeConfig};
use partyroom_core::{
    EdgeRouter, PartyDirectory, RoomAddress, RoomBindings, RoomRequest, RoomResponse, RoomRuntime,
    RuntimeContext, RuntimeState, WorkerDefinition,
};

use crate::sockets::{LocalSockets, Resurrect};
use crate::storage::{AlarmHandler, MemoryStorage};

/// Durable state of one address.
struct RoomSlot {
    party: String,
    sockets: Arc<LocalSockets>,
    storage: Arc<MemoryStorage>,
}

struct HostInner {
    me: Weak<HostInner>,
    context: Arc<RuntimeContext>,
    definitions: BTreeMap<String, WorkerDefinition>,
    slots: DashMap<RoomAddress, Arc<RoomSlot>>,
    runtimes: DashMap<RoomAddress, Arc<RoomRuntime>>,
}

impl HostInner {
    fn directory(&self) -> Arc<dyn PartyDirectory> {
        Arc::new(LocalDirectory {
            inner: self.me.clone(),
        })
    }

    /// Address of `room` in `party`. Allocates nothing.
    fn address_of(&self, party: &str, room: &str) -> Option<RoomAddress> {
        self.definitions
            .contains_key(party)
            .then(|| RoomAddress::from_name(party, room))
    }

    /// Runtime for `address` in `party`, creating its durable slot on first
    /// use.
    fn open(&self, party: &str, address: RoomAddress) -> Result<Arc<RoomRuntime>, PartyError> {
        if !self.definitions.contains_key(party) {
            return Err(PartyError::party_not_found(party));
        }

        self.slots
            .entry(address)
            .or_insert_with(|| Arc::new(self.new_slot(party, address)));
        self.runtime(address)
    }

    fn new_slot(&self, party: &str, address: RoomAddress) -> RoomSlot {
        let wake = self.me.clone();
        let resurrect: Resurrect = Arc::new(move || {
            wake.upgrade()
                .and_then(|inner| inner.runtime(address).ok())
        });

        let wake = self.me.clone();
        let on_alarm: AlarmHandler = Arc::new(move || {
            let wake = wake.clone();
            async move {
                let Some(runtime) = wake.upgrade().and_then(|inner| inner.runtime(address).ok())
                else {
                    return;
                };
                if let Err(e) = runtime.alarm().await {
                    warn!(address = %address, error = %e, "Alarm handler failed");
                }
            }
            .boxed()
        });

        debug!(party = %party, address = %address, "Created room slot");
        RoomSlot {
            party: party.to_string(),
            sockets: Arc::new(LocalSockets::new(address, resurrect)),
            storage: Arc::new(MemoryStorage::with_alarm_handler(on_alarm)),
        }
    }

    /// Live runtime for `address`, created if the room is not resident.
    ///
    /// Only addresses that already hold a slot can be woken.
    fn runtime(&self, address: RoomAddress) -> Result<Arc<RoomRuntime>, PartyError> {
        if let Some(runtime) = self.runtimes.get(&address) {
            return Ok(runtime.clone());
        }

        let slot = self
            .slots
            .get(&address)
            .map(|slot| slot.clone())
            .ok_or_else(|| PartyError::room_unavailable(address.to_string()))?;
        let definition = self
            .definitions
            .get(&slot.party)
            .cloned()
            .ok_or_else(|| PartyError::party_not_found(&slot.party))?;

        let runtime = self
            .runtimes
            .entry(address)
            .or_insert_with(|| {
                debug!(party = %slot.party, address = %address, "Waking room");
                Arc::new(RoomRuntime::new(RoomBindings {
                    address,
                    party: slot.party.clone(),
                    definition,
                    sockets: slot.sockets.clone(),
                    storage: slot.storage.clone(),
                    directory: self.directory(),
                    context: self.context.clone(),
                }))
            })
            .clone();
        Ok(runtime)
    }
}

/// [`PartyDirectory`] view of a host.
///
/// Holds the host weakly so rooms, which keep a directory, never keep the
/// host alive.
#[derive(Clone)]
pub struct LocalDirectory {
    inner: Weak<HostInner>,
}

impl LocalDirectory {
    fn host(&self) -> Result<Arc<HostInner>, PartyError> {
        self.inner
            .upgrade()
            .ok_or_else(|| PartyError::room_unavailable("host has shut down"))
    }
}

#[async_trait]
impl PartyDirectory for LocalDirectory {
    fn party_names(&self) -> Vec<String> {
        self.inner
            .upgrade()
            .map(|inner| inner.definitions.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn has_party(&self, party: &str) -> bool {
        self.inner
            .upgrade()
            .is_some_and(|inner| inner.definitions.contains_key(party))
    }

    async fn invoke(
        &self,
        party: &str,
        address: RoomAddress,
        request: RoomRequest,
    ) -> Result<RoomResponse, PartyError> {
        let runtime = self.host()?.open(party, address)?;
        Ok(runtime.fetch(request).await)
    }
}

impl fmt::Debug for LocalDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDirectory")
            .field("parties", &self.party_names())
            .finish()
    }
}

/// Outcome of [`LocalHost::hibernate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HibernateOutcome {
    /// The runtime was dropped.
    Evicted,
    /// No runtime was resident.
    NotResident,
    /// The runtime holds in-memory connections and must stay.
    Refused,
}

/// Summary of a resident room.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    /// Party name.
    pub party: String,
    /// Room name, if a request has assigned it.
    pub room: Option<String>,
    /// Host address.
    pub address: RoomAddress,
    /// Runtime state.
    pub state: RuntimeState,
    /// Open connections.
    pub connections: usize,
    /// Whether the room could be evicted now.
    pub hibernatable: bool,
}

/// Builder for [`LocalHost`].
#[derive(Default)]
pub struct LocalHostBuilder {
    config: RuntimeConfig,
    parties: Vec<(String, WorkerDefinition)>,
}

impl LocalHostBuilder {
    /// Use `config` for every room.
    #[must_use]
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind `definition` to the party `name`.
    #[must_use]
    pub fn party(mut self, name: impl Into<String>, definition: impl Into<WorkerDefinition>) -> Self {
        self.parties.push((name.into(), definition.into()));
        self
    }

    /// Validate every definition and build the host.
    ///
    /// # Errors
    ///
    /// Returns [`PartyError::Configuration`] for an invalid worker, an empty
    /// or duplicate party name, or a party name that cannot appear in a path.
    pub fn build(self) -> Result<LocalHost, PartyError> {
        let mut definitions = BTreeMap::new();

        for (name, definition) in self.parties {
            if name.is_empty() || name.contains('/') {
                return Err(PartyError::configuration(format!(
                    "invalid party name '{name}'"
                )));
            }
            definition.validate().map_err(|e| {
                PartyError::configuration(format!("party '{name}': {}", e.client_message()))
            })?;
            if definitions.insert(name.clone(), definition).is_some() {
                return Err(PartyError::configuration(format!(
                    "party '{name}' is bound twice"
                )));
            }
        }

        let main_party = &self.config.edge.main_party;
        if !definitions.contains_key(main_party) {
            warn!(main_party = %main_party, "No worker bound to the main party; /party/:room will 404");
        }

        let context = Arc::new(RuntimeContext::new(self.config));
        let inner = Arc::new_cyclic(|me| HostInner {
            me: me.clone(),
            context: context.clone(),
            definitions,
            slots: DashMap::new(),
            runtimes: DashMap::new(),
        });

        let router = inner
            .definitions
            .iter()
            .fold(
                EdgeRouter::new(context, inner.directory()),
                |router, (party, definition)| router.with_hooks(party.clone(), definition.edge_hooks()),
            );

        info!(parties = ?inner.definitions.keys().collect::<Vec<_>>(), "Local host ready");
        Ok(LocalHost {
            inner,
            router: Arc::new(router),
        })
    }
}

/// In-process host for every configured party.
#[derive(Clone)]
pub struct LocalHost {
    inner: Arc<HostInner>,
    router: Arc<EdgeRouter>,
}

impl LocalHost {
    /// Start building a host.
    pub fn builder() -> LocalHostBuilder {
        LocalHostBuilder::default()
    }

    /// Process-wide runtime context.
    pub fn context(&self) -> &Arc<RuntimeContext> {
        &self.inner.context
    }

    /// The edge router over this host.
    pub fn router(&self) -> &Arc<EdgeRouter> {
        &self.router
    }

    /// Route a request through the edge router.
    pub async fn fetch(&self, request: RoomRequest) -> RoomResponse {
        self.router.route(request).await
    }

    /// Directory over this host.
    pub fn directory(&self) -> Arc<dyn PartyDirectory> {
        self.inner.directory()
    }

    /// Names of every configured party.
    pub fn party_names(&self) -> Vec<String> {
        self.inner.definitions.keys().cloned().collect()
    }

    /// Address of `room` in `party`.
    pub fn address_of(&self, party: &str, room: &str) -> Option<RoomAddress> {
        self.inner.address_of(party, room)
    }

    /// Runtime for `address`, waking the room if needed.
    ///
    /// # Errors
    ///
    /// Returns a 503 error if no request has reached `address` yet.
    pub fn runtime(&self, address: RoomAddress) -> Result<Arc<RoomRuntime>, PartyError> {
        self.inner.runtime(address)
    }

    /// Runtime for `address` if it is resident.
    pub fn live_runtime(&self, address: RoomAddress) -> Option<Arc<RoomRuntime>> {
        self.inner
            .runtimes
            .get(&address)
            .map(|runtime| runtime.clone())
    }

    /// Drop the runtime of `address`, keeping its sockets and storage.
    pub fn hibernate(&self, address: RoomAddress) -> HibernateOutcome {
        if !self.inner.runtimes.contains_key(&address) {
            return HibernateOutcome::NotResident;
        }

        match self
            .inner
            .runtimes
            .remove_if(&address, |_, runtime| runtime.can_hibernate())
        {
            Some(_) => {
                info!(address = %address, "Room hibernated");
                HibernateOutcome::Evicted
            }
            None if self.inner.runtimes.contains_key(&address) => {
                debug!(address = %address, "Room holds in-memory connections; staying resident");
                HibernateOutcome::Refused
            }
            None => HibernateOutcome::NotResident,
        }
    }

    /// Hibernate every resident room that allows it. Returns the number evicted.
    pub fn hibernate_all(&self) -> usize {
        let addresses: Vec<RoomAddress> = self
            .inner
            .runtimes
            .iter()
            .map(|entry| *entry.key())
            .collect();

        addresses
            .into_iter()
            .filter(|address| self.hibernate(*address) == HibernateOutcome::Evicted)
            .count()
    }

    /// Resident rooms.
    pub fn live_rooms(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .inner
            .runtimes
            .iter()
            .map(|entry| {
                let runtime = entry.value();
                RoomSummary {
                    party: runtime.party().to_string(),
                    room: runtime.room().try_id().map(ToString::to_string),
                    address: runtime.address(),
                    state: runtime.state(),
                    connections: runtime.room().connection_count(),
                    hibernatable: runtime.can_hibernate(),
                }
            })
            .collect();
        rooms.sort_by(|a, b| (&a.party, &a.room).cmp(&(&b.party, &b.room)));
        rooms
    }

    /// Addresses holding durable state. Only admitted requests create one.
    pub fn slot_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Open hibernatable sockets held by the host for `address`.
    pub fn held_sockets(&self, address: RoomAddress) -> usize {
        self.inner
            .slots
            .get(&address)
            .map_or(0, |slot| slot.sockets.open_count())
    }
}

impl fmt::Debug for LocalHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHost")
            .field("parties", &self.party_names())
            .field("resident", &self.inner.runtimes.len())
            .field("slots", &self.inner.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use partyroom_common::HandlerError;
    use partyroom_core::{ClassWorker, HookReturn, ModuleWorker, ModuleHandler, PartyServer};

    use super::*;

    struct Quiet;

    impl PartyServer for Quiet {}

    fn echo() -> ModuleWorker {
        ModuleWorker::new().on_request(|request, room| async move {
            Ok(RoomResponse::text(200, &format!("{} {}", room.id(), request.method)))
        })
    }

    #[test]
    fn test_build_rejects_invalid_worker() {
        let bad = ModuleWorker::new().handler(
            "onRequest",
            ModuleHandler::alarm(|_room| async { Ok(()) }),
        );
        let err = LocalHost::builder().party("main", bad).build().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("party 'main'"));
    }

    #[test]
    fn test_build_rejects_duplicate_party() {
        let err = LocalHost::builder()
            .party("main", echo())
            .party("main", ClassWorker::new(|_room| Quiet))
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_address_only_for_known_parties() {
        let host = LocalHost::builder().party("main", echo()).build().unwrap();
        assert_eq!(
            host.address_of("main", "a"),
            Some(RoomAddress::from_name("main", "a"))
        );
        assert!(host.address_of("other", "a").is_none());
        assert_eq!(host.slot_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_requests_allocate_no_slots() {
        let guarded = echo().on_before_request(|request, _lobby| async move {
            match request.header("authorization") {
                Some(_) => Ok(HookReturn::Continue),
                None => Err(HandlerError::new("missing token")),
            }
        });
        let host = LocalHost::builder().party("main", guarded).build().unwrap();

        for i in 0..200 {
            let response = host
                .fetch(RoomRequest::get(&format!("http://h/party/room-{i}")))
                .await;
            assert_eq!(response.status, 401);
        }
        let response = host.fetch(RoomRequest::get("http://h/parties/nope/x")).await;
        assert_eq!(response.status, 404);
        assert_eq!(host.slot_count(), 0);
        assert!(host.live_rooms().is_empty());

        let admitted = host
            .fetch(RoomRequest::get("http://h/party/room-7").with_header("Authorization", "t"))
            .await;
        assert_eq!(admitted.body_text(), "room-7 GET");
        assert_eq!(host.slot_count(), 1);
    }

    #[tokio::test]
    async fn test_directory_invoke_creates_slot_on_demand() {
        let host = LocalHost::builder().party("main", echo()).build().unwrap();
        let directory = host.directory();

        let address = directory.address_of("main", "side").unwrap();
        assert_eq!(host.slot_count(), 0);
        assert_eq!(host.runtime(address).unwrap_err().status_code(), 503);

        let response = directory
            .invoke("main", address, RoomRequest::get("http://h/party/side"))
            .await
            .unwrap();
        assert_eq!(response.body_text(), "side GET");
        assert_eq!(host.slot_count(), 1);
        assert!(host.runtime(address).is_ok());

        let err = directory
            .invoke("nope", address, RoomRequest::get("http://h/parties/nope/side"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_fetch_wakes_room_and_hibernate_evicts() {
        let host = LocalHost::builder().party("main", echo()).build().unwrap();

        let response = host.fetch(RoomRequest::get("http://h/party/lobby")).await;
        assert_eq!(response.body_text(), "lobby GET");

        let address = host.address_of("main", "lobby").unwrap();
        assert!(host.live_runtime(address).is_some());
        assert_eq!(host.live_rooms()[0].room.as_deref(), Some("lobby"));

        assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);
        assert!(host.live_runtime(address).is_none());
        assert_eq!(host.hibernate(address), HibernateOutcome::NotResident);
    }

    #[tokio::test]
    async fn test_unknown_address_is_unavailable() {
        let host = LocalHost::builder().party("main", echo()).build().unwrap();
        let err = host
            .runtime(RoomAddress::from_name("main", "never-registered"))
            .unwrap_err();
        assert_eq!(err.status_code(), 503);
    }
}
