//! The addressable room instance.
//!
//! A [`RoomRuntime`] owns one room's process memory for one wake cycle: the
//! [`Room`], the started worker and, through the room, the connection
//! roster. The host may drop a runtime at any time; a fresh one for the same
//! address must rebuild everything from the triggering event.
//!
//! Initialization has two halves:
//! 1. context: room id and party bindings, read from a request URL (the live
//!    request, or the `uri` attachment of a hibernated socket)
//! 2. worker: connection manager selection, worker construction, `onStart`
//!
//! The worker half is single-flight: concurrent triggers await the first
//! initialization instead of running their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::OnceCell;
use tracing::{Instrument, debug, error, info, info_span, instrument, warn};
use uuid::Uuid;

use partyroom_common::{HandlerError, PartyError};

use crate::attachment::{Attachment, AttachmentCache, LazyConnection};
use crate::connection::{
    ConnectionManager, InMemoryConnectionManager, PersistingConnectionManager, validate_tags,
};
use crate::context::RuntimeContext;
use crate::host::{PartyDirectory, RoomAddress, SocketRegistry, Storage};
use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::{Parties, Room};
use crate::route::RoutePath;
use crate::socket::{
    ABNORMAL_CLOSURE_CODE, CloseFrame, ReadyState, SocketEvent, SocketHandle, WebSocketPair,
    WsMessage,
};
use crate::worker::{ConnectionContext, WorkerAdapter, WorkerDefinition};

/// Everything a runtime is built from.
#[derive(Clone)]
pub struct RoomBindings {
    /// Address of the room.
    pub address: RoomAddress,
    /// Party the room belongs to.
    pub party: String,
    /// Worker bound to the party.
    pub definition: WorkerDefinition,
    /// Host socket registry for this address.
    pub sockets: Arc<dyn SocketRegistry>,
    /// Durable storage for this address.
    pub storage: Arc<dyn Storage>,
    /// Directory of every party.
    pub directory: Arc<dyn PartyDirectory>,
    /// Process-wide context.
    pub context: Arc<RuntimeContext>,
}

/// Lifecycle of a runtime's worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// No worker in memory.
    Uninitialized,
    /// A trigger is constructing the worker.
    Initializing,
    /// The worker is started.
    Ready,
}

/// One room instance.
pub struct RoomRuntime {
    bindings: RoomBindings,
    room: Arc<Room>,
    worker: OnceCell<Arc<dyn WorkerAdapter>>,
    initializing: AtomicBool,
}

impl RoomRuntime {
    /// Create an uninitialized runtime.
    pub fn new(bindings: RoomBindings) -> Self {
        let room = Arc::new(Room::new(
            bindings.address,
            bindings.party.clone(),
            bindings.context.env().clone(),
            bindings.storage.clone(),
        ));

        Self {
            bindings,
            room,
            worker: OnceCell::new(),
            initializing: AtomicBool::new(false),
        }
    }

    /// The room handle.
    pub fn room(&self) -> &Arc<Room> {
        &self.room
    }

    /// Address of the room.
    pub fn address(&self) -> RoomAddress {
        self.bindings.address
    }

    /// Party the room belongs to.
    pub fn party(&self) -> &str {
        &self.bindings.party
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RuntimeState {
        if self.worker.initialized() {
            RuntimeState::Ready
        } else if self.initializing.load(Ordering::Acquire) {
            RuntimeState::Initializing
        } else {
            RuntimeState::Uninitialized
        }
    }

    /// Returns `true` if evicting this runtime loses no live connection.
    ///
    /// In-memory rosters have no host redelivery, so a runtime holding open
    /// in-memory connections must stay resident.
    pub fn can_hibernate(&self) -> bool {
        match self.room.connection_manager() {
            Ok(manager) => manager.is_persistent() || manager.count() == 0,
            Err(_) => true,
        }
    }

    /// Handle an HTTP request or WebSocket upgrade.
    ///
    /// Never fails: errors become a 500 (or the handler's code) for plain
    /// requests, and a 1011 close on the returned socket for upgrades.
    #[instrument(skip_all, fields(party = %self.bindings.party, address = %self.bindings.address))]
    pub async fn fetch(&self, request: RoomRequest) -> RoomResponse {
        self.attach_context(&request.url);

        if request.is_websocket_upgrade() {
            self.connect(request).await
        } else {
            self.request(request).await
        }
    }

    /// Deliver a message on a hibernatable socket.
    pub async fn on_hibernated_message(
        &self,
        socket: SocketHandle,
        message: WsMessage,
    ) -> Result<(), PartyError> {
        let (worker, connection) = self.resume(socket).await?;
        worker
            .on_message(message, connection)
            .await
            .map_err(|e| PartyError::socket(e.message))
    }

    /// Deliver a close on a hibernatable socket.
    pub async fn on_hibernated_close(
        &self,
        socket: SocketHandle,
        frame: CloseFrame,
    ) -> Result<(), PartyError> {
        let (worker, connection) = self.resume(socket).await?;
        worker
            .on_close(connection, frame)
            .await
            .map_err(|e| PartyError::socket(e.message))
    }

    /// Deliver an error on a hibernatable socket.
    pub async fn on_hibernated_error(
        &self,
        socket: SocketHandle,
        error: String,
    ) -> Result<(), PartyError> {
        let (worker, connection) = self.resume(socket).await?;
        worker
            .on_error(connection, error)
            .await
            .map_err(|e| PartyError::socket(e.message))
    }

    /// Run the alarm handler.
    ///
    /// No URL is available on an alarm, so a room woken this way has no id
    /// or party bindings until a request or socket event supplies them.
    #[instrument(skip_all, fields(party = %self.bindings.party, address = %self.bindings.address))]
    pub async fn alarm(&self) -> Result<(), PartyError> {
        let worker = self.ensure_worker().await?;
        worker.on_alarm().await.map_err(|e| {
            error!(error = %e, "onAlarm failed");
            e.into_request_error()
        })
    }

    /// Send `message` to every open connection not listed in `exclude`.
    pub fn broadcast(&self, message: impl Into<WsMessage>, exclude: &[&str]) -> usize {
        self.room.broadcast(message, exclude)
    }

    /// Assign room id and party bindings from `url`, once.
    fn attach_context(&self, url: &str) {
        if self.room.try_id().is_some() {
            return;
        }

        let path = match url::Url::parse(url) {
            Ok(parsed) => parsed.path().to_string(),
            Err(e) => {
                warn!(url = %url, error = %e, "Cannot read room id from URL");
                return;
            }
        };

        match RoutePath::parse(&path, &self.bindings.context.edge_config().main_party) {
            RoutePath::Room { room, .. } => {
                self.room.assign_id(&room);
                self.room.assign_parties(Parties::new(
                    self.bindings.directory.clone(),
                    &self.bindings.context.room_config().connection_id_param,
                ));
                debug!(room_id = %room, "Room context attached");
            }
            RoutePath::Unmatched => {
                warn!(path = %path, "Request path does not name a room");
            }
        }
    }

    async fn ensure_worker(&self) -> Result<Arc<dyn WorkerAdapter>, PartyError> {
        self.worker
            .get_or_try_init(|| self.start_worker())
            .await
            .cloned()
    }

    async fn start_worker(&self) -> Result<Arc<dyn WorkerAdapter>, PartyError> {
        self.initializing.store(true, Ordering::Release);
        let result = self.construct_worker().await;
        self.initializing.store(false, Ordering::Release);
        result
    }

    async fn construct_worker(&self) -> Result<Arc<dyn WorkerAdapter>, PartyError> {
        let definition = &self.bindings.definition;

        let manager: Arc<dyn ConnectionManager> = if definition.supports_hibernation() {
            Arc::new(PersistingConnectionManager::new(self.bindings.sockets.clone()))
        } else {
            Arc::new(InMemoryConnectionManager::new())
        };
        self.room.assign_connections(manager);

        let worker: Arc<dyn WorkerAdapter> = Arc::from(definition.instantiate(self.room.clone()));
        worker.on_start().await.map_err(|e| {
            error!(error = %e, "onStart failed");
            e.into_request_error()
        })?;

        info!(
            room_id = %self.room.id(),
            shape = definition.shape(),
            hibernate = worker.supports_hibernation(),
            "Room started"
        );
        Ok(worker)
    }

    async fn request(&self, request: RoomRequest) -> RoomResponse {
        let result = async {
            let worker = self.ensure_worker().await?;
            worker
                .on_request(request)
                .await
                .map_err(HandlerError::into_request_error)
        }
        .await;

        result.unwrap_or_else(|e| {
            error!(room_id = %self.room.id(), error = %e, "Request failed");
            RoomResponse::text(e.status_code(), &e.client_message())
        })
    }

    async fn connect(&self, request: RoomRequest) -> RoomResponse {
        let pair = WebSocketPair::new();

        if let Err(e) = self.accept_connection(pair.server.clone(), request).await {
            error!(room_id = %self.room.id(), error = %e, "Connection failed");
            // Failures before the roster accepts leave the room end connecting;
            // accept it so the client sees a close frame rather than a refusal.
            if pair.server.ready_state() == ReadyState::Connecting {
                if let Err(accept_err) = pair.server.accept() {
                    debug!(error = %accept_err, "Socket closed before the close frame was sent");
                }
            }
            pair.server.close(ABNORMAL_CLOSURE_CODE, e.client_message());
        }

        RoomResponse::upgrade(pair.client)
    }

    async fn accept_connection(
        &self,
        server: SocketHandle,
        request: RoomRequest,
    ) -> Result<(), PartyError> {
        let worker = self.ensure_worker().await?;
        let manager = self.room.connection_manager()?.clone();
        let config = self.bindings.context.room_config();

        let id = match request.query_param(&config.connection_id_param) {
            Some(id) if !id.is_empty() => id,
            _ => {
                self.bindings.context.note_missing_connection_id();
                Uuid::new_v4().to_string()
            }
        };
        let attachment = Attachment::new(id, request.url.clone());
        let ctx = ConnectionContext { request };

        let pending = LazyConnection::with_attachment(
            server.clone(),
            Arc::new(AttachmentCache::new()),
            attachment.clone(),
        );
        let tags = worker
            .get_connection_tags(pending, ctx.clone())
            .await
            .map_err(HandlerError::into_connect_error)?;
        validate_tags(&tags, config)?;

        let connection = manager.accept(server.clone(), attachment, tags)?;

        if !worker.supports_hibernation() {
            self.listen(server, worker.clone(), manager);
        }

        debug!(connection_id = %connection.id(), "Connection accepted");
        worker
            .on_connect(connection, ctx)
            .await
            .map_err(HandlerError::into_connect_error)
    }

    /// Dispatch a non-hibernatable socket's events for as long as it is open.
    fn listen(
        &self,
        socket: SocketHandle,
        worker: Arc<dyn WorkerAdapter>,
        manager: Arc<dyn ConnectionManager>,
    ) {
        let Some(mut events) = socket.take_events() else {
            warn!(socket = %socket.handle_id(), "Socket events already taken");
            return;
        };

        let connection = manager.wrap(socket.clone());
        let span = info_span!("socket", connection_id = %connection.id());

        tokio::spawn(
            async move {
                while let Some(event) = events.next_while_open(&socket).await {
                    let (label, result) = match event {
                        SocketEvent::Message(message) => {
                            ("onMessage", worker.on_message(message, connection.clone()).await)
                        }
                        SocketEvent::Close(frame) => {
                            ("onClose", worker.on_close(connection.clone(), frame).await)
                        }
                        SocketEvent::Error(reason) => {
                            ("onError", worker.on_error(connection.clone(), reason).await)
                        }
                    };
                    if let Err(e) = result {
                        error!(handler = label, error = %e, "Socket handler failed");
                    }
                }
                debug!("Socket listener finished");
            }
            .instrument(span),
        );
    }

    /// Bring the worker back for an event on a hibernated socket.
    async fn resume(
        &self,
        socket: SocketHandle,
    ) -> Result<(Arc<dyn WorkerAdapter>, LazyConnection), PartyError> {
        if !self.worker.initialized() {
            match socket.deserialize_attachment::<Attachment>() {
                Ok(Some(attachment)) => self.attach_context(&attachment.uri),
                Ok(None) => warn!(socket = %socket.handle_id(), "Hibernated socket has no attachment"),
                Err(e) => warn!(socket = %socket.handle_id(), error = %e, "Unreadable attachment"),
            }
        }

        let worker = self.ensure_worker().await?;
        let connection = self.room.connection_manager()?.wrap(socket);
        Ok((worker, connection))
    }
}

impl std::fmt::Debug for RoomRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomRuntime")
            .field("party", &self.bindings.party)
            .field("address", &self.bindings.address)
            .field("state", &self.state())
            .field("room", &self.room)
            .finish()
    }
}
