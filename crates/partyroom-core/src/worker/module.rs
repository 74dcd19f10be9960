//! The module worker shape: a bag of named handlers.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::debug;

use partyroom_common::{HandlerError, PartyError};

use super::hooks::{BeforeHook, EdgeHooks, FetchHook, FetchContext, HookReturn, Lobby};
use super::{ConnectionContext, HandlerResult, WorkerAdapter};
use crate::attachment::LazyConnection;
use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::Room;
use crate::socket::{CloseFrame, WsMessage};

/// Names a module worker binds handlers under.
pub mod handler_names {
    /// Room started.
    pub const ON_START: &str = "onStart";
    /// Connection accepted.
    pub const ON_CONNECT: &str = "onConnect";
    /// Message received.
    pub const ON_MESSAGE: &str = "onMessage";
    /// Connection closed.
    pub const ON_CLOSE: &str = "onClose";
    /// Connection failed.
    pub const ON_ERROR: &str = "onError";
    /// HTTP request.
    pub const ON_REQUEST: &str = "onRequest";
    /// Alarm fired.
    pub const ON_ALARM: &str = "onAlarm";
    /// Tags for a new connection.
    pub const GET_CONNECTION_TAGS: &str = "getConnectionTags";
    /// Edge hook for upgrades.
    pub const ON_BEFORE_CONNECT: &str = "onBeforeConnect";
    /// Edge hook for HTTP requests.
    pub const ON_BEFORE_REQUEST: &str = "onBeforeRequest";
    /// Edge catch-all.
    pub const ON_FETCH: &str = "onFetch";

    /// Every name the runtime looks up.
    pub const ALL: [&str; 11] = [
        ON_START,
        ON_CONNECT,
        ON_MESSAGE,
        ON_CLOSE,
        ON_ERROR,
        ON_REQUEST,
        ON_ALARM,
        GET_CONNECTION_TAGS,
        ON_BEFORE_CONNECT,
        ON_BEFORE_REQUEST,
        ON_FETCH,
    ];
}

use handler_names::{
    GET_CONNECTION_TAGS, ON_ALARM, ON_BEFORE_CONNECT, ON_BEFORE_REQUEST, ON_CLOSE, ON_CONNECT,
    ON_ERROR, ON_FETCH, ON_MESSAGE, ON_REQUEST, ON_START,
};

type StartFn = Arc<dyn Fn(Arc<Room>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type ConnectFn = Arc<
    dyn Fn(LazyConnection, ConnectionContext, Arc<Room>) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;
type MessageFn = Arc<
    dyn Fn(WsMessage, LazyConnection, Arc<Room>) -> BoxFuture<'static, HandlerResult> + Send + Sync,
>;
type CloseFn = Arc<
    dyn Fn(LazyConnection, CloseFrame, Arc<Room>) -> BoxFuture<'static, HandlerResult>
        + Send
        + Sync,
>;
type ErrorFn =
    Arc<dyn Fn(LazyConnection, String, Arc<Room>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type RequestFn = Arc<
    dyn Fn(RoomRequest, Arc<Room>) -> BoxFuture<'static, HandlerResult<RoomResponse>> + Send + Sync,
>;
type TagsFn = Arc<
    dyn Fn(LazyConnection, ConnectionContext, Arc<Room>) -> BoxFuture<'static, HandlerResult<Vec<String>>>
        + Send
        + Sync,
>;

/// One entry of a module worker's handler bag.
#[derive(Clone)]
pub enum ModuleHandler {
    /// `onStart(room)`
    Start(StartFn),
    /// `onConnect(connection, ctx, room)`
    Connect(ConnectFn),
    /// `onMessage(message, connection, room)`
    Message(MessageFn),
    /// `onClose(connection, frame, room)`
    Close(CloseFn),
    /// `onError(connection, error, room)`
    Error(ErrorFn),
    /// `onRequest(request, room)`
    Request(RequestFn),
    /// `onAlarm(room)`
    Alarm(StartFn),
    /// `getConnectionTags(connection, ctx, room)`
    ConnectionTags(TagsFn),
    /// `onBeforeConnect(request, lobby)`
    BeforeConnect(BeforeHook),
    /// `onBeforeRequest(request, lobby)`
    BeforeRequest(BeforeHook),
    /// `onFetch(request, ctx)`
    Fetch(FetchHook),
}

impl ModuleHandler {
    /// The name this kind of handler is looked up under.
    pub fn expected_name(&self) -> &'static str {
        match self {
            Self::Start(_) => ON_START,
            Self::Connect(_) => ON_CONNECT,
            Self::Message(_) => ON_MESSAGE,
            Self::Close(_) => ON_CLOSE,
            Self::Error(_) => ON_ERROR,
            Self::Request(_) => ON_REQUEST,
            Self::Alarm(_) => ON_ALARM,
            Self::ConnectionTags(_) => GET_CONNECTION_TAGS,
            Self::BeforeConnect(_) => ON_BEFORE_CONNECT,
            Self::BeforeRequest(_) => ON_BEFORE_REQUEST,
            Self::Fetch(_) => ON_FETCH,
        }
    }

    /// Wrap an `onStart` closure.
    pub fn start<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Start(Arc::new(move |room: Arc<Room>| f(room).boxed()))
    }

    /// Wrap an `onConnect` closure.
    pub fn connect<F, Fut>(f: F) -> Self
    where
        F: Fn(LazyConnection, ConnectionContext, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Connect(Arc::new(
            move |conn: LazyConnection, ctx: ConnectionContext, room: Arc<Room>| {
                f(conn, ctx, room).boxed()
            },
        ))
    }

    /// Wrap an `onMessage` closure.
    pub fn message<F, Fut>(f: F) -> Self
    where
        F: Fn(WsMessage, LazyConnection, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Message(Arc::new(
            move |message: WsMessage, conn: LazyConnection, room: Arc<Room>| {
                f(message, conn, room).boxed()
            },
        ))
    }

    /// Wrap an `onClose` closure.
    pub fn close<F, Fut>(f: F) -> Self
    where
        F: Fn(LazyConnection, CloseFrame, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Close(Arc::new(
            move |conn: LazyConnection, frame: CloseFrame, room: Arc<Room>| {
                f(conn, frame, room).boxed()
            },
        ))
    }

    /// Wrap an `onError` closure.
    pub fn error<F, Fut>(f: F) -> Self
    where
        F: Fn(LazyConnection, String, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Error(Arc::new(
            move |conn: LazyConnection, error: String, room: Arc<Room>| f(conn, error, room).boxed(),
        ))
    }

    /// Wrap an `onRequest` closure.
    pub fn request<F, Fut>(f: F) -> Self
    where
        F: Fn(RoomRequest, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<RoomResponse>> + Send + 'static,
    {
        Self::Request(Arc::new(move |request: RoomRequest, room: Arc<Room>| {
            f(request, room).boxed()
        }))
    }

    /// Wrap an `onAlarm` closure.
    pub fn alarm<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Alarm(Arc::new(move |room: Arc<Room>| f(room).boxed()))
    }

    /// Wrap a `getConnectionTags` closure.
    pub fn connection_tags<F, Fut>(f: F) -> Self
    where
        F: Fn(LazyConnection, ConnectionContext, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Vec<String>>> + Send + 'static,
    {
        Self::ConnectionTags(Arc::new(
            move |conn: LazyConnection, ctx: ConnectionContext, room: Arc<Room>| {
                f(conn, ctx, room).boxed()
            },
        ))
    }
}

impl fmt::Debug for ModuleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleHandler({})", self.expected_name())
    }
}

/// A worker written as a bag of handlers.
///
/// Every handler is optional. Missing lifecycle handlers are no-ops; a
/// missing `onRequest` answers 500.
#[derive(Clone, Default)]
pub struct ModuleWorker {
    handlers: BTreeMap<String, ModuleHandler>,
}

impl ModuleWorker {
    /// Create an empty worker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` under `name`, replacing any previous binding.
    ///
    /// The binding is only checked by [`super::WorkerDefinition::validate`].
    #[must_use]
    pub fn handler(mut self, name: impl Into<String>, handler: ModuleHandler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Bind `onStart`.
    #[must_use]
    pub fn on_start<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_START, ModuleHandler::start(f))
    }

    /// Bind `onConnect`.
    #[must_use]
    pub fn on_connect<F, Fut>(self, f: F) -> Self
    where
        F: Fn(LazyConnection, ConnectionContext, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_CONNECT, ModuleHandler::connect(f))
    }

    /// Bind `onMessage`.
    #[must_use]
    pub fn on_message<F, Fut>(self, f: F) -> Self
    where
        F: Fn(WsMessage, LazyConnection, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_MESSAGE, ModuleHandler::message(f))
    }

    /// Bind `onClose`.
    #[must_use]
    pub fn on_close<F, Fut>(self, f: F) -> Self
    where
        F: Fn(LazyConnection, CloseFrame, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_CLOSE, ModuleHandler::close(f))
    }

    /// Bind `onError`.
    #[must_use]
    pub fn on_error<F, Fut>(self, f: F) -> Self
    where
        F: Fn(LazyConnection, String, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_ERROR, ModuleHandler::error(f))
    }

    /// Bind `onRequest`.
    #[must_use]
    pub fn on_request<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RoomRequest, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<RoomResponse>> + Send + 'static,
    {
        self.handler(ON_REQUEST, ModuleHandler::request(f))
    }

    /// Bind `onAlarm`.
    #[must_use]
    pub fn on_alarm<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.handler(ON_ALARM, ModuleHandler::alarm(f))
    }

    /// Bind `getConnectionTags`.
    #[must_use]
    pub fn get_connection_tags<F, Fut>(self, f: F) -> Self
    where
        F: Fn(LazyConnection, ConnectionContext, Arc<Room>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Vec<String>>> + Send + 'static,
    {
        self.handler(GET_CONNECTION_TAGS, ModuleHandler::connection_tags(f))
    }

    /// Bind `onBeforeConnect`.
    #[must_use]
    pub fn on_before_connect<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RoomRequest, Lobby) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookReturn, HandlerError>> + Send + 'static,
    {
        self.handler(
            ON_BEFORE_CONNECT,
            ModuleHandler::BeforeConnect(super::before_hook(f)),
        )
    }

    /// Bind `onBeforeRequest`.
    #[must_use]
    pub fn on_before_request<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RoomRequest, Lobby) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookReturn, HandlerError>> + Send + 'static,
    {
        self.handler(
            ON_BEFORE_REQUEST,
            ModuleHandler::BeforeRequest(super::before_hook(f)),
        )
    }

    /// Bind `onFetch`.
    #[must_use]
    pub fn on_fetch<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RoomRequest, FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RoomResponse, HandlerError>> + Send + 'static,
    {
        self.handler(ON_FETCH, ModuleHandler::Fetch(super::fetch_hook(f)))
    }

    /// Returns `true` if something is bound under `name`.
    pub fn has(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Whether rooms of this worker use hibernatable connections.
    ///
    /// True unless the worker binds `onConnect` without `onMessage`. Workers
    /// of that form predate hibernation and wire their own per-socket
    /// listeners inside `onConnect`, so they keep in-memory connections.
    pub fn supports_hibernation(&self) -> bool {
        !(self.has(ON_CONNECT) && !self.has(ON_MESSAGE))
    }

    pub(crate) fn validate(&self) -> Result<(), PartyError> {
        for (name, handler) in &self.handlers {
            if !handler_names::ALL.contains(&name.as_str()) {
                debug!(handler = %name, "Ignoring unknown module handler");
                continue;
            }
            if handler.expected_name() != name.as_str() {
                return Err(PartyError::configuration(format!(
                    "{name} is bound to a handler of the wrong kind (expected a {name} handler, found {})",
                    handler.expected_name()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn edge_hooks(&self) -> EdgeHooks {
        let mut hooks = EdgeHooks::default();
        if let Some(ModuleHandler::BeforeConnect(hook)) = self.handlers.get(ON_BEFORE_CONNECT) {
            hooks.before_connect = Some(hook.clone());
        }
        if let Some(ModuleHandler::BeforeRequest(hook)) = self.handlers.get(ON_BEFORE_REQUEST) {
            hooks.before_request = Some(hook.clone());
        }
        if let Some(ModuleHandler::Fetch(hook)) = self.handlers.get(ON_FETCH) {
            hooks.fetch = Some(hook.clone());
        }
        hooks
    }

    fn get(&self, name: &str) -> Option<&ModuleHandler> {
        self.handlers.get(name)
    }
}

impl fmt::Debug for ModuleWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleWorker")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Adapter over a module worker; passes the room on every call.
pub(super) struct ModuleAdapter {
    worker: Arc<ModuleWorker>,
    room: Arc<Room>,
}

impl ModuleAdapter {
    pub(super) fn new(worker: Arc<ModuleWorker>, room: Arc<Room>) -> Self {
        Self { worker, room }
    }
}

#[async_trait]
impl WorkerAdapter for ModuleAdapter {
    fn supports_hibernation(&self) -> bool {
        self.worker.supports_hibernation()
    }

    async fn on_start(&self) -> HandlerResult {
        match self.worker.get(ON_START) {
            Some(ModuleHandler::Start(f)) => f(self.room.clone()).await,
            _ => Ok(()),
        }
    }

    async fn on_connect(&self, connection: LazyConnection, ctx: ConnectionContext) -> HandlerResult {
        match self.worker.get(ON_CONNECT) {
            Some(ModuleHandler::Connect(f)) => f(connection, ctx, self.room.clone()).await,
            _ => Ok(()),
        }
    }

    async fn on_message(&self, message: WsMessage, connection: LazyConnection) -> HandlerResult {
        match self.worker.get(ON_MESSAGE) {
            Some(ModuleHandler::Message(f)) => f(message, connection, self.room.clone()).await,
            _ => Ok(()),
        }
    }

    async fn on_close(&self, connection: LazyConnection, frame: CloseFrame) -> HandlerResult {
        match self.worker.get(ON_CLOSE) {
            Some(ModuleHandler::Close(f)) => f(connection, frame, self.room.clone()).await,
            _ => Ok(()),
        }
    }

    async fn on_error(&self, connection: LazyConnection, error: String) -> HandlerResult {
        match self.worker.get(ON_ERROR) {
            Some(ModuleHandler::Error(f)) => f(connection, error, self.room.clone()).await,
            _ => Ok(()),
        }
    }

    async fn on_request(&self, request: RoomRequest) -> HandlerResult<RoomResponse> {
        match self.worker.get(ON_REQUEST) {
            Some(ModuleHandler::Request(f)) => f(request, self.room.clone()).await,
            _ => Err(HandlerError::missing_handler(ON_REQUEST)),
        }
    }

    async fn on_alarm(&self) -> HandlerResult {
        match self.worker.get(ON_ALARM) {
            Some(ModuleHandler::Alarm(f)) => f(self.room.clone()).await,
            _ => {
                debug!(party = %self.room.party(), "Alarm fired with no onAlarm handler");
                Ok(())
            }
        }
    }

    async fn get_connection_tags(
        &self,
        connection: LazyConnection,
        ctx: ConnectionContext,
    ) -> HandlerResult<Vec<String>> {
        match self.worker.get(GET_CONNECTION_TAGS) {
            Some(ModuleHandler::ConnectionTags(f)) => f(connection, ctx, self.room.clone()).await,
            _ => Ok(Vec::new()),
        }
    }
}
