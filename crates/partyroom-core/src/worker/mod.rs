//! Worker definitions and the adapter that hides their shape.
//!
//! User code comes in two shapes:
//! - [`ModuleWorker`]: a bag of named handlers shared by every room. Each
//!   call receives the room as its last argument.
//! - [`ClassWorker`]: a factory for a [`PartyServer`], constructed once per
//!   room per wake cycle with the room injected.
//!
//! A [`WorkerDefinition`] records which shape was supplied. It is validated
//! once when the host is built and turned into a [`WorkerAdapter`] when a
//! room starts; nothing past that point looks at the shape again.

mod class;
mod hooks;
mod module;

use std::sync::Arc;

use async_trait::async_trait;

use partyroom_common::{HandlerError, PartyError};

use crate::attachment::LazyConnection;
use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::Room;
use crate::socket::{CloseFrame, WsMessage};

pub use class::{ClassWorker, PartyOptions, PartyServer};
pub use hooks::{
    BeforeHook, EdgeHooks, FetchContext, FetchHook, HookReturn, Lobby, before_hook, fetch_hook,
};
pub use module::{ModuleHandler, ModuleWorker, handler_names};

/// Result of a worker handler.
pub type HandlerResult<T = ()> = Result<T, HandlerError>;

/// Context of a connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// The upgrade request as the room received it.
    pub request: RoomRequest,
}

/// The normalized handler contract of a started worker.
#[async_trait]
pub trait WorkerAdapter: Send + Sync {
    /// Returns `true` if connections may outlive the room's memory.
    fn supports_hibernation(&self) -> bool;

    /// Called once per wake cycle, before any other handler.
    async fn on_start(&self) -> HandlerResult;

    /// A connection was accepted.
    async fn on_connect(&self, connection: LazyConnection, ctx: ConnectionContext)
    -> HandlerResult;

    /// A connection sent a message.
    async fn on_message(&self, message: WsMessage, connection: LazyConnection) -> HandlerResult;

    /// A connection was closed by the client.
    async fn on_close(&self, connection: LazyConnection, frame: CloseFrame) -> HandlerResult;

    /// A connection failed.
    async fn on_error(&self, connection: LazyConnection, error: String) -> HandlerResult;

    /// A plain HTTP request reached the room.
    async fn on_request(&self, request: RoomRequest) -> HandlerResult<RoomResponse>;

    /// The room's alarm fired.
    async fn on_alarm(&self) -> HandlerResult;

    /// Extra tags for a connection about to be accepted.
    async fn get_connection_tags(
        &self,
        connection: LazyConnection,
        ctx: ConnectionContext,
    ) -> HandlerResult<Vec<String>>;
}

/// User code bound to a party.
#[derive(Clone)]
pub enum WorkerDefinition {
    /// Shared handler bag.
    Module(Arc<ModuleWorker>),
    /// Per-room server factory.
    Class(Arc<ClassWorker>),
}

impl WorkerDefinition {
    /// Check the definition.
    ///
    /// # Errors
    ///
    /// Returns [`PartyError::Configuration`] if a handler name is bound to a
    /// handler of the wrong kind.
    pub fn validate(&self) -> Result<(), PartyError> {
        match self {
            Self::Module(worker) => worker.validate(),
            Self::Class(_) => Ok(()),
        }
    }

    /// Returns `true` if rooms of this worker use hibernatable connections.
    pub fn supports_hibernation(&self) -> bool {
        match self {
            Self::Module(worker) => worker.supports_hibernation(),
            Self::Class(worker) => worker.options().hibernate,
        }
    }

    /// Edge hooks declared by the worker.
    pub fn edge_hooks(&self) -> EdgeHooks {
        match self {
            Self::Module(worker) => worker.edge_hooks(),
            Self::Class(worker) => worker.edge_hooks().clone(),
        }
    }

    /// `"module"` or `"class"`.
    pub fn shape(&self) -> &'static str {
        match self {
            Self::Module(_) => "module",
            Self::Class(_) => "class",
        }
    }

    /// Start the worker for `room`.
    ///
    /// For the class shape this constructs the server.
    pub(crate) fn instantiate(&self, room: Arc<Room>) -> Box<dyn WorkerAdapter> {
        match self {
            Self::Module(worker) => Box::new(module::ModuleAdapter::new(worker.clone(), room)),
            Self::Class(worker) => Box::new(class::ClassAdapter::new(worker, room)),
        }
    }
}

impl From<ModuleWorker> for WorkerDefinition {
    fn from(worker: ModuleWorker) -> Self {
        Self::Module(Arc::new(worker))
    }
}

impl From<ClassWorker> for WorkerDefinition {
    fn from(worker: ClassWorker) -> Self {
        Self::Class(Arc::new(worker))
    }
}

impl std::fmt::Debug for WorkerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDefinition")
            .field("shape", &self.shape())
            .field("supports_hibernation", &self.supports_hibernation())
            .finish_non_exhaustive()
    }
}
