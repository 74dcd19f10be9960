//! Room runtime for partyroom.
//!
//! This crate provides everything between an incoming request and user code:
//! - [`EdgeRouter`]: Stateless entry point; path parsing, hooks, forwarding
//! - [`RoomRuntime`]: One addressable room; lazy initialization and dispatch
//! - [`WorkerDefinition`] / [`WorkerAdapter`]: The two authoring shapes behind one contract
//! - [`ConnectionManager`]: Persisting and in-memory connection rosters
//! - [`LazyConnection`] / [`Attachment`]: Connection identity that survives eviction
//! - [`host`]: Primitives a host must provide (socket registry, storage, directory)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     EdgeRouter                          │
//! │  (Stateless, one per process)                           │
//! │  - /party/:room, /parties/:party/:room                  │
//! │  - onBeforeConnect / onBeforeRequest / onFetch          │
//! └─────────────────────────────────────────────────────────┘
//!                            │ PartyDirectory::invoke
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                    RoomRuntime                          │
//! │  (One per address per wake cycle)                       │
//! │  - Room id + party bindings from the first URL          │
//! │  - Single-flight worker start                           │
//! │  - fetch / hibernated socket events / alarm             │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │        WorkerAdapter + ConnectionManager                │
//! │  - Module or class worker, shape hidden                 │
//! │  - Persisting (host registry) or in-memory roster       │
//! │  - LazyConnection over the socket attachment            │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod assets;
pub mod attachment;
pub mod connection;
pub mod context;
pub mod edge;
pub mod host;
pub mod request;
pub mod response;
pub mod room;
pub mod route;
pub mod runtime;
pub mod socket;
pub mod worker;

pub use assets::{AssetStore, DirectoryAssets};
pub use attachment::{Attachment, AttachmentCache, LazyConnection};
pub use connection::{
    ConnectionManager, Connections, InMemoryConnectionManager, PersistingConnectionManager,
    validate_tags,
};
pub use context::RuntimeContext;
pub use edge::{Admission, EdgeRouter};
pub use host::{PartyDirectory, RoomAddress, SocketRegistry, Storage};
pub use request::RoomRequest;
pub use response::{RoomResponse, SWITCHING_PROTOCOLS};
pub use room::{Parties, PartyNamespace, PartyStub, Room, UNSET_ROOM_ID};
pub use route::RoutePath;
pub use runtime::{RoomBindings, RoomRuntime, RuntimeState};
pub use socket::{
    ABNORMAL_CLOSURE_CODE, ABNORMAL_DROP_CODE, CloseFrame, NORMAL_CLOSURE_CODE, ReadyState,
    SocketEvent, SocketEvents, SocketHandle, WebSocketPair, WsMessage,
};
pub use worker::{
    ClassWorker, ConnectionContext, EdgeHooks, FetchContext, HandlerResult, HookReturn, Lobby,
    ModuleHandler, ModuleWorker, PartyOptions, PartyServer, WorkerAdapter, WorkerDefinition,
};

pub use partyroom_common::{HandlerError, PartyError};
