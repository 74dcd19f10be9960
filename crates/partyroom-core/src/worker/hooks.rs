//! Edge hooks declared by a worker.
//!
//! Hooks run in the edge router, before any room instance is touched:
//! - `onBeforeConnect` for WebSocket upgrades and `onBeforeRequest` for
//!   everything else, both of type [`BeforeHook`]
//! - `onFetch`, the catch-all for paths that address no room, of type
//!   [`FetchHook`]

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use partyroom_common::HandlerError;

use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::Parties;

/// What a before-hook decided.
#[derive(Debug)]
pub enum HookReturn {
    /// Forward the original request.
    Continue,
    /// Forward this request instead of the original.
    Request(RoomRequest),
    /// Answer with this response; no room is contacted.
    Response(RoomResponse),
}

impl From<RoomRequest> for HookReturn {
    fn from(request: RoomRequest) -> Self {
        Self::Request(request)
    }
}

impl From<RoomResponse> for HookReturn {
    fn from(response: RoomResponse) -> Self {
        Self::Response(response)
    }
}

/// Context handed to before-hooks.
#[derive(Debug, Clone)]
pub struct Lobby {
    /// Room name from the path.
    pub id: String,
    /// Party name from the path.
    pub party: String,
    /// Environment variables.
    pub env: Arc<BTreeMap<String, String>>,
    /// Every configured party.
    pub parties: Parties,
}

/// Context handed to the catch-all fetch hook.
#[derive(Debug, Clone)]
pub struct FetchContext {
    /// Environment variables.
    pub env: Arc<BTreeMap<String, String>>,
    /// Every configured party.
    pub parties: Parties,
}

/// `onBeforeConnect` / `onBeforeRequest`.
pub type BeforeHook = Arc<
    dyn Fn(RoomRequest, Lobby) -> BoxFuture<'static, Result<HookReturn, HandlerError>>
        + Send
        + Sync,
>;

/// `onFetch`.
pub type FetchHook = Arc<
    dyn Fn(RoomRequest, FetchContext) -> BoxFuture<'static, Result<RoomResponse, HandlerError>>
        + Send
        + Sync,
>;

/// Box a closure as a [`BeforeHook`].
pub fn before_hook<F, Fut>(hook: F) -> BeforeHook
where
    F: Fn(RoomRequest, Lobby) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookReturn, HandlerError>> + Send + 'static,
{
    Arc::new(move |request: RoomRequest, lobby: Lobby| hook(request, lobby).boxed())
}

/// Box a closure as a [`FetchHook`].
pub fn fetch_hook<F, Fut>(hook: F) -> FetchHook
where
    F: Fn(RoomRequest, FetchContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<RoomResponse, HandlerError>> + Send + 'static,
{
    Arc::new(move |request: RoomRequest, context: FetchContext| hook(request, context).boxed())
}

/// The edge hooks of one party.
#[derive(Clone, Default)]
pub struct EdgeHooks {
    /// Runs before WebSocket upgrades.
    pub before_connect: Option<BeforeHook>,
    /// Runs before plain HTTP requests.
    pub before_request: Option<BeforeHook>,
    /// Catch-all for paths that address no room. Only the main party's is used.
    pub fetch: Option<FetchHook>,
}

impl EdgeHooks {
    /// Returns `true` if no hook is set.
    pub fn is_empty(&self) -> bool {
        self.before_connect.is_none() && self.before_request.is_none() && self.fetch.is_none()
    }
}

impl fmt::Debug for EdgeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeHooks")
            .field("before_connect", &self.before_connect.is_some())
            .field("before_request", &self.before_request.is_some())
            .field("fetch", &self.fetch.is_some())
            .finish()
    }
}
