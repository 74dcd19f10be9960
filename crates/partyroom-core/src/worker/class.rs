//! The class worker shape: one server object per room.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use partyroom_common::HandlerError;

use super::hooks::{EdgeHooks, FetchContext, HookReturn, Lobby, before_hook, fetch_hook};
use super::{ConnectionContext, HandlerResult, WorkerAdapter};
use crate::attachment::LazyConnection;
use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::Room;
use crate::socket::{CloseFrame, WsMessage};

/// A room server written as an object.
///
/// The server is constructed with its room, so handlers take no room
/// argument. Every method has a default; the default `on_request` answers
/// 500.
#[async_trait]
pub trait PartyServer: Send + Sync {
    /// Called once per wake cycle, before any other handler.
    async fn on_start(&self) -> HandlerResult {
        Ok(())
    }

    /// A connection was accepted.
    async fn on_connect(
        &self,
        _connection: LazyConnection,
        _ctx: ConnectionContext,
    ) -> HandlerResult {
        Ok(())
    }

    /// A connection sent a message.
    async fn on_message(&self, _message: WsMessage, _connection: LazyConnection) -> HandlerResult {
        Ok(())
    }

    /// A connection was closed by the client.
    async fn on_close(&self, _connection: LazyConnection, _frame: CloseFrame) -> HandlerResult {
        Ok(())
    }

    /// A connection failed.
    async fn on_error(&self, _connection: LazyConnection, _error: String) -> HandlerResult {
        Ok(())
    }

    /// A plain HTTP request reached the room.
    async fn on_request(&self, _request: RoomRequest) -> HandlerResult<RoomResponse> {
        Err(HandlerError::missing_handler("onRequest"))
    }

    /// The room's alarm fired.
    async fn on_alarm(&self) -> HandlerResult {
        Ok(())
    }

    /// Extra tags for a connection about to be accepted.
    async fn get_connection_tags(
        &self,
        _connection: LazyConnection,
        _ctx: ConnectionContext,
    ) -> HandlerResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Options of a class worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartyOptions {
    /// Use hibernatable connections. Off unless set explicitly.
    #[serde(default)]
    pub hibernate: bool,
}

type Factory = Arc<dyn Fn(Arc<Room>) -> Box<dyn PartyServer> + Send + Sync>;

/// A worker that constructs a [`PartyServer`] per room.
#[derive(Clone)]
pub struct ClassWorker {
    factory: Factory,
    options: PartyOptions,
    hooks: EdgeHooks,
}

impl ClassWorker {
    /// Create a worker from a constructor.
    pub fn new<F, S>(factory: F) -> Self
    where
        F: Fn(Arc<Room>) -> S + Send + Sync + 'static,
        S: PartyServer + 'static,
    {
        Self {
            factory: Arc::new(move |room: Arc<Room>| Box::new(factory(room)) as Box<dyn PartyServer>),
            options: PartyOptions::default(),
            hooks: EdgeHooks::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: PartyOptions) -> Self {
        self.options = options;
        self
    }

    /// Set `options.hibernate`.
    #[must_use]
    pub fn hibernate(mut self, hibernate: bool) -> Self {
        self.options.hibernate = hibernate;
        self
    }

    /// Set the static `onBeforeConnect` hook.
    #[must_use]
    pub fn on_before_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RoomRequest, Lobby) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookReturn, HandlerError>> + Send + 'static,
    {
        self.hooks.before_connect = Some(before_hook(f));
        self
    }

    /// Set the static `onBeforeRequest` hook.
    #[must_use]
    pub fn on_before_request<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RoomRequest, Lobby) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HookReturn, HandlerError>> + Send + 'static,
    {
        self.hooks.before_request = Some(before_hook(f));
        self
    }

    /// Set the static `onFetch` hook.
    #[must_use]
    pub fn on_fetch<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(RoomRequest, FetchContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RoomResponse, HandlerError>> + Send + 'static,
    {
        self.hooks.fetch = Some(fetch_hook(f));
        self
    }

    /// Worker options.
    pub fn options(&self) -> PartyOptions {
        self.options
    }

    pub(crate) fn edge_hooks(&self) -> &EdgeHooks {
        &self.hooks
    }
}

impl fmt::Debug for ClassWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassWorker")
            .field("options", &self.options)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

/// Adapter over a constructed server.
pub(super) struct ClassAdapter {
    server: Box<dyn PartyServer>,
    hibernate: bool,
}

impl ClassAdapter {
    pub(super) fn new(worker: &ClassWorker, room: Arc<Room>) -> Self {
        debug!(party = %room.party(), address = %room.internal_id(), "Constructing party server");
        Self {
            server: (worker.factory)(room),
            hibernate: worker.options.hibernate,
        }
    }
}

#[async_trait]
impl WorkerAdapter for ClassAdapter {
    fn supports_hibernation(&self) -> bool {
        self.hibernate
    }

    async fn on_start(&self) -> HandlerResult {
        self.server.on_start().await
    }

    async fn on_connect(&self, connection: LazyConnection, ctx: ConnectionContext) -> HandlerResult {
        self.server.on_connect(connection, ctx).await
    }

    async fn on_message(&self, message: WsMessage, connection: LazyConnection) -> HandlerResult {
        self.server.on_message(message, connection).await
    }

    async fn on_close(&self, connection: LazyConnection, frame: CloseFrame) -> HandlerResult {
        self.server.on_close(connection, frame).await
    }

    async fn on_error(&self, connection: LazyConnection, error: String) -> HandlerResult {
        self.server.on_error(connection, error).await
    }

    async fn on_request(&self, request: RoomRequest) -> HandlerResult<RoomResponse> {
        self.server.on_request(request).await
    }

    async fn on_alarm(&self) -> HandlerResult {
        self.server.on_alarm().await
    }

    async fn get_connection_tags(
        &self,
        connection: LazyConnection,
        ctx: ConnectionContext,
    ) -> HandlerResult<Vec<String>> {
        self.server.get_connection_tags(connection, ctx).await
    }
}
