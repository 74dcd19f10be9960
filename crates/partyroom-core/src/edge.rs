//! The stateless entry point.
//!
//! [`EdgeRouter::route`] takes any request and:
//! 1. parses the path into `(party, room)` (see [`crate::route`])
//! 2. resolves the pair to a room address through the directory
//! 3. runs the party's `onBeforeConnect` or `onBeforeRequest` hook
//! 4. forwards to the room
//!
//! Paths that name no room fall through to static assets, then to the main
//! party's `onFetch`, then to a 404.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, instrument, warn};

use partyroom_common::{HandlerError, PartyError};

use crate::assets::{AssetStore, DirectoryAssets};
use crate::context::RuntimeContext;
use crate::host::PartyDirectory;
use crate::request::RoomRequest;
use crate::response::RoomResponse;
use crate::room::Parties;
use crate::route::RoutePath;
use crate::worker::{BeforeHook, EdgeHooks, FetchContext, HookReturn, Lobby};

/// Decision taken on a request before it reaches a room.
#[derive(Debug)]
pub enum Admission {
    /// Forward the request unchanged.
    Pass,
    /// Forward this request instead.
    Rewrite(RoomRequest),
    /// Answer without contacting the room.
    Respond(RoomResponse),
}

impl Admission {
    /// Fold a hook's result into a decision. A hook error rejects with 401.
    pub fn from_hook(result: Result<HookReturn, HandlerError>) -> Self {
        match result {
            Ok(HookReturn::Continue) => Self::Pass,
            Ok(HookReturn::Request(request)) => Self::Rewrite(request),
            Ok(HookReturn::Response(response)) => Self::Respond(response),
            Err(e) => {
                let err = e.into_auth_error();
                warn!(error = %err, "Edge hook rejected request");
                Self::Respond(RoomResponse::text(err.status_code(), &err.client_message()))
            }
        }
    }
}

/// Routes requests to rooms.
pub struct EdgeRouter {
    context: Arc<RuntimeContext>,
    directory: Arc<dyn PartyDirectory>,
    hooks: HashMap<String, EdgeHooks>,
    assets: Option<Arc<dyn AssetStore>>,
}

impl EdgeRouter {
    /// Create a router over `directory`.
    ///
    /// Assets are served from `edge.assets_dir` when it is configured.
    pub fn new(context: Arc<RuntimeContext>, directory: Arc<dyn PartyDirectory>) -> Self {
        let assets = context
            .edge_config()
            .assets_dir
            .as_ref()
            .map(|dir| Arc::new(DirectoryAssets::new(dir)) as Arc<dyn AssetStore>);

        Self {
            context,
            directory,
            hooks: HashMap::new(),
            assets,
        }
    }

    /// Register the edge hooks of `party`.
    #[must_use]
    pub fn with_hooks(mut self, party: impl Into<String>, hooks: EdgeHooks) -> Self {
        if !hooks.is_empty() {
            self.hooks.insert(party.into(), hooks);
        }
        self
    }

    /// Replace the asset store.
    #[must_use]
    pub fn with_assets(mut self, assets: Arc<dyn AssetStore>) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Route `request`. Never fails; errors become responses.
    #[instrument(skip_all, fields(method = %request.method, url = %request.url))]
    pub async fn route(&self, request: RoomRequest) -> RoomResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code() >= 500 {
                    error!(error = %e, "Edge routing failed");
                } else {
                    debug!(error = %e, "Edge routing rejected request");
                }
                RoomResponse::text(e.status_code(), &e.client_message())
            }
        }
    }

    async fn dispatch(&self, request: RoomRequest) -> Result<RoomResponse, PartyError> {
        let url = request.parsed_url()?;
        let main_party = &self.context.edge_config().main_party;

        match RoutePath::parse(url.path(), main_party) {
            RoutePath::Room { party, room } => self.forward(&party, &room, request).await,
            RoutePath::Unmatched => self.fallback(url.path(), request).await,
        }
    }

    async fn forward(
        &self,
        party: &str,
        room: &str,
        request: RoomRequest,
    ) -> Result<RoomResponse, PartyError> {
        let address = self
            .directory
            .address_of(party, room)
            .ok_or_else(|| PartyError::party_not_found(party))?;

        let hook = self.hooks.get(party).and_then(|hooks| {
            if request.is_websocket_upgrade() {
                hooks.before_connect.clone()
            } else {
                hooks.before_request.clone()
            }
        });

        let request = match self.admit(hook, party, room, &request).await {
            Admission::Pass => request,
            Admission::Rewrite(rewritten) => rewritten,
            Admission::Respond(response) => return Ok(response),
        };

        debug!(party = %party, room_id = %room, address = %address, "Forwarding to room");
        self.directory.invoke(party, address, request).await
    }

    async fn admit(
        &self,
        hook: Option<BeforeHook>,
        party: &str,
        room: &str,
        request: &RoomRequest,
    ) -> Admission {
        let Some(hook) = hook else {
            return Admission::Pass;
        };

        let lobby = Lobby {
            id: room.to_string(),
            party: party.to_string(),
            env: self.context.env().clone(),
            parties: Parties::new(
                self.directory.clone(),
                &self.context.room_config().connection_id_param,
            ),
        };
        Admission::from_hook(hook(request.clone(), lobby).await)
    }

    async fn fallback(&self, path: &str, request: RoomRequest) -> Result<RoomResponse, PartyError> {
        if let Some(assets) = &self.assets {
            if matches!(request.method.as_str(), "GET" | "HEAD") {
                if let Some(response) = assets.fetch(path).await? {
                    return Ok(response);
                }
            }
        }

        let main_party = &self.context.edge_config().main_party;
        if let Some(fetch) = self.hooks.get(main_party).and_then(|hooks| hooks.fetch.clone()) {
            let ctx = FetchContext {
                env: self.context.env().clone(),
                parties: Parties::new(
                    self.directory.clone(),
                    &self.context.room_config().connection_id_param,
                ),
            };
            return fetch(request, ctx)
                .await
                .map_err(HandlerError::into_request_error);
        }

        Ok(RoomResponse::text(404, "Not found"))
    }
}

impl std::fmt::Debug for EdgeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeRouter")
            .field("hooks", &self.hooks)
            .field("assets", &self.assets.is_some())
            .finish_non_exhaustive()
    }
}
