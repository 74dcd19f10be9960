//! HTTP server implementation.
//!
//! This module provides the main [`PartyroomServer`] struct for running
//! the partyroom HTTP server.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use partyroom_common::{AdminConfig, PartyError, ServerConfigFile};
use partyroom_host::LocalHost;

use crate::router::{AdminRouterConfig, build_router, build_router_with_admin};
use crate::state::{AppState, DEFAULT_MAX_BODY_BYTES};

/// Configuration for the HTTP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server.
    pub bind_addr: SocketAddr,
    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Enable graceful shutdown on SIGTERM/SIGINT.
    pub graceful_shutdown: bool,
    /// Largest request body forwarded to a room.
    pub max_body_bytes: usize,
    /// Admin API, if enabled.
    pub admin: Option<AdminRouterConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 1999)),
            request_timeout_secs: 30,
            graceful_shutdown: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            admin: None,
        }
    }
}

impl ServerConfig {
    /// Build a server config from the `[server]` and `[admin]` file sections.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the bind address does not parse, or
    /// if the Admin API is enabled without a token.
    pub fn from_file(server: &ServerConfigFile, admin: &AdminConfig) -> Result<Self, PartyError> {
        let bind_addr = server.bind_addr.parse().map_err(|e| {
            PartyError::configuration(format!("invalid bind_addr '{}': {e}", server.bind_addr))
        })?;

        let admin = match (&admin.token, admin.enabled) {
            (Some(token), true) => Some(AdminRouterConfig {
                prefix: admin.prefix.clone(),
                token: token.clone(),
            }),
            (None, true) => {
                return Err(PartyError::configuration(
                    "admin API is enabled but no token is set",
                ));
            }
            (_, false) => None,
        };

        Ok(Self {
            bind_addr,
            request_timeout_secs: server.request_timeout_secs,
            graceful_shutdown: server.graceful_shutdown,
            max_body_bytes: server.max_body_bytes,
            admin,
        })
    }

    /// Create a new server config with custom bind address.
    #[must_use]
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Create a new server config with custom timeout.
    #[must_use]
    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Get the request timeout as Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Partyroom HTTP server.
///
/// This is the main entry point for serving a [`LocalHost`] over HTTP.
///
/// # Example
///
/// ```ignore
/// use partyroom_host::LocalHost;
/// use partyroom_server::{PartyroomServer, ServerConfig};
///
/// let host = LocalHost::builder().party("main", worker).build()?;
/// let server = PartyroomServer::new(host, ServerConfig::default());
/// server.run().await?;
/// ```
pub struct PartyroomServer {
    /// Application state.
    state: AppState,
    /// Server configuration.
    config: ServerConfig,
}

impl PartyroomServer {
    /// Create a new server instance.
    pub fn new(host: LocalHost, config: ServerConfig) -> Self {
        let state = AppState::new(host).with_max_body_bytes(config.max_body_bytes);
        Self { state, config }
    }

    /// Get a reference to the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Run the server until shutdown.
    ///
    /// This will block until the server is shut down via signal
    /// (SIGTERM/SIGINT) if graceful shutdown is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind to the address.
    pub async fn run(self) -> Result<(), PartyError> {
        let app = build_router_with_admin(
            self.state,
            self.config.request_timeout(),
            self.config.admin.clone(),
        );

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| PartyError::configuration(format!("Failed to bind: {e}")))?;

        info!(
            addr = %self.config.bind_addr,
            admin = self.config.admin.is_some(),
            "Starting HTTP server"
        );

        if self.config.graceful_shutdown {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
        } else {
            axum::serve(listener, app).await?;
        }

        info!("Server shutdown complete");
        Ok(())
    }

    /// Start the server and return a handle for testing.
    ///
    /// The server binds to an ephemeral port (127.0.0.1:0) and
    /// returns a handle that can be used to get the actual address
    /// and shut down the server.
    pub async fn start_test(host: LocalHost) -> Result<TestHandle, PartyError> {
        let state = AppState::new(host);
        let app = build_router(state.clone(), Duration::from_secs(30));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        Ok(TestHandle {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle,
        })
    }
}

/// Handle for a test server instance.
///
/// Use this to interact with and shut down a test server.
pub struct TestHandle {
    /// The address the server is bound to.
    addr: SocketAddr,
    /// Application state.
    state: AppState,
    /// Shutdown signal sender.
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    /// Server task handle.
    handle: tokio::task::JoinHandle<Result<(), std::io::Error>>,
}

impl TestHandle {
    /// Get the server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the server URL.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the WebSocket URL for `path`.
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{path}", self.addr)
    }

    /// Get the application state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Shutdown the server gracefully.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
