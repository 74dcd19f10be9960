//! HTTP server for partyroom.
//!
//! This crate puts a [`partyroom_host::LocalHost`] behind axum. It handles:
//!
//! - Request/response conversion to and from room values
//! - WebSocket upgrades, bridged onto room socket pairs
//! - Health and readiness checks
//! - An optional Admin API for inspecting and hibernating rooms
//!
//! # Quick Start
//!
//! ```ignore
//! use partyroom_core::ModuleWorker;
//! use partyroom_host::LocalHost;
//! use partyroom_server::{PartyroomServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let host = LocalHost::builder()
//!         .party("main", ModuleWorker::new().on_message(|message, connection, room| async move {
//!             room.broadcast(message, &[connection.id()]);
//!             Ok(())
//!         }))
//!         .build()?;
//!
//!     PartyroomServer::new(host, ServerConfig::default()).run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod bridge;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use router::{AdminRouterConfig, build_router, build_router_with_admin};
pub use server::{PartyroomServer, ServerConfig, TestHandle};
pub use state::AppState;
