//! In-process host for partyroom.
//!
//! This crate provides the host primitives the room runtime consumes, kept
//! in process memory so a single binary can serve every party:
//!
//! - [`local`]: Addressing, room residency and hibernation ([`LocalHost`])
//! - [`sockets`]: Hibernatable socket registry with event redelivery
//! - [`storage`]: Key-value storage and the per-room alarm
//!
//! # Residency Model
//!
//! Each address has a durable slot (sockets and storage) and at most one
//! resident [`partyroom_core::RoomRuntime`]:
//!
//! 1. **Wake**: Any request, socket event or alarm creates the runtime.
//! 2. **Hibernate**: The runtime is dropped; the slot is kept.
//! 3. **Resume**: The next event wakes a fresh runtime, which rebuilds its
//!    state from the event and the socket attachments.

pub mod local;
pub mod sockets;
pub mod storage;

pub use local::{HibernateOutcome, LocalDirectory, LocalHost, LocalHostBuilder, RoomSummary};
pub use sockets::LocalSockets;
pub use storage::MemoryStorage;
