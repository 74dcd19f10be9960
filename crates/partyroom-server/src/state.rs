//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use partyroom_host::LocalHost;

/// Default limit on request bodies forwarded to rooms.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request; the host is reference counted.
#[derive(Clone)]
pub struct AppState {
    /// Host serving every party.
    host: LocalHost,

    /// Largest request body read before forwarding.
    max_body_bytes: usize,
}

impl AppState {
    /// Create application state over `host`.
    pub fn new(host: LocalHost) -> Self {
        Self {
            host,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Replace the body limit.
    #[must_use]
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Get the host.
    pub fn host(&self) -> &LocalHost {
        &self.host
    }

    /// Get the body limit.
    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    /// Names of every configured party.
    pub fn party_names(&self) -> Vec<String> {
        self.host.party_names()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("parties", &self.party_names())
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use partyroom_core::ModuleWorker;

    use super::*;

    #[test]
    fn test_app_state_creation() {
        let host = LocalHost::builder()
            .party("main", ModuleWorker::new())
            .build()
            .unwrap();
        let state = AppState::new(host).with_max_body_bytes(16);

        assert_eq!(state.party_names(), vec!["main"]);
        assert_eq!(state.max_body_bytes(), 16);
    }
}
