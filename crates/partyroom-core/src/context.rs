//! Process-wide runtime context.
//!
//! One [`RuntimeContext`] is created at cold start and passed explicitly to
//! every room runtime and edge router. It holds configuration, the
//! environment exposed to user code, and the few once-per-process flags.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use partyroom_common::{EdgeConfig, RoomConfig, RuntimeConfig};

/// Shared state created once per process.
#[derive(Debug)]
pub struct RuntimeContext {
    config: RuntimeConfig,
    env: Arc<BTreeMap<String, String>>,
    missing_id_warned: AtomicBool,
}

impl RuntimeContext {
    /// Create a context from configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        let env = Arc::new(config.vars.clone());
        Self {
            config,
            env,
            missing_id_warned: AtomicBool::new(false),
        }
    }

    /// Full runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Room settings.
    pub fn room_config(&self) -> &RoomConfig {
        &self.config.room
    }

    /// Edge settings.
    pub fn edge_config(&self) -> &EdgeConfig {
        &self.config.edge
    }

    /// Variables exposed to user code.
    pub fn env(&self) -> &Arc<BTreeMap<String, String>> {
        &self.env
    }

    /// Record that a connection arrived without an id.
    ///
    /// Logs on the first call in this process only. Returns `true` if this
    /// call emitted the warning.
    pub fn note_missing_connection_id(&self) -> bool {
        let first = !self.missing_id_warned.swap(true, Ordering::Relaxed);
        if first {
            warn!(
                param = %self.config.room.connection_id_param,
                "Connection opened without an id query parameter; generating ids. \
                 Clients should send a stable id so reconnects keep their identity"
            );
        }
        first
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_id_warning_fires_once() {
        let context = RuntimeContext::default();
        assert!(context.note_missing_connection_id());
        assert!(!context.note_missing_connection_id());
        assert!(!context.note_missing_connection_id());
    }

    #[test]
    fn test_env_comes_from_vars() {
        let mut config = RuntimeConfig::default();
        config.vars.insert("REGION".into(), "eu".into());
        let context = RuntimeContext::new(config);

        assert_eq!(context.env().get("REGION").map(String::as_str), Some("eu"));
        assert_eq!(context.edge_config().main_party, "main");
    }
}
