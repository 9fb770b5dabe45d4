//! Observers attached to a device session

use crate::device::state::{BusyState, ClientClass, SourceState};
use std::sync::Arc;

/// Callbacks delivered to every client attached to a session.
///
/// Callbacks are delivered in order on the session's notifier thread, never
/// while a session lock is held, so a client may call back into the session.
pub trait SessionClient: Send + Sync {
    /// Demand category; read on every attach/detach
    fn client_class(&self) -> ClientClass {
        ClientClass::Inactive
    }

    fn on_state_change(&self, _state: SourceState) {}

    fn on_busy_state_change(&self, _state: BusyState) {}

    /// The device failed permanently, or crashed after a successful start
    fn on_fail(&self) {}

    fn on_shutdown(&self) {}

    fn on_enable(&self) {}

    fn on_disable(&self) {}
}

/// Identity comparison for trait-object clients
pub(crate) fn same_client(a: &Arc<dyn SessionClient>, b: &Arc<dyn SessionClient>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Client with a fixed class and no reactions
#[derive(Debug, Clone, Copy)]
pub struct DemandClient(pub ClientClass);

impl SessionClient for DemandClient {
    fn client_class(&self) -> ClientClass {
        self.0
    }
}

/// Client that logs every event under a label
#[derive(Debug, Clone)]
pub struct LoggingClient {
    label: String,
    class: ClientClass,
}

impl LoggingClient {
    pub fn new(label: impl Into<String>, class: ClientClass) -> Self {
        Self {
            label: label.into(),
            class,
        }
    }
}

impl SessionClient for LoggingClient {
    fn client_class(&self) -> ClientClass {
        self.class
    }

    fn on_state_change(&self, state: SourceState) {
        tracing::info!("[{}] state: {}", self.label, state);
    }

    fn on_busy_state_change(&self, state: BusyState) {
        tracing::info!("[{}] busy: {}", self.label, state);
    }

    fn on_fail(&self) {
        tracing::warn!("[{}] device failed", self.label);
    }

    fn on_shutdown(&self) {
        tracing::info!("[{}] device shut down", self.label);
    }

    fn on_enable(&self) {
        tracing::info!("[{}] device enabled", self.label);
    }

    fn on_disable(&self) {
        tracing::info!("[{}] device disabled", self.label);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_client() {
        let a: Arc<dyn SessionClient> = Arc::new(DemandClient(ClientClass::User));
        let b: Arc<dyn SessionClient> = Arc::new(DemandClient(ClientClass::User));
        assert!(same_client(&a, &a.clone()));
        assert!(!same_client(&a, &b));
    }
}
