use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cluster::GatewayFactory;
use crate::config::RuntimeDefaults;
use crate::logbridge::LoggerPool;
use crate::session::{SessionRegistry, SessionStore, SessionSupervisor};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub gateways: Arc<dyn GatewayFactory>,
    pub store: Arc<dyn SessionStore>,
    pub sessions: SessionSupervisor,
    pub loggers: LoggerPool,
    pub defaults: Arc<RuntimeDefaults>,
    /// Parent of every session token; cancelled on server shutdown
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        gateways: Arc<dyn GatewayFactory>,
        store: Arc<dyn SessionStore>,
        defaults: RuntimeDefaults,
    ) -> Self {
        let sessions = SessionSupervisor::new(store.clone(), Arc::new(SessionRegistry::default()));
        Self {
            gateways,
            store,
            sessions,
            loggers: LoggerPool::default(),
            defaults: Arc::new(defaults),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use a different log queue depth per session
    pub fn with_log_buffer(mut self, capacity: usize) -> Self {
        self.loggers = LoggerPool::new(capacity);
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Sessions currently running in this process
    pub fn live_session_count(&self) -> usize {
        self.sessions.registry().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockGateway, MockGatewayFactory};
    use crate::session::InMemorySessionStore;

    fn create_test_state() -> AppState {
        AppState::new(
            Arc::new(MockGatewayFactory::new(Arc::new(MockGateway::default()))),
            Arc::new(InMemorySessionStore::new()),
            RuntimeDefaults::default(),
        )
    }

    #[test]
    fn test_state_defaults() {
        let state = create_test_state();
        assert_eq!(state.live_session_count(), 0);
        assert_eq!(state.loggers.capacity(), 100);
        assert!(!state.shutdown.is_cancelled());
    }

    #[test]
    fn test_state_builders() {
        let shutdown = CancellationToken::new();
        let state = create_test_state()
            .with_log_buffer(10)
            .with_shutdown(shutdown.clone());
        assert_eq!(state.loggers.capacity(), 10);

        shutdown.cancel();
        assert!(state.shutdown.is_cancelled());
    }
}
