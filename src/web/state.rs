//! Shared state handed to every handler.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::logs::{LogCollector, LuaLogService};
use crate::notify::NotificationLog;
use crate::web::config::WebConfig;

/// Application state for the axum router.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LuaLogService>,
    pub notifications: Arc<NotificationLog>,
    /// Present when background collection runs in this process
    pub collector: Option<Arc<LogCollector>>,
    pub config: WebConfig,
    websocket_clients: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(
        service: Arc<LuaLogService>,
        notifications: Arc<NotificationLog>,
        config: WebConfig,
    ) -> Self {
        Self {
            service,
            notifications,
            collector: None,
            config,
            websocket_clients: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach the running collector.
    pub fn with_collector(mut self, collector: Arc<LogCollector>) -> Self {
        self.collector = Some(collector);
        self
    }

    /// Reserve a WebSocket slot, failing when the limit is reached.
    pub fn try_acquire_websocket(&self) -> bool {
        let max = self.config.max_websocket_connections;
        self.websocket_clients
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok()
    }

    /// Release a slot taken by [`try_acquire_websocket`](Self::try_acquire_websocket).
    pub fn release_websocket(&self) {
        self.websocket_clients.fetch_sub(1, Ordering::AcqRel);
    }

    /// Number of connected WebSocket clients.
    pub fn websocket_clients(&self) -> usize {
        self.websocket_clients.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::{ErrorAggregator, ErrorStore, MemoryErrorStore, ServerRegistry};

    fn state(max_clients: usize) -> AppState {
        let store: Arc<dyn ErrorStore> = Arc::new(MemoryErrorStore::new());
        let servers = Arc::new(ServerRegistry::new());
        let aggregator = Arc::new(ErrorAggregator::new(store.clone(), servers.clone()));
        AppState::new(
            Arc::new(LuaLogService::new(servers, store, aggregator)),
            Arc::new(NotificationLog::new()),
            WebConfig::default().with_max_websocket_connections(max_clients),
        )
    }

    #[test]
    fn test_websocket_slots_are_capped() {
        let state = state(2);
        assert!(state.try_acquire_websocket());
        assert!(state.clone().try_acquire_websocket());
        assert!(!state.try_acquire_websocket());
        assert_eq!(state.websocket_clients(), 2);

        state.release_websocket();
        assert_eq!(state.websocket_clients(), 1);
        assert!(state.try_acquire_websocket());
    }
}
