//! Registry of known servers and their collection/control settings.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{LogError, Result};
use crate::logs::data::{Server, ServerId, ServerSettings};

/// Thread-safe registry of servers.
#[derive(Default)]
pub struct ServerRegistry {
    servers: RwLock<HashMap<ServerId, Server>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of servers.
    pub fn from_servers(servers: impl IntoIterator<Item = Server>) -> Self {
        let registry = Self::new();
        for server in servers {
            registry.register(server);
        }
        registry
    }

    /// Add or replace a server.
    pub fn register(&self, server: Server) {
        self.servers.write().insert(server.id, server);
    }

    /// Look up a server.
    pub fn get(&self, id: ServerId) -> Result<Server> {
        self.servers
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| LogError::not_found(format!("server {}", id)))
    }

    /// Current settings of a server.
    pub fn settings(&self, id: ServerId) -> Result<ServerSettings> {
        self.get(id).map(|s| s.settings)
    }

    /// Whether events for this server should be stored.
    pub fn collection_enabled(&self, id: ServerId) -> Result<bool> {
        self.settings(id).map(|s| s.collection_enabled)
    }

    /// Modify the settings of a server under the write lock and return the
    /// result, so concurrent partial changes are applied one after another.
    pub fn update_with<F>(&self, id: ServerId, change: F) -> Result<ServerSettings>
    where
        F: FnOnce(&mut ServerSettings),
    {
        let mut servers = self.servers.write();
        let server = servers
            .get_mut(&id)
            .ok_or_else(|| LogError::not_found(format!("server {}", id)))?;
        change(&mut server.settings);
        Ok(server.settings)
    }

    /// All servers, ordered by id.
    pub fn list(&self) -> Vec<Server> {
        let mut servers: Vec<Server> = self.servers.read().values().cloned().collect();
        servers.sort_by_key(|s| s.id);
        servers
    }
}
