//! Explicit caller context passed into every tenant-facing operation.

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::logs::data::{Server, ServerId};

/// The user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    /// Staff accounts see and manage every server
    pub is_admin: bool,
}

impl Actor {
    /// A regular (customer) user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    /// A staff user.
    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }

    /// Whether this actor may see the given server at all.
    pub fn can_access(&self, server: &Server) -> bool {
        self.is_admin || server.owner_id == self.user_id
    }
}

/// Who is asking, and about which server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub actor: Actor,
    pub server_id: ServerId,
}

impl RequestContext {
    pub fn new(actor: Actor, server_id: ServerId) -> Self {
        Self { actor, server_id }
    }

    /// Fail with `Forbidden` unless the actor may see the server.
    pub fn authorize(&self, server: &Server) -> Result<()> {
        if self.actor.can_access(server) {
            Ok(())
        } else {
            Err(LogError::forbidden(format!(
                "user {} has no access to server {}",
                self.actor.user_id, server.id
            )))
        }
    }
}

/// What the caller may do with a server's Lua errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub can_view: bool,
    pub can_resolve: bool,
    pub can_clear: bool,
    /// Toggle collection (and, for admins, control)
    pub can_configure: bool,
}

impl Capabilities {
    /// Derive capabilities from the actor and server settings.
    ///
    /// Owners manage errors only while control is enabled; admins always can.
    pub fn for_actor(actor: &Actor, server: &Server) -> Self {
        if !actor.can_access(server) {
            return Self {
                can_view: false,
                can_resolve: false,
                can_clear: false,
                can_configure: false,
            };
        }
        let manage = actor.is_admin || server.settings.control_enabled;
        Self {
            can_view: true,
            can_resolve: manage,
            can_clear: manage,
            can_configure: manage,
        }
    }
}
