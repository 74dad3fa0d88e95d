//! Context-checked operations over a server's Lua errors.
//!
//! This is the surface the web layer calls. Every tenant-facing operation
//! takes an explicit [`RequestContext`]; nothing is looked up from ambient
//! request state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::{Capabilities, RequestContext};
use crate::error::{LogError, Result};
use crate::logs::aggregator::ErrorAggregator;
use crate::logs::classifier::EventAssembler;
use crate::logs::data::{
    ErrorQuery, IngestReport, LogStats, LuaError, Page, Server, ServerId, ServerSettings,
    StatsWindow,
};
use crate::logs::servers::ServerRegistry;
use crate::logs::store::ErrorStore;

/// Partial settings change; absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub collection_enabled: Option<bool>,
    pub control_enabled: Option<bool>,
}

/// Lua error operations for the panel.
pub struct LuaLogService {
    servers: Arc<ServerRegistry>,
    store: Arc<dyn ErrorStore>,
    aggregator: Arc<ErrorAggregator>,
}

impl LuaLogService {
    pub fn new(
        servers: Arc<ServerRegistry>,
        store: Arc<dyn ErrorStore>,
        aggregator: Arc<ErrorAggregator>,
    ) -> Self {
        Self {
            servers,
            store,
            aggregator,
        }
    }

    /// The aggregator feeding this service.
    pub fn aggregator(&self) -> &Arc<ErrorAggregator> {
        &self.aggregator
    }

    /// The server registry.
    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    fn authorized_server(&self, ctx: &RequestContext) -> Result<Server> {
        let server = self.servers.get(ctx.server_id)?;
        ctx.authorize(&server)?;
        Ok(server)
    }

    /// The context's server, if the actor may see it.
    pub fn server(&self, ctx: &RequestContext) -> Result<Server> {
        self.authorized_server(ctx)
    }

    fn managed_server(&self, ctx: &RequestContext) -> Result<Server> {
        let server = self.authorized_server(ctx)?;
        if !Capabilities::for_actor(&ctx.actor, &server).can_resolve {
            return Err(LogError::forbidden(format!(
                "error management is disabled for server {}",
                server.id
            )));
        }
        Ok(server)
    }

    /// Counts for the dashboard stats widget and the viewer header.
    pub fn get_log_stats(&self, ctx: &RequestContext, window: StatsWindow) -> Result<LogStats> {
        self.get_log_stats_at(ctx, window, Utc::now())
    }

    /// [`get_log_stats`](Self::get_log_stats) evaluated at a fixed time.
    pub fn get_log_stats_at(
        &self,
        ctx: &RequestContext,
        window: StatsWindow,
        now: DateTime<Utc>,
    ) -> Result<LogStats> {
        let server = self.authorized_server(ctx)?;
        Ok(self.store.stats(server.id, window, now))
    }

    /// Filtered, paginated error listing.
    pub fn list_errors(&self, ctx: &RequestContext, query: &ErrorQuery) -> Result<Page<LuaError>> {
        let server = self.authorized_server(ctx)?;
        self.store.list(server.id, query, Utc::now())
    }

    /// One error by fingerprint.
    pub fn get_error(&self, ctx: &RequestContext, fingerprint: &str) -> Result<LuaError> {
        let server = self.authorized_server(ctx)?;
        self.store
            .get(server.id, fingerprint)
            .ok_or_else(|| LogError::not_found(format!("error {}", fingerprint)))
    }

    /// Mark an error resolved.
    pub fn resolve(&self, ctx: &RequestContext, fingerprint: &str) -> Result<LuaError> {
        let server = self.managed_server(ctx)?;
        let record = self
            .store
            .set_resolved(server.id, fingerprint, true, Utc::now())?;
        info!(
            "User {} resolved Lua error {} on server {}",
            ctx.actor.user_id, fingerprint, server.id
        );
        Ok(record)
    }

    /// Mark an error unresolved again.
    pub fn unresolve(&self, ctx: &RequestContext, fingerprint: &str) -> Result<LuaError> {
        let server = self.managed_server(ctx)?;
        let record = self
            .store
            .set_resolved(server.id, fingerprint, false, Utc::now())?;
        info!(
            "User {} re-opened Lua error {} on server {}",
            ctx.actor.user_id, fingerprint, server.id
        );
        Ok(record)
    }

    /// Remove every error record of the context's server.
    pub fn clear_logs(&self, ctx: &RequestContext) -> Result<usize> {
        let server = self.managed_server(ctx)?;
        let removed = self.store.clear(server.id);
        info!(
            "User {} cleared {} Lua errors on server {}",
            ctx.actor.user_id, removed, server.id
        );
        Ok(removed)
    }

    /// Current collection/control settings.
    pub fn settings(&self, ctx: &RequestContext) -> Result<ServerSettings> {
        self.authorized_server(ctx).map(|s| s.settings)
    }

    /// Change settings. Owners may toggle collection while control is
    /// enabled; only admins may change `control_enabled`.
    pub fn update_settings(
        &self,
        ctx: &RequestContext,
        update: SettingsUpdate,
    ) -> Result<ServerSettings> {
        let server = self.authorized_server(ctx)?;
        let caps = Capabilities::for_actor(&ctx.actor, &server);

        if update.control_enabled.is_some() && !ctx.actor.is_admin {
            return Err(LogError::forbidden("only administrators can change error control"));
        }
        if update.collection_enabled.is_some() && !caps.can_configure {
            return Err(LogError::forbidden(format!(
                "error management is disabled for server {}",
                server.id
            )));
        }

        let settings = self.servers.update_with(server.id, |settings| {
            if let Some(collection) = update.collection_enabled {
                settings.collection_enabled = collection;
            }
            if let Some(control) = update.control_enabled {
                settings.control_enabled = control;
            }
        })?;
        info!(
            "User {} set Lua error settings on server {}: collection={}, control={}",
            ctx.actor.user_id, server.id, settings.collection_enabled, settings.control_enabled
        );
        Ok(settings)
    }

    /// What the caller may do, so a UI can hide unavailable actions.
    pub fn capabilities(&self, ctx: &RequestContext) -> Result<Capabilities> {
        let server = self.servers.get(ctx.server_id)?;
        Ok(Capabilities::for_actor(&ctx.actor, &server))
    }

    /// Classify and record a batch of raw console lines for a server.
    ///
    /// Lines without a timestamp are treated as occurring at `now`. The
    /// last entry of the batch is flushed, so a batch should end on a
    /// complete error (including its stack frames).
    pub fn ingest_lines<'a, I>(
        &self,
        server_id: ServerId,
        lines: I,
        now: DateTime<Utc>,
    ) -> Result<IngestReport>
    where
        I: IntoIterator<Item = &'a str>,
    {
        // Fail early on unknown servers even for empty batches.
        self.servers.get(server_id)?;

        let mut report = IngestReport::default();
        let mut assembler = EventAssembler::new(server_id);
        let mut events = Vec::new();
        for line in lines {
            report.lines += 1;
            events.extend(assembler.push(line, now));
        }
        events.extend(assembler.flush());
        report.unrecognized = assembler.take_unrecognized();

        self.aggregator.ingest_all(&events, &mut report)?;
        Ok(report)
    }
}
