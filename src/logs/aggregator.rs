//! Deduplicating aggregation of classified events into error records.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::Result;
use crate::logs::data::{IngestReport, LogEvent, LuaError, ServerId, UpsertOutcome};
use crate::logs::fingerprint;
use crate::logs::servers::ServerRegistry;
use crate::logs::store::ErrorStore;

/// Capacity of the new-error broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Emitted when a distinct error is seen for the first time (or re-opened).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuaErrorDetected {
    pub server_id: ServerId,
    pub server_name: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub error: LuaError,
    /// The error had been resolved and occurred again
    pub reopened: bool,
}

/// Applies the collection gate and upserts events into the store.
pub struct ErrorAggregator {
    store: Arc<dyn ErrorStore>,
    servers: Arc<ServerRegistry>,
    events: broadcast::Sender<LuaErrorDetected>,
    reopen_on_recurrence: bool,
}

impl ErrorAggregator {
    /// Create an aggregator with its own event channel.
    pub fn new(store: Arc<dyn ErrorStore>, servers: Arc<ServerRegistry>) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            servers,
            events,
            reopen_on_recurrence: false,
        }
    }

    /// Re-open resolved errors when they occur again.
    pub fn with_reopen_on_recurrence(mut self, reopen: bool) -> Self {
        self.reopen_on_recurrence = reopen;
        self
    }

    /// Subscribe to new-error events.
    pub fn subscribe(&self) -> broadcast::Receiver<LuaErrorDetected> {
        self.events.subscribe()
    }

    /// Record one event.
    ///
    /// Returns `Ok(None)` when collection is disabled for the server, and
    /// `NotFound` when the server is unknown.
    pub fn ingest(&self, event: &LogEvent) -> Result<Option<UpsertOutcome>> {
        let server = self.servers.get(event.server_id)?;
        if !server.settings.collection_enabled {
            trace!(
                "Collection disabled for server {}, dropping event",
                server.id
            );
            return Ok(None);
        }

        let fp = fingerprint::fingerprint_message(event.addon.as_deref(), &event.message);
        let outcome = self.store.upsert(event, &fp, self.reopen_on_recurrence)?;

        if outcome.created || outcome.reopened {
            debug!(
                "{} Lua error {} on server {}: {}",
                if outcome.created { "New" } else { "Re-opened" },
                outcome.record.fingerprint,
                server.id,
                outcome.record.message
            );
            let detected = LuaErrorDetected {
                server_id: server.id,
                server_name: server.name.clone(),
                owner_id: server.owner_id.clone(),
                owner_email: server.owner_email.clone(),
                error: outcome.record.clone(),
                reopened: outcome.reopened,
            };
            // No receivers is fine: notifications are optional.
            let _ = self.events.send(detected);
        }

        Ok(Some(outcome))
    }

    /// Record a batch of events, accumulating into `report`.
    pub fn ingest_all<'a, I>(&self, events: I, report: &mut IngestReport) -> Result<()>
    where
        I: IntoIterator<Item = &'a LogEvent>,
    {
        for event in events {
            report.events += 1;
            match self.ingest(event)? {
                Some(outcome) => {
                    report.recorded += 1;
                    if outcome.created {
                        report.new_errors += 1;
                    }
                }
                None => report.skipped += 1,
            }
        }
        Ok(())
    }
}
