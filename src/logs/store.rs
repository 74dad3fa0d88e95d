//! Storage of deduplicated Lua error records.
//!
//! [`MemoryErrorStore`] keeps every record in memory behind a single
//! `RwLock`. The increment-or-insert happens entirely under the write lock,
//! so concurrent ingestion for the same server never loses a count update.
//! Records can be snapshotted to and restored from a JSON file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{LogError, Result};
use crate::logs::data::{
    ErrorQuery, LogEvent, LogStats, LuaError, Page, ServerId, StatsWindow, UpsertOutcome,
};

/// Storage backend for error records.
pub trait ErrorStore: Send + Sync {
    /// Atomically insert a new record or bump an existing one.
    ///
    /// When `reopen` is set, a resolved record is marked unresolved again.
    fn upsert(&self, event: &LogEvent, fingerprint: &str, reopen: bool) -> Result<UpsertOutcome>;

    /// Look up one record.
    fn get(&self, server: ServerId, fingerprint: &str) -> Option<LuaError>;

    /// Records matching a query, newest `last_seen` first, paginated.
    fn list(&self, server: ServerId, query: &ErrorQuery, now: DateTime<Utc>) -> Result<Page<LuaError>>;

    /// Counts by level for one server inside a window.
    fn stats(&self, server: ServerId, window: StatsWindow, now: DateTime<Utc>) -> LogStats;

    /// Toggle the resolved flag; `at` becomes `resolved_at` when resolving.
    fn set_resolved(
        &self,
        server: ServerId,
        fingerprint: &str,
        resolved: bool,
        at: DateTime<Utc>,
    ) -> Result<LuaError>;

    /// Remove every record of a server, returning how many were removed.
    fn clear(&self, server: ServerId) -> usize;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    saved_at: Option<DateTime<Utc>>,
    errors: Vec<LuaError>,
}

/// In-memory error store keyed by server and fingerprint.
#[derive(Default)]
pub struct MemoryErrorStore {
    servers: RwLock<HashMap<ServerId, HashMap<String, LuaError>>>,
}

impl MemoryErrorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all servers.
    pub fn len(&self) -> usize {
        self.servers.read().values().map(HashMap::len).sum()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore a store from a snapshot file. A missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No error snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&content)?;

        let mut servers: HashMap<ServerId, HashMap<String, LuaError>> = HashMap::new();
        for error in snapshot.errors {
            servers
                .entry(error.server_id)
                .or_default()
                .insert(error.fingerprint.clone(), error);
        }

        let store = Self {
            servers: RwLock::new(servers),
        };
        info!(
            "Loaded {} Lua error records from {}",
            store.len(),
            path.display()
        );
        Ok(store)
    }

    /// Write all records to a snapshot file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<usize> {
        let errors: Vec<LuaError> = {
            let servers = self.servers.read();
            servers
                .values()
                .flat_map(|records| records.values().cloned())
                .collect()
        };
        let count = errors.len();
        let snapshot = Snapshot {
            saved_at: Some(Utc::now()),
            errors,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp, path)?;

        debug!("Saved {} Lua error records to {}", count, path.display());
        Ok(count)
    }
}

impl ErrorStore for MemoryErrorStore {
    fn upsert(&self, event: &LogEvent, fingerprint: &str, reopen: bool) -> Result<UpsertOutcome> {
        let mut servers = self.servers.write();
        let records = servers.entry(event.server_id).or_default();

        if let Some(record) = records.get_mut(fingerprint) {
            record.record_occurrence(event);
            let reopened = reopen && record.resolved;
            if reopened {
                record.resolved = false;
                record.resolved_at = None;
            }
            return Ok(UpsertOutcome {
                record: record.clone(),
                created: false,
                reopened,
            });
        }

        let record = LuaError::first_occurrence(event, fingerprint);
        records.insert(fingerprint.to_string(), record.clone());
        Ok(UpsertOutcome {
            record,
            created: true,
            reopened: false,
        })
    }

    fn get(&self, server: ServerId, fingerprint: &str) -> Option<LuaError> {
        self.servers
            .read()
            .get(&server)
            .and_then(|records| records.get(fingerprint))
            .cloned()
    }

    fn list(&self, server: ServerId, query: &ErrorQuery, now: DateTime<Utc>) -> Result<Page<LuaError>> {
        let (page, per_page) = query.pagination()?;

        let mut matching: Vec<LuaError> = {
            let servers = self.servers.read();
            servers
                .get(&server)
                .map(|records| {
                    records
                        .values()
                        .filter(|e| query.matches(e, now))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };
        matching.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });

        let total = matching.len();
        // Offsets past usize::MAX are past the end anyway.
        let items = match (page - 1).checked_mul(per_page) {
            Some(offset) => matching.into_iter().skip(offset).take(per_page).collect(),
            None => Vec::new(),
        };

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    fn stats(&self, server: ServerId, window: StatsWindow, now: DateTime<Utc>) -> LogStats {
        let cutoff = window.cutoff(now);
        let servers = self.servers.read();
        let mut stats = LogStats::default();
        if let Some(records) = servers.get(&server) {
            records
                .values()
                .filter(|e| e.seen_since(cutoff))
                .for_each(|e| stats.add(e));
        }
        stats
    }

    fn set_resolved(
        &self,
        server: ServerId,
        fingerprint: &str,
        resolved: bool,
        at: DateTime<Utc>,
    ) -> Result<LuaError> {
        let mut servers = self.servers.write();
        let record = servers
            .get_mut(&server)
            .and_then(|records| records.get_mut(fingerprint))
            .ok_or_else(|| {
                LogError::not_found(format!("error {} on server {}", fingerprint, server))
            })?;

        record.resolved = resolved;
        record.resolved_at = if resolved { Some(at) } else { None };
        Ok(record.clone())
    }

    fn clear(&self, server: ServerId) -> usize {
        self.servers
            .write()
            .remove(&server)
            .map_or(0, |records| records.len())
    }
}
