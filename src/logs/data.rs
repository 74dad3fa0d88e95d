//! Data structures for Lua error collection.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LogError;

/// Identifier of a game server (the tenant key).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(pub u32);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Severity of a Lua log entry.
///
/// Variants are declared from least to most severe so that `Ord` follows severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    /// Counted as "critical" by the stats reader
    Error,
}

impl LogLevel {
    /// Upper-case label as it appears in logs and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "critical" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            other => Err(LogError::validation_error(format!(
                "unknown log level '{}'",
                other
            ))),
        }
    }
}

/// A classified log event, ready for aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub server_id: ServerId,
    pub level: LogLevel,
    /// Addon the error originates from, when it can be determined
    pub addon: Option<String>,
    pub message: String,
    /// Stack frames following the error line, newline separated
    pub stack_trace: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl LogEvent {
    /// Create an event without addon or stack trace.
    pub fn new(
        server_id: ServerId,
        level: LogLevel,
        message: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            server_id,
            level,
            addon: None,
            message: message.into(),
            stack_trace: None,
            occurred_at,
        }
    }

    /// Set the addon name.
    pub fn with_addon(mut self, addon: impl Into<String>) -> Self {
        self.addon = Some(addon.into());
        self
    }

    /// Set the stack trace.
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }
}

/// One distinct, deduplicated error signature for a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LuaError {
    pub id: Uuid,
    pub server_id: ServerId,
    /// Dedup key derived from addon and normalized message
    pub fingerprint: String,
    pub level: LogLevel,
    pub addon: Option<String>,
    /// Message text of the first occurrence
    pub message: String,
    pub stack_trace: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of observed occurrences
    pub count: u64,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl LuaError {
    /// Create a record for the first observation of a fingerprint.
    pub fn first_occurrence(event: &LogEvent, fingerprint: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            server_id: event.server_id,
            fingerprint: fingerprint.into(),
            level: event.level,
            addon: event.addon.clone(),
            message: event.message.clone(),
            stack_trace: event.stack_trace.clone(),
            first_seen: event.occurred_at,
            last_seen: event.occurred_at,
            count: 1,
            resolved: false,
            resolved_at: None,
        }
    }

    /// Record a repeat observation. Events stamped earlier than the latest
    /// one seen still count but leave `last_seen` where it is.
    pub fn record_occurrence(&mut self, event: &LogEvent) {
        self.count += 1;
        self.last_seen = self.last_seen.max(event.occurred_at);
        self.level = self.level.max(event.level);
        if self.stack_trace.is_none() {
            self.stack_trace = event.stack_trace.clone();
        }
    }

    /// Whether the error was last seen at or after `cutoff`.
    pub fn seen_since(&self, cutoff: Option<DateTime<Utc>>) -> bool {
        cutoff.map_or(true, |c| self.last_seen >= c)
    }
}

/// Point-in-time counts for a server's error records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStats {
    /// Records at `ERROR` level
    pub critical_errors: u64,
    pub warnings: u64,
    pub info: u64,
    /// Always `critical_errors + warnings + info`
    pub total: u64,
    pub unresolved: u64,
}

impl LogStats {
    /// Count one record into the totals.
    pub fn add(&mut self, error: &LuaError) {
        match error.level {
            LogLevel::Error => self.critical_errors += 1,
            LogLevel::Warning => self.warnings += 1,
            LogLevel::Info => self.info += 1,
        }
        self.total += 1;
        if !error.resolved {
            self.unresolved += 1;
        }
    }
}

/// Time window applied to stats and listings, matched against `last_seen`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatsWindow {
    #[default]
    #[serde(rename = "all")]
    All,
    #[serde(rename = "1h")]
    LastHour,
    #[serde(rename = "24h")]
    LastDay,
    #[serde(rename = "7d")]
    LastWeek,
    #[serde(rename = "30d")]
    LastMonth,
}

impl StatsWindow {
    /// Length of the window, `None` for unbounded.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::All => None,
            Self::LastHour => Some(Duration::hours(1)),
            Self::LastDay => Some(Duration::hours(24)),
            Self::LastWeek => Some(Duration::days(7)),
            Self::LastMonth => Some(Duration::days(30)),
        }
    }

    /// Earliest `last_seen` still inside the window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.duration().map(|d| now - d)
    }
}

impl FromStr for StatsWindow {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "all" => Ok(Self::All),
            "1h" => Ok(Self::LastHour),
            "24h" => Ok(Self::LastDay),
            "7d" => Ok(Self::LastWeek),
            "30d" => Ok(Self::LastMonth),
            other => Err(LogError::validation_error(format!(
                "unknown window '{}', expected all, 1h, 24h, 7d or 30d",
                other
            ))),
        }
    }
}

/// Per-server toggles for Lua error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Whether errors are gathered and stored at all
    pub collection_enabled: bool,
    /// Whether the owning customer may manage errors directly
    pub control_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            collection_enabled: true,
            control_enabled: true,
        }
    }
}

/// A game server known to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub owner_id: String,
    pub owner_email: Option<String>,
    /// Console log to tail, if any
    pub log_path: Option<PathBuf>,
    pub settings: ServerSettings,
}

impl Server {
    /// Create a server with default settings and no log path.
    pub fn new(id: ServerId, name: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            owner_id: owner_id.into(),
            owner_email: None,
            log_path: None,
            settings: ServerSettings::default(),
        }
    }

    pub fn with_owner_email(mut self, email: impl Into<String>) -> Self {
        self.owner_email = Some(email.into());
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Filters for the error viewer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorQuery {
    pub level: Option<LogLevel>,
    pub resolved: Option<bool>,
    pub addon: Option<String>,
    /// Case-insensitive substring over message and addon
    pub search: Option<String>,
    pub window: StatsWindow,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

impl ErrorQuery {
    /// Default page size of the viewer.
    pub const DEFAULT_PER_PAGE: usize = 25;
    /// Largest accepted page size.
    pub const MAX_PER_PAGE: usize = 100;

    /// Whether a record passes every filter except pagination.
    pub fn matches(&self, error: &LuaError, now: DateTime<Utc>) -> bool {
        if let Some(level) = self.level {
            if error.level != level {
                return false;
            }
        }
        if let Some(resolved) = self.resolved {
            if error.resolved != resolved {
                return false;
            }
        }
        if let Some(addon) = &self.addon {
            if error.addon.as_deref() != Some(addon.as_str()) {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            let in_message = error.message.to_lowercase().contains(&needle);
            let in_addon = error
                .addon
                .as_ref()
                .is_some_and(|a| a.to_lowercase().contains(&needle));
            if !in_message && !in_addon {
                return false;
            }
        }
        error.seen_since(self.window.cutoff(now))
    }

    /// Validated `(page, per_page)`, pages counted from 1.
    pub fn pagination(&self) -> crate::Result<(usize, usize)> {
        let page = self.page.unwrap_or(1);
        let per_page = self.per_page.unwrap_or(Self::DEFAULT_PER_PAGE);
        if page == 0 {
            return Err(LogError::validation_error("page starts at 1"));
        }
        if per_page == 0 || per_page > Self::MAX_PER_PAGE {
            return Err(LogError::validation_error(format!(
                "per_page must be between 1 and {}",
                Self::MAX_PER_PAGE
            )));
        }
        Ok((page, per_page))
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching items across all pages
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

/// Result of an increment-or-insert.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub record: LuaError,
    /// First observation of this fingerprint
    pub created: bool,
    /// A resolved record was re-opened by this occurrence
    pub reopened: bool,
}

/// Summary of one batch of ingested lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub lines: u64,
    /// Events produced by the classifier
    pub events: u64,
    /// Events that created or updated a record
    pub recorded: u64,
    pub new_errors: u64,
    pub unrecognized: u64,
    /// Events dropped because collection is disabled
    pub skipped: u64,
}
