//! # luawatch - Lua error collection for Garry's Mod game servers
//!
//! Tails each server's console log, classifies Lua errors and warnings,
//! deduplicates them by fingerprint and serves per-server counts and a
//! filterable error viewer to the hosting panel.
//!
//! ## Features
//!
//! - **Log tailing**: one polling task per server, tolerant of rotation and partial lines
//! - **Deduplication**: messages differing only in addresses or line numbers share a record
//! - **Tenant isolation**: every operation takes the calling user explicitly
//! - **Notifications**: new errors are stored for the owner and mailed to them
//! - **Web API**: JSON endpoints plus a WebSocket feed of newly detected errors
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use luawatch::{
//!     Actor, ErrorAggregator, ErrorStore, LuaLogService, MemoryErrorStore, RequestContext,
//!     Server, ServerId, ServerRegistry, StatsWindow,
//! };
//!
//! fn main() -> luawatch::Result<()> {
//!     let store: Arc<dyn ErrorStore> = Arc::new(MemoryErrorStore::new());
//!     let servers = Arc::new(ServerRegistry::from_servers([
//!         Server::new(ServerId(1), "DarkRP", "alice"),
//!     ]));
//!     let aggregator = Arc::new(ErrorAggregator::new(store.clone(), servers.clone()));
//!     let service = LuaLogService::new(servers, store, aggregator);
//!
//!     service.ingest_lines(ServerId(1), ["[ERROR] lua/autorun/init.lua:3: boom"], chrono::Utc::now())?;
//!
//!     let ctx = RequestContext::new(Actor::user("alice"), ServerId(1));
//!     let stats = service.get_log_stats(&ctx, StatsWindow::All)?;
//!     println!("{} critical errors", stats.critical_errors);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod logs;
pub mod notify;
pub mod web;

// Re-export public API
pub use config::{AppConfig, CollectorConfig, LoggingConfig, NotifierConfig, ServerConfig};
pub use context::{Actor, Capabilities, RequestContext};
pub use error::{LogError, Result};
pub use logging::init_logging;
pub use logs::{
    CollectorStats, ErrorAggregator, ErrorQuery, ErrorStore, IngestReport, LogCollector,
    LogEvent, LogLevel, LogStats, LogTailer, LuaError, LuaErrorDetected, LuaLogService,
    MemoryErrorStore, Page, Server, ServerId, ServerRegistry, ServerSettings, SettingsUpdate,
    StatsWindow,
};
pub use notify::{NotificationLog, Notifier};
pub use web::{create_app, start_web_server, AppState, WebConfig};

/// The default log polling interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// The default web server port
pub const DEFAULT_WEB_PORT: u16 = 8080;

/// Days of daily log files kept by default
pub const DEFAULT_LOG_RETENTION_DAYS: u32 = 14;

/// Stored notifications kept before the oldest are dropped
pub const DEFAULT_MAX_NOTIFICATIONS: usize = 1000;
