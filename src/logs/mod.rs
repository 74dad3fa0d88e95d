//! Lua error collection, classification and aggregation.
//!
//! This module provides the core pipeline: tailing a server's console log,
//! classifying lines into error events, deduplicating them into records by
//! fingerprint, and answering stats and viewer queries.

pub mod aggregator;
pub mod classifier;
pub mod collector;
pub mod data;
pub mod fingerprint;
pub mod servers;
pub mod service;
pub mod store;
pub mod tailer;
pub mod traits;

// Re-export commonly used items
pub use aggregator::{ErrorAggregator, LuaErrorDetected};
pub use classifier::{EventAssembler, LineClassifier, LineKind};
pub use collector::{CollectorStats, LogCollector};
pub use data::{
    ErrorQuery, IngestReport, LogEvent, LogLevel, LogStats, LuaError, Page, Server, ServerId,
    ServerSettings, StatsWindow,
};
pub use servers::ServerRegistry;
pub use service::{LuaLogService, SettingsUpdate};
pub use store::{ErrorStore, MemoryErrorStore};
pub use tailer::LogTailer;
pub use traits::LogSource;
