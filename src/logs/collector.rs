//! Background collection: one tailing task per server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::{LogError, Result};
use crate::logs::aggregator::ErrorAggregator;
use crate::logs::classifier::EventAssembler;
use crate::logs::data::{Server, ServerId};
use crate::logs::tailer::LogTailer;
use crate::logs::traits::LogSource;

#[derive(Debug, Default)]
struct Counters {
    lines_read: AtomicU64,
    events: AtomicU64,
    unrecognized: AtomicU64,
    collection_failures: AtomicU64,
}

/// Collection counters for one server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorStats {
    pub lines_read: u64,
    pub events: u64,
    /// Lines that matched no known grammar
    pub unrecognized: u64,
    /// Polls that failed to read the log
    pub collection_failures: u64,
}

/// Runs and supervises per-server tailing tasks.
pub struct LogCollector {
    aggregator: Arc<ErrorAggregator>,
    config: CollectorConfig,
    tasks: Mutex<HashMap<ServerId, JoinHandle<()>>>,
    counters: Mutex<HashMap<ServerId, Arc<Counters>>>,
}

impl LogCollector {
    pub fn new(aggregator: Arc<ErrorAggregator>, config: CollectorConfig) -> Self {
        Self {
            aggregator,
            config,
            tasks: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Start tailing a server's log. Replaces an existing task for the same server.
    pub fn spawn(&self, server: &Server) -> Result<()> {
        let path = server.log_path.clone().ok_or_else(|| {
            LogError::config_error(format!("server {} has no log path", server.id))
        })?;

        let tailer = if self.config.read_from_start {
            LogTailer::from_start(&path)
        } else {
            LogTailer::new(&path)
        };

        let counters = Arc::new(Counters::default());
        self.counters.lock().insert(server.id, counters.clone());

        let handle = tokio::spawn(run_server(
            server.id,
            tailer,
            self.config.poll_interval(),
            self.aggregator.clone(),
            counters,
        ));

        if let Some(previous) = self.tasks.lock().insert(server.id, handle) {
            previous.abort();
        }
        info!(
            "Collecting Lua errors for server {} from {}",
            server.id,
            path.display()
        );
        Ok(())
    }

    /// Start tailing every server that has a log path. Returns how many started.
    pub fn spawn_all<'a>(&self, servers: impl IntoIterator<Item = &'a Server>) -> usize {
        servers
            .into_iter()
            .filter(|s| s.log_path.is_some())
            .filter(|s| match self.spawn(s) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Failed to start collector for server {}: {}", s.id, e);
                    false
                }
            })
            .count()
    }

    /// Counters of one server's task.
    pub fn stats(&self, server: ServerId) -> Option<CollectorStats> {
        self.counters.lock().get(&server).map(|c| CollectorStats {
            lines_read: c.lines_read.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            unrecognized: c.unrecognized.load(Ordering::Relaxed),
            collection_failures: c.collection_failures.load(Ordering::Relaxed),
        })
    }

    /// Number of running tasks.
    pub fn running(&self) -> usize {
        self.tasks.lock().values().filter(|h| !h.is_finished()).count()
    }

    /// Stop every task.
    pub fn shutdown(&self) {
        for (id, handle) in self.tasks.lock().drain() {
            debug!("Stopping collector for server {}", id);
            handle.abort();
        }
    }
}

impl Drop for LogCollector {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_server(
    server_id: ServerId,
    tailer: LogTailer,
    interval: std::time::Duration,
    aggregator: Arc<ErrorAggregator>,
    counters: Arc<Counters>,
) {
    let path = tailer.path().to_path_buf();
    let mut stream = tailer.into_stream(interval);
    let mut assembler = EventAssembler::new(server_id);
    let mut failing = false;

    while let Some(batch) = stream.next().await {
        let lines = match batch {
            Ok(lines) => lines,
            Err(e) => {
                counters.collection_failures.fetch_add(1, Ordering::Relaxed);
                if failing {
                    debug!("Still unable to read {}: {}", path.display(), e);
                } else {
                    warn!("Lua log collection failing for server {}: {}", server_id, e);
                    failing = true;
                }
                continue;
            }
        };

        if failing {
            info!("Lua log collection recovered for server {}", server_id);
            failing = false;
        }

        let now = Utc::now();
        let mut events = assembler.feed(lines.iter().map(String::as_str), now);
        if lines.is_empty() {
            // Idle poll: the pending entry has no more stack frames coming.
            events.extend(assembler.flush());
        }

        counters
            .lines_read
            .fetch_add(lines.len() as u64, Ordering::Relaxed);
        counters
            .unrecognized
            .fetch_add(assembler.take_unrecognized(), Ordering::Relaxed);

        for event in &events {
            counters.events.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = aggregator.ingest(event) {
                warn!("Failed to record Lua error for server {}: {}", server_id, e);
            }
        }
    }
}
