//! luawatch - Lua error collection service binary.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use luawatch::notify::{DatabaseChannel, LogTransport, MailChannel};
use luawatch::{
    init_logging, start_web_server, Actor, AppConfig, AppState, ErrorAggregator, ErrorQuery,
    ErrorStore, IngestReport, LogCollector, LuaError, LuaLogService, MemoryErrorStore,
    NotificationLog, Notifier, RequestContext, Server, ServerId, ServerRegistry, StatsWindow,
};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "luawatch")]
#[command(about = "Lua error collection for Garry's Mod game servers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Tails game server console logs, deduplicates Lua errors and serves them to the panel")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Web server bind address (overrides the configuration)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Web server port (overrides the configuration)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Log polling interval in milliseconds (overrides the configuration)
    #[arg(short, long, global = true)]
    interval: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect errors and serve the API (default)
    Serve,

    /// Classify a log file offline and print the aggregated errors
    Scan(ScanArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Console log to read
    file: PathBuf,

    /// Server id to attribute the errors to
    #[arg(long, default_value_t = 1)]
    server_id: u32,

    /// Output format: pretty or json
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

impl Cli {
    fn log_level(&self) -> Level {
        if self.debug {
            Level::DEBUG
        } else if self.verbose {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Load the configuration file, if any, and apply command line overrides.
    fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => AppConfig::load(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => AppConfig::default(),
        };
        if let Some(host) = &self.host {
            config.web = config.web.with_host(host.clone());
        }
        if let Some(port) = self.port {
            config.web = config.web.with_port(port);
        }
        if let Some(interval) = self.interval {
            config.collector.poll_interval_ms = interval;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.app_config()?;

    init_logging(cli.log_level(), &config.logging)?;

    match &cli.command {
        Some(Commands::Scan(args)) => scan_command(args),
        Some(Commands::Serve) | None => serve_command(config).await,
    }
}

async fn serve_command(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting luawatch {}", env!("CARGO_PKG_VERSION"));

    let servers = Arc::new(ServerRegistry::from_servers(config.servers()));
    let memory_store = Arc::new(match &config.collector.store_path {
        Some(path) => MemoryErrorStore::load(path)
            .with_context(|| format!("loading error snapshot {}", path.display()))?,
        None => MemoryErrorStore::new(),
    });
    let store: Arc<dyn ErrorStore> = memory_store.clone();

    let aggregator = Arc::new(
        ErrorAggregator::new(store.clone(), servers.clone())
            .with_reopen_on_recurrence(config.collector.reopen_on_recurrence),
    );
    let service = Arc::new(LuaLogService::new(
        servers.clone(),
        store,
        aggregator.clone(),
    ));

    let notifications = Arc::new(match &config.notifier.notifications_path {
        Some(path) => NotificationLog::load(path, config.notifier.max_notifications)
            .with_context(|| format!("loading notification snapshot {}", path.display()))?,
        None => NotificationLog::with_max_entries(config.notifier.max_notifications),
    });
    let notifier = Notifier::new(config.notifier.clone())
        .with_channel(Arc::new(
            DatabaseChannel::new(notifications.clone()).enabled(config.notifier.database_enabled),
        ))
        .with_channel(Arc::new(
            MailChannel::new(Arc::new(LogTransport), config.notifier.app_name.clone())
                .enabled(config.notifier.mail_enabled),
        ));
    info!("Notification channels: {:?}", notifier.channel_names());
    let notifier_task = notifier.spawn(aggregator.subscribe());

    let collector = Arc::new(LogCollector::new(aggregator, config.collector.clone()));
    let started = collector.spawn_all(servers.list().iter());
    info!(
        "Collecting from {} of {} servers every {}ms",
        started,
        servers.list().len(),
        config.collector.poll_interval_ms
    );

    let snapshots = Snapshots {
        store: memory_store,
        store_path: config.collector.store_path.clone(),
        notifications: notifications.clone(),
        notifications_path: config.notifier.notifications_path.clone(),
    };
    let snapshot_task = snapshots.is_enabled().then(|| {
        let snapshots = snapshots.clone();
        // The first tick fires immediately; skip it.
        let mut ticks =
            IntervalStream::new(tokio::time::interval(config.collector.snapshot_interval())).skip(1);
        tokio::spawn(async move {
            while ticks.next().await.is_some() {
                snapshots.save_logged();
            }
        })
    });

    let state = AppState::new(service, notifications, config.web.clone())
        .with_collector(collector.clone());
    start_web_server(state, shutdown_signal()).await?;

    collector.shutdown();
    notifier_task.abort();
    if let Some(task) = snapshot_task {
        task.abort();
    }
    snapshots.save()?;
    Ok(())
}

/// Files the error store and notification log are persisted to.
#[derive(Clone)]
struct Snapshots {
    store: Arc<MemoryErrorStore>,
    store_path: Option<PathBuf>,
    notifications: Arc<NotificationLog>,
    notifications_path: Option<PathBuf>,
}

impl Snapshots {
    fn is_enabled(&self) -> bool {
        self.store_path.is_some() || self.notifications_path.is_some()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = &self.store_path {
            let saved = self
                .store
                .save(path)
                .with_context(|| format!("saving error snapshot {}", path.display()))?;
            info!("Saved {} error records to {}", saved, path.display());
        }
        if let Some(path) = &self.notifications_path {
            let saved = self
                .notifications
                .save(path)
                .with_context(|| format!("saving notification snapshot {}", path.display()))?;
            info!("Saved {} notifications to {}", saved, path.display());
        }
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(e) = self.save() {
            error!("Failed to save snapshot: {:#}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

fn scan_command(args: &ScanArgs) -> anyhow::Result<()> {
    if args.format != "pretty" && args.format != "json" {
        bail!("Unsupported format: {}. Use 'json' or 'pretty'", args.format);
    }

    let server_id = ServerId(args.server_id);
    let (service, report) = scan_file(&args.file, server_id)?;

    let ctx = RequestContext::new(Actor::admin("scan"), server_id);
    let stats = service.get_log_stats(&ctx, StatsWindow::All)?;
    let errors = all_errors(&service, &ctx)?;

    if args.format == "json" {
        let output = serde_json::json!({
            "report": report,
            "stats": stats,
            "errors": errors,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Scanned {}", args.file.display());
    println!("==========================================");
    println!(
        "  Lines: {}  Events: {}  Unrecognized: {}",
        report.lines, report.events, report.unrecognized
    );
    println!(
        "  Errors: {}  Warnings: {}  Info: {}  Total: {}",
        stats.critical_errors, stats.warnings, stats.info, stats.total
    );
    println!();
    for error in &errors {
        print_error(error);
    }
    Ok(())
}

/// Ingest a whole file into a throwaway service.
fn scan_file(
    path: &Path,
    server_id: ServerId,
) -> anyhow::Result<(LuaLogService, IngestReport)> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let content = String::from_utf8_lossy(&bytes);

    let store: Arc<dyn ErrorStore> = Arc::new(MemoryErrorStore::new());
    let servers = Arc::new(ServerRegistry::from_servers([Server::new(
        server_id,
        path.display().to_string(),
        "scan",
    )]));
    let aggregator = Arc::new(ErrorAggregator::new(store.clone(), servers.clone()));
    let service = LuaLogService::new(servers, store, aggregator);

    let report = service.ingest_lines(
        server_id,
        content.lines().map(|l| l.trim_end_matches('\r')),
        chrono::Utc::now(),
    )?;
    Ok((service, report))
}

fn all_errors(service: &LuaLogService, ctx: &RequestContext) -> anyhow::Result<Vec<LuaError>> {
    let mut errors = Vec::new();
    let mut query = ErrorQuery {
        per_page: Some(ErrorQuery::MAX_PER_PAGE),
        ..Default::default()
    };
    for page in 1.. {
        query.page = Some(page);
        let result = service.list_errors(ctx, &query)?;
        let done = result.items.is_empty() || errors.len() + result.items.len() >= result.total;
        errors.extend(result.items);
        if done {
            break;
        }
    }
    Ok(errors)
}

fn print_error(error: &LuaError) {
    println!(
        "[{}] x{} {}",
        error.level,
        error.count,
        error.addon.as_deref().unwrap_or("unknown addon")
    );
    println!("  {}", error.message);
    println!(
        "  first seen {}  last seen {}",
        error.first_seen.format("%Y-%m-%d %H:%M:%S"),
        error.last_seen.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(trace) = &error.stack_trace {
        for frame in trace.lines() {
            println!("    {}", frame);
        }
    }
    println!();
}
