use std::io::Write;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio_test::{assert_err, assert_ok};
use luawatch::{
    Actor, CollectorConfig, ErrorAggregator, ErrorQuery, ErrorStore, LogCollector, LogEvent,
    LogLevel, LuaLogService, MemoryErrorStore, RequestContext, Server, ServerId, ServerRegistry,
    ServerSettings, SettingsUpdate, StatsWindow,
};

struct Fixture {
    store: Arc<MemoryErrorStore>,
    aggregator: Arc<ErrorAggregator>,
    service: LuaLogService,
}

fn fixture(servers: Vec<Server>) -> Fixture {
    let store = Arc::new(MemoryErrorStore::new());
    let dyn_store: Arc<dyn ErrorStore> = store.clone();
    let registry = Arc::new(ServerRegistry::from_servers(servers));
    let aggregator = Arc::new(ErrorAggregator::new(dyn_store.clone(), registry.clone()));
    let service = LuaLogService::new(registry, dyn_store, aggregator.clone());
    Fixture {
        store,
        aggregator,
        service,
    }
}

fn two_servers() -> Fixture {
    fixture(vec![
        Server::new(ServerId(1), "DarkRP", "alice"),
        Server::new(ServerId(2), "TTT", "bob"),
    ])
}

fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn admin(server: u32) -> RequestContext {
    RequestContext::new(Actor::admin("staff"), ServerId(server))
}

fn wiremod_error(server: u32, when: DateTime<Utc>) -> LogEvent {
    LogEvent::new(ServerId(server), LogLevel::Error, "attempt to index nil", when)
        .with_addon("wiremod")
}

#[test]
fn identical_events_share_one_record() {
    let f = two_servers();
    for i in 0..7 {
        f.aggregator.ingest(&wiremod_error(1, at(i))).unwrap();
    }

    let page = f.service.list_errors(&admin(1), &ErrorQuery::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].count, 7);
}

#[test]
fn first_seen_is_kept_and_last_seen_follows_latest() {
    let f = two_servers();
    f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap();
    f.aggregator.ingest(&wiremod_error(1, at(3))).unwrap();
    f.aggregator.ingest(&wiremod_error(1, at(9))).unwrap();

    let record = &f.service.list_errors(&admin(1), &ErrorQuery::default()).unwrap().items[0];
    assert_eq!(record.first_seen, at(0));
    assert_eq!(record.last_seen, at(9));
}

#[test]
fn clearing_one_server_leaves_others_untouched() {
    let f = two_servers();
    f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap();
    f.aggregator.ingest(&wiremod_error(2, at(0))).unwrap();
    f.aggregator
        .ingest(&LogEvent::new(ServerId(2), LogLevel::Warning, "slow think hook", at(1)))
        .unwrap();

    assert_eq!(f.service.clear_logs(&admin(1)).unwrap(), 1);

    let stats_one = f.service.get_log_stats(&admin(1), StatsWindow::All).unwrap();
    let stats_two = f.service.get_log_stats(&admin(2), StatsWindow::All).unwrap();
    assert_eq!(stats_one.total, 0);
    assert_eq!(stats_two.total, 2);
    assert_eq!(f.store.len(), 2);
}

#[test]
fn stats_total_is_sum_of_levels() {
    let f = two_servers();
    let events = [
        LogEvent::new(ServerId(1), LogLevel::Error, "a", at(0)),
        LogEvent::new(ServerId(1), LogLevel::Error, "b", at(1)),
        LogEvent::new(ServerId(1), LogLevel::Warning, "c", at(2)),
        LogEvent::new(ServerId(1), LogLevel::Info, "d", at(3)),
        LogEvent::new(ServerId(2), LogLevel::Error, "e", at(4)),
    ];
    for event in &events {
        f.aggregator.ingest(event).unwrap();
    }

    for server in [1, 2] {
        let stats = f
            .service
            .get_log_stats_at(&admin(server), StatsWindow::All, at(10))
            .unwrap();
        assert_eq!(stats.total, stats.critical_errors + stats.warnings + stats.info);
    }
    let stats = f.service.get_log_stats(&admin(1), StatsWindow::All).unwrap();
    assert_eq!(stats.critical_errors, 2);
    assert_eq!(stats.warnings, 1);
    assert_eq!(stats.info, 1);
}

#[test]
fn disabled_collection_records_nothing() {
    let f = fixture(vec![Server::new(ServerId(1), "DarkRP", "alice").with_settings(
        ServerSettings {
            collection_enabled: false,
            control_enabled: true,
        },
    )]);

    assert!(f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap().is_none());
    assert!(f.store.is_empty());

    let report = f
        .service
        .ingest_lines(ServerId(1), ["[ERROR] addons/wiremod/lua/a.lua:1: boom"], at(0))
        .unwrap();
    assert_eq!(report.skipped, 1);
    assert!(f.store.is_empty());
}

#[test]
fn disabling_collection_freezes_existing_records() {
    let f = two_servers();
    f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap();
    f.aggregator.ingest(&wiremod_error(1, at(1))).unwrap();
    let before = f.store.list(ServerId(1), &ErrorQuery::default(), at(2)).unwrap().items[0].clone();

    let settings = f
        .service
        .update_settings(
            &admin(1),
            SettingsUpdate {
                collection_enabled: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!settings.collection_enabled);

    assert!(f.aggregator.ingest(&wiremod_error(1, at(10))).unwrap().is_none());
    let report = f
        .service
        .ingest_lines(ServerId(1), ["[ERROR] attempt to index nil"], at(11))
        .unwrap();
    assert_eq!(report.recorded, 0);

    let after = f.store.get(ServerId(1), &before.fingerprint).unwrap();
    assert_eq!(after, before);
    assert_eq!(after.count, 2);
    assert_eq!(after.last_seen, at(1));
    assert_eq!(f.store.len(), 1);
}

#[test]
fn late_events_never_move_last_seen_back() {
    let f = two_servers();
    f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap();
    f.aggregator.ingest(&wiremod_error(1, at(-120))).unwrap();

    let record = &f.service.list_errors(&admin(1), &ErrorQuery::default()).unwrap().items[0];
    assert_eq!(record.count, 2);
    assert_eq!(record.first_seen, at(0));
    assert_eq!(record.last_seen, at(0));

    let stats = f
        .service
        .get_log_stats_at(&admin(1), StatsWindow::LastHour, at(30))
        .unwrap();
    assert_eq!(stats.total, 1);
}

#[test]
fn wiremod_error_five_minutes_apart() {
    let f = two_servers();
    let mut events = f.aggregator.subscribe();

    f.aggregator.ingest(&wiremod_error(1, at(0))).unwrap();
    f.aggregator.ingest(&wiremod_error(1, at(5))).unwrap();

    let page = f.service.list_errors(&admin(1), &ErrorQuery::default()).unwrap();
    assert_eq!(page.total, 1);
    let record = &page.items[0];
    assert_eq!(record.count, 2);
    assert_eq!(record.addon.as_deref(), Some("wiremod"));
    assert_eq!(record.last_seen, at(5));

    // Only the first occurrence announces a new error.
    assert!(events.try_recv().is_ok());
    assert!(events.try_recv().is_err());
}

#[test]
fn addresses_and_line_numbers_do_not_split_records() {
    let f = two_servers();
    f.service
        .ingest_lines(
            ServerId(1),
            [
                "[ERROR] addons/pac3/lua/pac3/core/parts.lua:120: bad argument #1 to 'pairs' (table expected, got nil) at 0x7f3a2c10",
                "[ERROR] addons/pac3/lua/pac3/core/parts.lua:133: bad argument #1 to 'pairs' (table expected, got nil) at 0x55d0e8f0",
            ],
            at(0),
        )
        .unwrap();

    let page = f.service.list_errors(&admin(1), &ErrorQuery::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].count, 2);
    assert_eq!(page.items[0].addon.as_deref(), Some("pac3"));
}

#[test]
fn owners_only_see_their_servers() {
    let f = two_servers();
    f.aggregator.ingest(&wiremod_error(2, at(0))).unwrap();

    let alice_on_bob = RequestContext::new(Actor::user("alice"), ServerId(2));
    assert_err!(f.service.list_errors(&alice_on_bob, &ErrorQuery::default()));
    assert_err!(f.service.clear_logs(&alice_on_bob));

    let bob = RequestContext::new(Actor::user("bob"), ServerId(2));
    assert_ok!(f.service.list_errors(&bob, &ErrorQuery::default()));
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn collector_picks_up_appended_lines() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("console.log");
    std::fs::write(&log_path, "old output before start\n").unwrap();

    let f = fixture(vec![
        Server::new(ServerId(1), "DarkRP", "alice").with_log_path(&log_path),
    ]);
    let collector = LogCollector::new(
        f.aggregator.clone(),
        CollectorConfig {
            poll_interval_ms: 20,
            ..Default::default()
        },
    );
    collector.spawn_all(f.service.servers().list().iter());
    tokio::time::sleep(StdDuration::from_millis(60)).await;

    let mut file = std::fs::OpenOptions::new().append(true).open(&log_path).unwrap();
    writeln!(file, "[ERROR] addons/wiremod/lua/gate.lua:12: attempt to index nil").unwrap();
    writeln!(file, "  1. unknown - addons/wiremod/lua/gate.lua:12").unwrap();
    writeln!(file, "[WARNING] low tickrate").unwrap();
    file.flush().unwrap();

    let mut recorded = 0;
    for _ in 0..100 {
        recorded = f.store.len();
        if recorded == 2 {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert_eq!(recorded, 2);

    let stats = collector.stats(ServerId(1)).unwrap();
    assert_eq!(stats.lines_read, 3);
    assert_eq!(stats.collection_failures, 0);
    collector.shutdown();
}
