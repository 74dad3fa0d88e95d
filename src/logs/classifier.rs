//! Classification of raw console lines into Lua log events.
//!
//! Recognized line shapes, each optionally preceded by a timestamp
//! (`L 10/19/2026 - 14:03:11: ` as written by srcds, or `[2026-10-19 14:03:11] `):
//!
//! ```text
//! [ERROR] addons/wiremod/lua/wire/wirelib.lua:123: attempt to index a nil value
//! Lua Error: lua/autorun/init.lua:4: unexpected symbol near ')'
//! [WARNING] Tried to use a NULL entity!
//! [INFO] Loaded 34 addons
//! [ulx] addons/ulx/lua/ulx/log.lua:88: bad argument #1 to 'pairs'
//!   1. unknown - addons/wiremod/lua/wire/wirelib.lua:123
//! ```
//!
//! The last line is a stack frame; [`EventAssembler`] attaches frames to the
//! entry line that precedes them.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::error::{LogError, Result};
use crate::logs::data::{LogEvent, LogLevel, ServerId};

lazy_static! {
    static ref SRCDS_TIMESTAMP: Regex =
        Regex::new(r"^L (\d{2})/(\d{2})/(\d{4}) - (\d{2}):(\d{2}):(\d{2}):\s*").unwrap();
    static ref BRACKET_TIMESTAMP: Regex =
        Regex::new(r"^\[(\d{4})-(\d{2})-(\d{2})[ T](\d{2}):(\d{2}):(\d{2})\]\s*").unwrap();
    static ref LEVEL_TAG: Regex = Regex::new(r"(?i)^\[(error|warning|warn|info)\]\s*(.*)$").unwrap();
    static ref LUA_ERROR: Regex = Regex::new(r"(?i)^lua error:\s*(.*)$").unwrap();
    static ref ADDON_TAG: Regex =
        Regex::new(r"^\[([A-Za-z0-9_\-.]+)\]\s+(\S+\.lua:\d+:.*)$").unwrap();
    static ref ADDON_PATH: Regex = Regex::new(r"addons/([^/\s]+)/").unwrap();
    static ref STACK_FRAME: Regex = Regex::new(r"^\s+\d+\.\s+(.+)$").unwrap();
}

/// An entry line that starts a new log event.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedLine {
    pub level: LogLevel,
    pub addon: Option<String>,
    pub message: String,
    /// Timestamp parsed from the line prefix, if present
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of classifying a single line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineKind {
    Entry(ClassifiedLine),
    /// Text of a stack frame, without the leading index
    StackFrame(String),
    Blank,
    Unrecognized,
}

/// Stateless classifier for Garry's Mod console lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineClassifier;

impl LineClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify one raw line.
    pub fn classify(&self, line: &str) -> LineKind {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return LineKind::Blank;
        }

        if let Some(caps) = STACK_FRAME.captures(line) {
            return LineKind::StackFrame(caps[1].trim().to_string());
        }

        let (timestamp, rest) = strip_timestamp(line);
        let rest = rest.trim();

        let parsed = if let Some(caps) = LEVEL_TAG.captures(rest) {
            let level = match caps[1].to_ascii_lowercase().as_str() {
                "error" => LogLevel::Error,
                "info" => LogLevel::Info,
                _ => LogLevel::Warning,
            };
            Some((level, None, caps[2].to_string()))
        } else if let Some(caps) = LUA_ERROR.captures(rest) {
            Some((LogLevel::Error, None, caps[1].to_string()))
        } else {
            ADDON_TAG.captures(rest).map(|caps| {
                (
                    LogLevel::Error,
                    Some(caps[1].to_string()),
                    caps[2].to_string(),
                )
            })
        };

        match parsed {
            Some((level, addon, message)) => {
                let message = message.trim().to_string();
                if message.is_empty() {
                    return LineKind::Unrecognized;
                }
                let addon = addon.or_else(|| addon_from_path(&message));
                LineKind::Entry(ClassifiedLine {
                    level,
                    addon,
                    message,
                    timestamp,
                })
            }
            None => LineKind::Unrecognized,
        }
    }

    /// Classify a line that must be an entry.
    pub fn classify_entry(&self, line: &str) -> Result<ClassifiedLine> {
        match self.classify(line) {
            LineKind::Entry(entry) => Ok(entry),
            _ => Err(LogError::classification_error(line)),
        }
    }
}

/// Extract the addon folder name from a Lua path inside the message.
pub fn addon_from_path(message: &str) -> Option<String> {
    ADDON_PATH
        .captures(message)
        .map(|caps| caps[1].to_string())
}

fn strip_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some(caps) = SRCDS_TIMESTAMP.captures(line) {
        let ts = timestamp_from(&caps, 3, 1, 2);
        return (ts, &line[caps[0].len()..]);
    }
    if let Some(caps) = BRACKET_TIMESTAMP.captures(line) {
        let ts = timestamp_from(&caps, 1, 2, 3);
        return (ts, &line[caps[0].len()..]);
    }
    (None, line)
}

fn timestamp_from(caps: &Captures<'_>, year: usize, month: usize, day: usize) -> Option<DateTime<Utc>> {
    let field = |i: usize| caps[i].parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(caps[year].parse().ok()?, field(month)?, field(day)?)?;
    let naive = date.and_hms_opt(field(4)?, field(5)?, field(6)?)?;
    Some(Utc.from_utc_datetime(&naive))
}

struct PendingEvent {
    entry: ClassifiedLine,
    frames: Vec<String>,
    observed_at: DateTime<Utc>,
}

impl PendingEvent {
    fn into_event(self, server_id: ServerId) -> LogEvent {
        let stack_trace = if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.join("\n"))
        };
        LogEvent {
            server_id,
            level: self.entry.level,
            addon: self.entry.addon,
            message: self.entry.message,
            stack_trace,
            occurred_at: self.entry.timestamp.unwrap_or(self.observed_at),
        }
    }
}

/// Joins entry lines with the stack frames that follow them.
pub struct EventAssembler {
    server_id: ServerId,
    classifier: LineClassifier,
    pending: Option<PendingEvent>,
    unrecognized: u64,
}

impl EventAssembler {
    /// Create an assembler producing events for one server.
    pub fn new(server_id: ServerId) -> Self {
        Self {
            server_id,
            classifier: LineClassifier::new(),
            pending: None,
            unrecognized: 0,
        }
    }

    /// Feed one line; returns the previous event when this line completes it.
    ///
    /// `now` is used as the occurrence time for lines without a timestamp.
    pub fn push(&mut self, line: &str, now: DateTime<Utc>) -> Option<LogEvent> {
        match self.classifier.classify(line) {
            LineKind::Entry(entry) => {
                let done = self.flush();
                self.pending = Some(PendingEvent {
                    entry,
                    frames: Vec::new(),
                    observed_at: now,
                });
                done
            }
            LineKind::StackFrame(frame) => {
                match self.pending.as_mut() {
                    Some(pending) => pending.frames.push(frame),
                    None => self.unrecognized += 1,
                }
                None
            }
            LineKind::Blank => self.flush(),
            LineKind::Unrecognized => {
                self.unrecognized += 1;
                self.flush()
            }
        }
    }

    /// Feed many lines, collecting completed events. The last event stays pending.
    pub fn feed<'a, I>(&mut self, lines: I, now: DateTime<Utc>) -> Vec<LogEvent>
    where
        I: IntoIterator<Item = &'a str>,
    {
        lines
            .into_iter()
            .filter_map(|line| self.push(line, now))
            .collect()
    }

    /// Emit the pending event, if any.
    pub fn flush(&mut self) -> Option<LogEvent> {
        let server_id = self.server_id;
        self.pending.take().map(|p| p.into_event(server_id))
    }

    /// Whether an entry is waiting for more stack frames.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of unrecognized lines since the last call.
    pub fn take_unrecognized(&mut self) -> u64 {
        std::mem::take(&mut self.unrecognized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn entry(line: &str) -> ClassifiedLine {
        LineClassifier::new().classify_entry(line).unwrap()
    }

    #[test]
    fn test_error_tag_with_addon_path() {
        let e = entry("[ERROR] addons/wiremod/lua/wire/wirelib.lua:123: attempt to index a nil value");
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.addon.as_deref(), Some("wiremod"));
        assert!(e.message.ends_with("attempt to index a nil value"));
        assert!(e.timestamp.is_none());
    }

    #[test]
    fn test_level_tags_are_case_insensitive() {
        assert_eq!(entry("[warning] Tried to use a NULL entity!").level, LogLevel::Warning);
        assert_eq!(entry("[WARN] slow think hook").level, LogLevel::Warning);
        assert_eq!(entry("[Info] Loaded 34 addons").level, LogLevel::Info);
        assert_eq!(entry("Lua Error: lua/autorun/init.lua:4: unexpected symbol").level, LogLevel::Error);
    }

    #[test]
    fn test_addon_tag_prefix() {
        let e = entry("[ulx] addons/ulx/lua/ulx/log.lua:88: bad argument #1 to 'pairs'");
        assert_eq!(e.level, LogLevel::Error);
        assert_eq!(e.addon.as_deref(), Some("ulx"));
        assert_eq!(e.message, "addons/ulx/lua/ulx/log.lua:88: bad argument #1 to 'pairs'");
    }

    #[test]
    fn test_srcds_timestamp_prefix() {
        let e = entry("L 10/19/2026 - 14:03:11: [ERROR] lua/init.lua:1: boom");
        assert_eq!(e.timestamp, Some(Utc.with_ymd_and_hms(2026, 10, 19, 14, 3, 11).unwrap()));
        assert_eq!(e.message, "lua/init.lua:1: boom");
        assert_eq!(e.addon, None);
    }

    #[test]
    fn test_bracket_timestamp_prefix() {
        let e = entry("[2026-10-19 08:15:00] [WARNING] something odd");
        assert_eq!(e.timestamp, Some(Utc.with_ymd_and_hms(2026, 10, 19, 8, 15, 0).unwrap()));
        assert_eq!(e.level, LogLevel::Warning);
    }

    #[test]
    fn test_unrecognized_lines() {
        let classifier = LineClassifier::new();
        assert_eq!(classifier.classify("Player joined the game"), LineKind::Unrecognized);
        assert_eq!(classifier.classify("[ERROR]   "), LineKind::Unrecognized);
        assert_eq!(classifier.classify("   "), LineKind::Blank);
        assert!(classifier.classify_entry("hello").is_err());
    }

    #[test]
    fn test_stack_frame() {
        let classifier = LineClassifier::new();
        assert_eq!(
            classifier.classify("  1. unknown - addons/wiremod/lua/wire/wirelib.lua:123"),
            LineKind::StackFrame("unknown - addons/wiremod/lua/wire/wirelib.lua:123".to_string())
        );
    }

    #[test]
    fn test_assembler_attaches_stack_frames() {
        let mut assembler = EventAssembler::new(ServerId(7));
        let lines = [
            "[ERROR] addons/wiremod/lua/wire/wirelib.lua:123: attempt to index a nil value",
            "  1. unknown - addons/wiremod/lua/wire/wirelib.lua:123",
            "   2. Call - lua/includes/modules/hook.lua:84",
            "",
            "[WARNING] Tried to use a NULL entity!",
        ];

        let events = assembler.feed(lines, now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].server_id, ServerId(7));
        assert_eq!(
            events[0].stack_trace.as_deref(),
            Some("unknown - addons/wiremod/lua/wire/wirelib.lua:123\nCall - lua/includes/modules/hook.lua:84")
        );
        assert_eq!(events[0].occurred_at, now());

        assert!(assembler.has_pending());
        let last = assembler.flush().unwrap();
        assert_eq!(last.level, LogLevel::Warning);
        assert!(last.stack_trace.is_none());
        assert!(!assembler.has_pending());
    }

    #[test]
    fn test_assembler_counts_unrecognized() {
        let mut assembler = EventAssembler::new(ServerId(1));
        let events = assembler.feed(
            ["Map changed to gm_construct", "  1. orphan frame", "[INFO] ok"],
            now(),
        );
        assert!(events.is_empty());
        assert_eq!(assembler.take_unrecognized(), 2);
        assert_eq!(assembler.take_unrecognized(), 0);
    }
}
