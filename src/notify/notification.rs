//! Content of the "new Lua error detected" notification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NotifierConfig;
use crate::logs::aggregator::LuaErrorDetected;
use crate::logs::data::{LogLevel, ServerId};

/// Maximum characters of the error message shown in a notification.
pub const EXCERPT_LENGTH: usize = 100;

/// Date format used for timestamps shown to users.
pub const DISPLAY_DATE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Truncate text to `max` characters, appending `...` when cut.
pub fn excerpt(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    format!("{}...", cut)
}

/// Format a timestamp the way the panel displays it.
pub fn format_display_date(at: DateTime<Utc>) -> String {
    at.format(DISPLAY_DATE_FORMAT).to_string()
}

/// Link to the Lua log viewer of a server.
pub fn viewer_url(base_url: &str, server_id: ServerId) -> String {
    format!("{}/server/{}/lua-logs", base_url.trim_end_matches('/'), server_id)
}

/// A rendered notification, shared by every channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNotification {
    pub server_id: ServerId,
    /// Recipient user
    pub owner_id: String,
    pub owner_email: Option<String>,
    pub subject: String,
    pub greeting: String,
    pub level: LogLevel,
    /// Message truncated to [`EXCERPT_LENGTH`] characters
    pub excerpt: String,
    /// Addon name, `Unknown` when none
    pub addon: String,
    /// First-seen time, `dd/mm/YYYY HH:MM:SS`
    pub first_seen: String,
    pub fingerprint: String,
    pub url: String,
    pub reopened: bool,
}

impl ErrorNotification {
    /// Build the notification for a detected error.
    pub fn from_event(event: &LuaErrorDetected, config: &NotifierConfig) -> Self {
        let subject = if event.reopened {
            format!("Lua error reopened on {}", event.server_name)
        } else {
            format!("New Lua error on {}", event.server_name)
        };

        Self {
            server_id: event.server_id,
            owner_id: event.owner_id.clone(),
            owner_email: event.owner_email.clone(),
            subject,
            greeting: "Hello!".to_string(),
            level: event.error.level,
            excerpt: excerpt(&event.error.message, EXCERPT_LENGTH),
            addon: event
                .error
                .addon
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            first_seen: format_display_date(event.error.first_seen),
            fingerprint: event.error.fingerprint.clone(),
            url: viewer_url(&config.base_url, event.server_id),
            reopened: event.reopened,
        }
    }

    /// Plain-text mail body.
    pub fn render_text(&self, app_name: &str) -> String {
        let intro = if self.reopened {
            "A previously resolved Lua error has occurred again on your server."
        } else {
            "A new Lua error has been detected on your server."
        };
        format!(
            "{greeting}\n\n{intro}\n\nError: {excerpt}\nLevel: {level}\nAddon: {addon}\nFirst seen: {first_seen}\n\nView the logs: {url}\n\n-- {app}\n",
            greeting = self.greeting,
            intro = intro,
            excerpt = self.excerpt,
            level = self.level,
            addon = self.addon,
            first_seen = self.first_seen,
            url = self.url,
            app = app_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::data::{LogEvent, LuaError};
    use chrono::TimeZone;

    fn detected(message: &str, addon: Option<&str>) -> LuaErrorDetected {
        let mut event = LogEvent::new(
            ServerId(12),
            LogLevel::Error,
            message,
            Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
        );
        event.addon = addon.map(str::to_string);
        LuaErrorDetected {
            server_id: ServerId(12),
            server_name: "Sandbox #1".to_string(),
            owner_id: "42".to_string(),
            owner_email: Some("owner@example.com".to_string()),
            error: LuaError::first_occurrence(&event, "abc"),
            reopened: false,
        }
    }

    #[test]
    fn test_excerpt_truncates_to_100_chars() {
        let long = "x".repeat(150);
        let cut = excerpt(&long, EXCERPT_LENGTH);
        assert_eq!(cut.len(), 103);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("short", EXCERPT_LENGTH), "short");
        assert_eq!(excerpt(&"é".repeat(100), EXCERPT_LENGTH), "é".repeat(100));
    }

    #[test]
    fn test_notification_fields() {
        let config = NotifierConfig {
            base_url: "https://panel.example.com/".to_string(),
            ..Default::default()
        };
        let n = ErrorNotification::from_event(&detected("attempt to index nil", None), &config);

        assert_eq!(n.subject, "New Lua error on Sandbox #1");
        assert_eq!(n.addon, "Unknown");
        assert_eq!(n.first_seen, "04/03/2026 05:06:07");
        assert_eq!(n.url, "https://panel.example.com/server/12/lua-logs");

        let body = n.render_text("Luawatch");
        assert!(body.starts_with("Hello!"));
        assert!(body.contains("Error: attempt to index nil"));
    }

    #[test]
    fn test_reopened_subject() {
        let mut event = detected("boom", Some("wiremod"));
        event.reopened = true;
        let n = ErrorNotification::from_event(&event, &NotifierConfig::default());
        assert_eq!(n.subject, "Lua error reopened on Sandbox #1");
        assert_eq!(n.addon, "wiremod");
    }
}
