//! Notification channels: persisted records and email.

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{LogError, Result};
use crate::notify::notification::ErrorNotification;

/// What a channel did with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Not applicable to this recipient (e.g. no email address)
    Skipped(String),
}

/// A way of delivering notifications.
#[async_trait]
pub trait NotificationChannel: Send + Sync + fmt::Debug {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Deliver one notification.
    async fn send(&self, notification: &ErrorNotification) -> Result<Delivery>;

    /// Disabled channels are skipped by the dispatcher.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// A notification persisted for a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: Uuid,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub data: ErrorNotification,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct NotificationSnapshot {
    saved_at: Option<DateTime<Utc>>,
    notifications: Vec<StoredNotification>,
}

/// Stored notifications, newest last. Holds at most `max_entries`; the
/// oldest are dropped first.
#[derive(Debug)]
pub struct NotificationLog {
    entries: RwLock<VecDeque<StoredNotification>>,
    max_entries: usize,
}

impl Default for NotificationLog {
    fn default() -> Self {
        Self::with_max_entries(crate::DEFAULT_MAX_NOTIFICATIONS)
    }
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            max_entries: max_entries.max(1),
        }
    }

    /// Restore a log from a snapshot file. A missing file yields an empty log.
    pub fn load(path: &Path, max_entries: usize) -> Result<Self> {
        let log = Self::with_max_entries(max_entries);
        if !path.exists() {
            debug!("No notification snapshot at {}, starting empty", path.display());
            return Ok(log);
        }

        let content = fs::read_to_string(path)?;
        let snapshot: NotificationSnapshot = serde_json::from_str(&content)?;
        {
            let mut entries = log.entries.write();
            entries.extend(snapshot.notifications);
            Self::trim(&mut entries, log.max_entries);
        }
        info!(
            "Loaded {} notifications from {}",
            log.len(),
            path.display()
        );
        Ok(log)
    }

    /// Write all notifications to a snapshot file, replacing it atomically.
    pub fn save(&self, path: &Path) -> Result<usize> {
        let notifications: Vec<StoredNotification> = self.entries.read().iter().cloned().collect();
        let count = notifications.len();
        let snapshot = NotificationSnapshot {
            saved_at: Some(Utc::now()),
            notifications,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        fs::rename(&tmp, path)?;

        debug!("Saved {} notifications to {}", count, path.display());
        Ok(count)
    }

    fn trim(entries: &mut VecDeque<StoredNotification>, max_entries: usize) {
        let excess = entries.len().saturating_sub(max_entries);
        if excess > 0 {
            entries.drain(..excess);
            debug!("Dropped {} old notifications", excess);
        }
    }

    /// Store a notification for its owner.
    pub fn push(&self, notification: &ErrorNotification) -> StoredNotification {
        let stored = StoredNotification {
            id: Uuid::new_v4(),
            user_id: notification.owner_id.clone(),
            created_at: Utc::now(),
            read_at: None,
            data: notification.clone(),
        };
        let mut entries = self.entries.write();
        entries.push_back(stored.clone());
        Self::trim(&mut entries, self.max_entries);
        stored
    }

    /// Notifications of one user, newest first.
    pub fn for_user(&self, user_id: &str) -> Vec<StoredNotification> {
        self.entries
            .read()
            .iter()
            .rev()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Mark a notification read. Only its owner may do so.
    pub fn mark_read(&self, user_id: &str, id: Uuid) -> Result<StoredNotification> {
        let mut entries = self.entries.write();
        let entry = entries
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id)
            .ok_or_else(|| LogError::not_found(format!("notification {}", id)))?;
        if entry.read_at.is_none() {
            entry.read_at = Some(Utc::now());
        }
        Ok(entry.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stores notifications in a [`NotificationLog`].
#[derive(Debug, Clone)]
pub struct DatabaseChannel {
    log: Arc<NotificationLog>,
    enabled: bool,
}

impl DatabaseChannel {
    pub fn new(log: Arc<NotificationLog>) -> Self {
        Self { log, enabled: true }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl NotificationChannel for DatabaseChannel {
    fn name(&self) -> &str {
        "database"
    }

    async fn send(&self, notification: &ErrorNotification) -> Result<Delivery> {
        let stored = self.log.push(notification);
        debug!(
            "Stored notification {} for user {}",
            stored.id, stored.user_id
        );
        Ok(Delivery::Sent)
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Hands rendered mails to an outgoing mail system.
#[async_trait]
pub trait MailTransport: Send + Sync + fmt::Debug {
    async fn deliver(&self, message: &MailMessage) -> Result<()>;
}

/// Transport that only logs outgoing mail.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, message: &MailMessage) -> Result<()> {
        info!(to = %message.to, subject = %message.subject, "would send mail");
        debug!(body = %message.body, "mail body");
        Ok(())
    }
}

/// Transport that keeps every mail in memory.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    sent: RwLock<Vec<MailMessage>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mails delivered so far.
    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.read().clone()
    }
}

#[async_trait]
impl MailTransport for MemoryTransport {
    async fn deliver(&self, message: &MailMessage) -> Result<()> {
        self.sent.write().push(message.clone());
        Ok(())
    }
}

/// Sends notifications by email to the server owner.
#[derive(Debug, Clone)]
pub struct MailChannel {
    transport: Arc<dyn MailTransport>,
    app_name: String,
    enabled: bool,
}

impl MailChannel {
    pub fn new(transport: Arc<dyn MailTransport>, app_name: impl Into<String>) -> Self {
        Self {
            transport,
            app_name: app_name.into(),
            enabled: true,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Render the mail for a notification, if the owner has an address.
    pub fn compose(&self, notification: &ErrorNotification) -> Option<MailMessage> {
        notification.owner_email.as_ref().map(|to| MailMessage {
            to: to.clone(),
            subject: notification.subject.clone(),
            body: notification.render_text(&self.app_name),
        })
    }
}

#[async_trait]
impl NotificationChannel for MailChannel {
    fn name(&self) -> &str {
        "mail"
    }

    async fn send(&self, notification: &ErrorNotification) -> Result<Delivery> {
        match self.compose(notification) {
            Some(message) => {
                self.transport.deliver(&message).await?;
                Ok(Delivery::Sent)
            }
            None => Ok(Delivery::Skipped(format!(
                "user {} has no email address",
                notification.owner_id
            ))),
        }
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}
