//! Notifications for newly detected Lua errors.
//!
//! The aggregator publishes [`LuaErrorDetected`](crate::logs::LuaErrorDetected)
//! events; the [`Notifier`] renders them once and delivers them through a
//! persisted-record channel and an email channel.

pub mod channels;
pub mod dispatcher;
pub mod notification;

pub use channels::{
    DatabaseChannel, Delivery, LogTransport, MailChannel, MailMessage, MailTransport,
    MemoryTransport, NotificationChannel, NotificationLog, StoredNotification,
};
pub use dispatcher::Notifier;
pub use notification::ErrorNotification;
