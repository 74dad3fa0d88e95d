//! Background delivery of new-error notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::NotifierConfig;
use crate::error::Result;
use crate::logs::aggregator::LuaErrorDetected;
use crate::notify::channels::{Delivery, NotificationChannel};
use crate::notify::notification::ErrorNotification;

/// Fans each detected error out to every enabled channel.
#[derive(Debug)]
pub struct Notifier {
    config: NotifierConfig,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            channels: Vec::new(),
        }
    }

    /// Add a delivery channel.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Names of the enabled channels.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| c.is_enabled())
            .map(|c| c.name())
            .collect()
    }

    /// Deliver one event through every enabled channel.
    ///
    /// Returns the number of channels that delivered it.
    pub async fn notify(&self, event: &LuaErrorDetected) -> usize {
        let notification = ErrorNotification::from_event(event, &self.config);
        let mut delivered = 0;

        for channel in self.channels.iter().filter(|c| c.is_enabled()) {
            match self.send_with_retry(channel.as_ref(), &notification).await {
                Ok(Delivery::Sent) => delivered += 1,
                Ok(Delivery::Skipped(reason)) => {
                    debug!("Channel {} skipped notification: {}", channel.name(), reason);
                }
                Err(e) => {
                    error!(
                        "Channel {} failed to deliver notification for server {}: {}",
                        channel.name(),
                        notification.server_id,
                        e
                    );
                }
            }
        }
        delivered
    }

    async fn send_with_retry(
        &self,
        channel: &dyn NotificationChannel,
        notification: &ErrorNotification,
    ) -> Result<Delivery> {
        let mut delay = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            match channel.send(notification).await {
                Ok(delivery) => return Ok(delivery),
                Err(e) if attempt < self.config.max_attempts => {
                    warn!(
                        "Channel {} attempt {}/{} failed: {}, retrying in {:?}",
                        channel.name(),
                        attempt,
                        self.config.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume events until the channel closes.
    pub fn spawn(self, mut events: broadcast::Receiver<LuaErrorDetected>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        self.notify(&event).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Notifier lagged behind, {} new-error events skipped", skipped);
                    }
                    Err(RecvError::Closed) => {
                        debug!("Event channel closed, notifier stopping");
                        break;
                    }
                }
            }
        })
    }
}
