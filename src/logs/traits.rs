//! Traits for reading raw log lines.

use crate::error::Result;
use futures_util::stream::BoxStream;
use std::time::Duration;

/// A source of raw console lines for one server.
///
/// Implementations return whatever complete lines appeared since the last
/// poll. An empty batch means the source is idle.
pub trait LogSource {
    /// Read newly available complete lines.
    fn poll_lines(&mut self) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;

    /// Turn the source into a stream of poll results taken every `interval`.
    fn into_stream(self, interval: Duration) -> BoxStream<'static, Result<Vec<String>>>
    where
        Self: Sized + Send + 'static;
}
