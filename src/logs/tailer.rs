//! Polling tailer for a server's console log file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::stream::{self, BoxStream};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::{LogError, Result};
use crate::logs::traits::LogSource;

const READ_CHUNK_BYTES: usize = 64 * 1024;
const MAX_POLL_BYTES: u64 = 1024 * 1024;
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Tails a log file by remembering the byte offset already consumed.
pub struct LogTailer {
    path: PathBuf,
    offset: u64,
    /// Bytes of an incomplete trailing line
    partial: Vec<u8>,
    /// Offset not yet decided; resolved on the first successful poll
    start_at_end: Option<bool>,
    max_poll_bytes: u64,
    max_line_bytes: usize,
}

impl LogTailer {
    /// Tail only lines appended after the first poll.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
            partial: Vec::new(),
            start_at_end: Some(true),
            max_poll_bytes: MAX_POLL_BYTES,
            max_line_bytes: MAX_LINE_BYTES,
        }
    }

    /// Tail the whole file, starting from its first byte.
    pub fn from_start(path: impl Into<PathBuf>) -> Self {
        Self {
            start_at_end: Some(false),
            ..Self::new(path)
        }
    }

    /// Cap the bytes consumed per poll and the length of a buffered line.
    pub fn with_read_limits(mut self, max_poll_bytes: u64, max_line_bytes: usize) -> Self {
        self.max_poll_bytes = max_poll_bytes.max(1);
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    /// Path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    async fn read_appended(&mut self) -> Result<Vec<String>> {
        let mut file = File::open(&self.path)
            .await
            .map_err(|e| LogError::collection_error(&self.path, e.to_string()))?;
        let len = file
            .metadata()
            .await
            .map_err(|e| LogError::collection_error(&self.path, e.to_string()))?
            .len();

        if let Some(at_end) = self.start_at_end.take() {
            if at_end {
                self.offset = len;
                debug!("Tailing {} from byte {}", self.path.display(), len);
                return Ok(Vec::new());
            }
        }

        if len < self.offset {
            info!(
                "Log {} shrank from {} to {} bytes, assuming rotation",
                self.path.display(),
                self.offset,
                len
            );
            self.offset = 0;
            self.partial.clear();
        }

        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .await
            .map_err(|e| LogError::collection_error(&self.path, e.to_string()))?;
        // Anything past the budget is left for the next poll.
        let mut remaining = (len - self.offset).min(self.max_poll_bytes);
        let mut chunk = vec![0u8; READ_CHUNK_BYTES.min(remaining as usize)];
        let mut lines = Vec::new();
        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            let read = file
                .read(&mut chunk[..want])
                .await
                .map_err(|e| LogError::collection_error(&self.path, e.to_string()))?;
            if read == 0 {
                break;
            }
            self.offset += read as u64;
            remaining -= read as u64;
            self.split_lines(&chunk[..read], &mut lines);
        }

        Ok(lines)
    }

    fn split_lines(&mut self, buf: &[u8], lines: &mut Vec<String>) {
        let mut start = 0;
        for (i, byte) in buf.iter().enumerate() {
            if *byte == b'\n' {
                self.partial.extend_from_slice(&buf[start..i]);
                let line = String::from_utf8_lossy(&self.partial);
                lines.push(line.trim_end_matches('\r').to_string());
                self.partial.clear();
                start = i + 1;
            }
        }
        self.partial.extend_from_slice(&buf[start..]);

        if self.partial.len() > self.max_line_bytes {
            warn!(
                "Line in {} exceeds {} bytes without a newline, emitting it as is",
                self.path.display(),
                self.max_line_bytes
            );
            lines.push(String::from_utf8_lossy(&self.partial).into_owned());
            self.partial.clear();
        }
    }
}

impl LogSource for LogTailer {
    async fn poll_lines(&mut self) -> Result<Vec<String>> {
        self.read_appended().await
    }

    fn into_stream(self, interval: Duration) -> BoxStream<'static, Result<Vec<String>>> {
        let stream = stream::unfold(
            (self, time::interval(interval)),
            |(mut tailer, mut interval)| async move {
                interval.tick().await;
                let batch = tailer.poll_lines().await;
                Some((batch, (tailer, interval)))
            },
        );

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::io::Write;

    fn append(path: &Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_starts_at_end_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        append(&path, "[ERROR] old\n");

        let mut tailer = LogTailer::new(&path);
        assert!(tailer.poll_lines().await.unwrap().is_empty());

        append(&path, "[ERROR] new\n");
        assert_eq!(tailer.poll_lines().await.unwrap(), vec!["[ERROR] new"]);
    }

    #[tokio::test]
    async fn test_partial_lines_are_buffered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        append(&path, "[ERROR] first\r\n[WARN");

        let mut tailer = LogTailer::from_start(&path);
        assert_eq!(tailer.poll_lines().await.unwrap(), vec!["[ERROR] first"]);

        append(&path, "ING] second\n");
        assert_eq!(tailer.poll_lines().await.unwrap(), vec!["[WARNING] second"]);
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        append(&path, "[ERROR] one\n[ERROR] two\n");

        let mut tailer = LogTailer::from_start(&path);
        assert_eq!(tailer.poll_lines().await.unwrap().len(), 2);

        std::fs::write(&path, "[INFO] x\n").unwrap();
        assert_eq!(tailer.poll_lines().await.unwrap(), vec!["[INFO] x"]);
        assert_eq!(tailer.offset(), 9);
    }

    #[tokio::test]
    async fn test_large_backlog_is_read_over_several_polls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        let backlog: String = (0..10).map(|i| format!("[INFO] line {}\n", i)).collect();
        append(&path, &backlog);

        // Each line is 14 bytes; 30 bytes per poll covers two full lines.
        let mut tailer = LogTailer::from_start(&path).with_read_limits(30, 1024);
        let first = tailer.poll_lines().await.unwrap();
        assert_eq!(first, vec!["[INFO] line 0", "[INFO] line 1"]);
        assert_eq!(tailer.offset(), 30);

        let mut all = first;
        for _ in 0..10 {
            all.extend(tailer.poll_lines().await.unwrap());
        }
        assert_eq!(all.len(), 10);
        assert_eq!(all[9], "[INFO] line 9");
        assert_eq!(tailer.offset(), backlog.len() as u64);
    }

    #[tokio::test]
    async fn test_endless_line_is_emitted_when_too_long() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        append(&path, &"x".repeat(40));

        let mut tailer = LogTailer::from_start(&path).with_read_limits(1024, 32);
        let lines = tailer.poll_lines().await.unwrap();
        assert_eq!(lines, vec!["x".repeat(40)]);

        append(&path, "tail\n");
        assert_eq!(tailer.poll_lines().await.unwrap(), vec!["tail"]);
    }

    #[tokio::test]
    async fn test_missing_file_is_collection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut tailer = LogTailer::new(dir.path().join("absent.log"));
        let err = tailer.poll_lines().await.unwrap_err();
        assert!(matches!(err, LogError::Collection { .. }));
    }

    #[tokio::test]
    async fn test_stream_yields_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("console.log");
        append(&path, "[INFO] hello\n");

        let mut stream = LogTailer::from_start(&path).into_stream(Duration::from_millis(10));
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first, vec!["[INFO] hello"]);
    }
}
