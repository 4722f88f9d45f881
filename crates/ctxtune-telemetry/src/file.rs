//! Native log-file tail

use crate::parser::parse_lines;
use async_trait::async_trait;
use ctxtune_core::{LogBatch, LogCursor, LogSource};
use std::io::SeekFrom;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

/// Reads records appended to a log file since a byte offset
pub struct FileLogSource {
    path: PathBuf,
    max_read_bytes: u64,
}

impl FileLogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_read_bytes: 20_000,
        }
    }

    /// Cap on bytes read per poll; older data beyond the cap is skipped
    pub fn with_max_read_bytes(mut self, max_read_bytes: u64) -> Self {
        self.max_read_bytes = max_read_bytes.max(1);
        self
    }

    async fn file_len(&self) -> Option<u64> {
        tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
    }

    async fn read_range(&self, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = Vec::with_capacity((end - start) as usize);
        file.take(end - start).read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait]
impl LogSource for FileLogSource {
    async fn cursor(&self) -> LogCursor {
        LogCursor::File {
            offset: self.file_len().await.unwrap_or(0),
        }
    }

    async fn read_records(&self, since: &LogCursor) -> LogBatch {
        let offset = match since {
            LogCursor::File { offset } => *offset,
            _ => return LogBatch::empty(self.cursor().await),
        };

        let Some(len) = self.file_len().await else {
            debug!("Log file {} not readable", self.path.display());
            return LogBatch::empty(since.clone());
        };

        if len < offset {
            // Truncated or rotated: resume from the new end
            debug!("Log file {} shrank, resetting cursor", self.path.display());
            return LogBatch::empty(LogCursor::File { offset: len });
        }
        if len == offset {
            return LogBatch::empty(since.clone());
        }

        let start = offset.max(len.saturating_sub(self.max_read_bytes));
        let buf = match self.read_range(start, len).await {
            Ok(buf) => buf,
            Err(e) => {
                debug!("Failed to read {}: {}", self.path.display(), e);
                return LogBatch::empty(since.clone());
            }
        };

        // Only consume complete lines; a trailing partial line is read next time
        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            return LogBatch::empty(since.clone());
        };
        let complete = &buf[..=last_newline];
        let text = String::from_utf8_lossy(complete);

        let mut lines: Vec<&str> = text.lines().collect();
        if start > offset && !lines.is_empty() {
            // Started mid-file; the first line is probably cut
            lines.remove(0);
        }

        LogBatch {
            records: parse_lines(lines),
            next: LogCursor::File {
                offset: start + complete.len() as u64,
            },
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
