//! Container log tail via `docker logs`

use crate::command;
use crate::parser::{parse_lines, split_timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use ctxtune_core::{LogBatch, LogCursor, LogSource};
use std::time::Duration;
use tracing::debug;

/// Reads records a container logged since a timestamp
pub struct DockerLogSource {
    container: String,
    binary: String,
    timeout: Duration,
}

impl DockerLogSource {
    pub fn new(container: impl Into<String>, timeout: Duration) -> Self {
        Self {
            container: container.into(),
            binary: "docker".to_string(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// Merge stdout and stderr by their docker timestamps. Returns the ordered
/// lines and the newest timestamp seen.
pub fn order_lines<'a>(
    stdout: &'a str,
    stderr: &'a str,
) -> (Vec<&'a str>, Option<DateTime<Utc>>) {
    let mut stamped: Vec<(Option<DateTime<Utc>>, &str)> = stdout
        .lines()
        .chain(stderr.lines())
        .map(|line| (split_timestamp(line).0, line))
        .collect();
    // Stable sort keeps per-stream order for lines without a timestamp
    stamped.sort_by_key(|(ts, _)| *ts);

    let newest = stamped.iter().filter_map(|(ts, _)| *ts).max();
    (stamped.into_iter().map(|(_, line)| line).collect(), newest)
}

#[async_trait]
impl LogSource for DockerLogSource {
    async fn cursor(&self) -> LogCursor {
        LogCursor::Container { since: Utc::now() }
    }

    async fn read_records(&self, since: &LogCursor) -> LogBatch {
        let since_ts = match since {
            LogCursor::Container { since } => *since,
            _ => return LogBatch::empty(self.cursor().await),
        };

        let since_arg = since_ts.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let args = [
            "logs",
            "--timestamps",
            "--since",
            since_arg.as_str(),
            self.container.as_str(),
        ];

        let output = match command::run(&self.binary, &args, self.timeout).await {
            Ok(output) => output,
            Err(e) => {
                // Container gone or restarting: start over from now
                debug!("docker logs for {} failed: {}", self.container, e);
                return LogBatch::empty(self.cursor().await);
            }
        };

        let (lines, newest) = order_lines(&output.stdout, &output.stderr);
        let next = match newest {
            Some(ts) if ts >= since_ts => LogCursor::Container {
                since: ts + ChronoDuration::nanoseconds(1),
            },
            _ => since.clone(),
        };

        LogBatch {
            records: parse_lines(lines),
            next,
        }
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}
