//! Parser for the inference server's loader and scheduler log lines
//!
//! Three kinds of line matter:
//!
//! ```text
//! load_tensors: offloaded 20/33 layers to GPU
//! llama_new_context_with_model: n_ctx      = 8192
//! time=... msg="..." runner.name=registry.ollama.ai/library/llama3:latest runner.size="6.2 GiB" runner.vram="4.1 GiB" runner.num_ctx=8192
//! ```
//!
//! A [`LogRecord`] is emitted for every runner line. Layer and `n_ctx` values
//! are carried forward from the most recent such lines seen by the same parser.

use chrono::{DateTime, Utc};
use ctxtune_core::LogRecord;
use regex::Regex;
use std::sync::OnceLock;

struct Patterns {
    runner_name: Regex,
    runner_size: Regex,
    runner_vram: Regex,
    runner_num_ctx: Regex,
    offloaded: Regex,
    n_ctx: Regex,
    time_field: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("valid regex");
        Patterns {
            runner_name: re(r#"runner\.name="?([^"\s]+)"?"#),
            runner_size: re(r#"runner\.size="?([\d.]+)\s*([KMG]i?B|B)"?"#),
            runner_vram: re(r#"runner\.vram="?([\d.]+)\s*([KMG]i?B|B)"?"#),
            runner_num_ctx: re(r"runner\.num_ctx=(\d+)"),
            offloaded: re(r"offloaded (\d+)/(\d+) layers to GPU"),
            n_ctx: re(r"\bn_ctx\s*=\s*(\d+)"),
            time_field: re(r"\btime=(\S+)"),
        }
    })
}

/// Convert a size with a unit suffix to bytes
pub fn parse_size(value: &str, unit: &str) -> Option<u64> {
    let value: f64 = value.parse().ok()?;
    let multiplier = match unit {
        "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "KB" => 1e3,
        "MB" => 1e6,
        "GB" => 1e9,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Strip the registry prefix from a runner name
pub fn normalize_model_name(name: &str) -> String {
    let name = name.rsplit_once("registry.ollama.ai/").map_or(name, |(_, rest)| rest);
    name.strip_prefix("library/").unwrap_or(name).to_string()
}

/// Split a leading RFC 3339 timestamp (as added by `docker logs --timestamps`)
pub fn split_timestamp(line: &str) -> (Option<DateTime<Utc>>, &str) {
    if let Some((head, rest)) = line.split_once(' ') {
        if let Ok(ts) = DateTime::parse_from_rfc3339(head) {
            return (Some(ts.with_timezone(&Utc)), rest);
        }
    }
    (None, line)
}

/// Stateful line parser
#[derive(Debug, Default)]
pub struct LogParser {
    layers: Option<(u32, u32)>,
    n_ctx: Option<u32>,
}

impl LogParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a record if the line describes a runner
    pub fn feed(&mut self, line: &str) -> Option<LogRecord> {
        let p = patterns();
        let (prefix_ts, body) = split_timestamp(line.trim_end());

        if let Some(c) = p.offloaded.captures(body) {
            if let (Ok(gpu), Ok(total)) = (c[1].parse::<u32>(), c[2].parse::<u32>()) {
                self.layers = Some((gpu, total.saturating_sub(gpu)));
            }
            return None;
        }

        if !body.contains("runner.name=") {
            if let Some(c) = p.n_ctx.captures(body) {
                self.n_ctx = c[1].parse().ok();
            }
            return None;
        }

        let name = p.runner_name.captures(body)?;
        let mut record = LogRecord::new(normalize_model_name(&name[1]));

        record.timestamp = p
            .time_field
            .captures(body)
            .and_then(|c| DateTime::parse_from_rfc3339(&c[1]).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .or(prefix_ts);
        record.context_size_requested = p
            .runner_num_ctx
            .captures(body)
            .and_then(|c| c[1].parse().ok());
        record.context_size_actual = self.n_ctx;
        if let Some((gpu, cpu)) = self.layers {
            record.layers_on_gpu = Some(gpu);
            record.layers_on_cpu = Some(cpu);
        }

        let size = p
            .runner_size
            .captures(body)
            .and_then(|c| parse_size(&c[1], &c[2]));
        let vram = p
            .runner_vram
            .captures(body)
            .and_then(|c| parse_size(&c[1], &c[2]));
        match (size, vram) {
            (Some(total), Some(vram)) => record = record.with_memory(total, vram),
            (total, vram) => {
                record.total_bytes = total;
                record.vram_bytes = vram;
            }
        }

        Some(record)
    }
}

/// Parse a batch of lines with a fresh parser
pub fn parse_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Vec<LogRecord> {
    let mut parser = LogParser::new();
    lines.into_iter().filter_map(|l| parser.feed(l)).collect()
}
