//! Structured logging for netfeat.
//!
//! Provides a [`Logger`] that writes events to stderr and optionally to a log
//! file. Output can be formatted as human-readable plain text or as
//! newline-delimited JSON (NDJSON). Stdout is reserved for the feature CSV
//! when no output file is given, so log lines never mix with vectors.

use crate::extractor::{ExtractorConfig, RunStats};
use chrono::Local;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

// ── Event types ──────────────────────────────────────────────────────────────

/// All distinct event kinds that netfeat can emit.
///
/// The `#[serde(tag = "event")]` attribute puts an `"event"` key in the JSON
/// output so consumers can filter by type.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event<'a> {
    /// Informational startup / status message.
    Info { message: &'a str },

    /// Effective run configuration, logged once before the first record.
    Config {
        source: &'a str,
        width:  usize,
        #[serde(flatten)]
        config: &'a ExtractorConfig,
    },

    /// A record was skipped because it could not be parsed.
    Malformed { index: u64, reason: &'a str },

    /// Periodic progress while replaying.
    Progress { records: u64, vectors: u64 },

    /// Run summary emitted when the source is exhausted or on Ctrl+C.
    RunSummary {
        duration_secs: f64,
        dropped:       u64,
        host_keys:     usize,
        session_keys:  usize,
        #[serde(flatten)]
        stats:         &'a RunStats,
    },
}

// ── Logger ───────────────────────────────────────────────────────────────────

/// Shared, thread-safe structured logger.
///
/// The internal `Mutex` serialises file writes so that lines are never
/// interleaved when the Ctrl+C handler and the main loop both log.
pub struct Logger {
    json: bool,
    file: Option<Mutex<BufWriter<std::fs::File>>>,
}

pub type SharedLogger = Arc<Logger>;

impl Logger {
    /// Creates a new logger.
    ///
    /// # Arguments
    /// * `json`     - Emit NDJSON instead of plain text when `true`.
    /// * `log_path` - If `Some`, open (or create) this file for appended writes.
    ///
    /// # Errors
    /// Returns an `io::Error` if the log file cannot be opened or created.
    pub fn new(json: bool, log_path: Option<&str>) -> io::Result<Self> {
        let file = match log_path {
            Some(path) => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Mutex::new(BufWriter::new(f)))
            }
            None => None,
        };

        Ok(Self { json, file })
    }

    /// Logs a single [`Event`] to stderr and, if configured, the log file.
    pub fn log(&self, event: &Event) {
        let line = self.format(event);

        eprintln!("{}", line);

        if let Some(mutex) = &self.file {
            if let Ok(mut writer) = mutex.lock() {
                let _ = writeln!(writer, "{}", line);
                let _ = writer.flush();
            }
        }
    }

    /// Renders one event as a single output line, timestamp included.
    fn format(&self, event: &Event) -> String {
        let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string();

        if self.json {
            let mut val = serde_json::to_value(event).unwrap_or_default();
            if let Some(obj) = val.as_object_mut() {
                obj.insert("timestamp".to_string(), serde_json::Value::String(timestamp));
            }
            serde_json::to_string(&val).unwrap_or_default()
        } else {
            format!("[{}] {}", timestamp, plain_text(event))
        }
    }
}

/// Formats an [`Event`] as a human-readable plain-text string (no timestamp).
fn plain_text(event: &Event) -> String {
    match event {
        Event::Info { message } =>
            format!("[INFO] {}", message),

        Event::Config { source, width, config } => {
            let keys = config
                .enabled_kinds()
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "[CONFIG] source={} lambdas={:?} keys={} max_hosts={} max_sessions={} eviction={} width={}",
                source, config.lambdas, keys, config.max_hosts, config.max_sessions,
                config.eviction.name(), width
            )
        }

        Event::Malformed { index, reason } =>
            format!("[MALFORMED] record {}: {}", index, reason),

        Event::Progress { records, vectors } =>
            format!("[PROGRESS] {} records, {} vectors", records, vectors),

        Event::RunSummary { duration_secs, dropped, host_keys, session_keys, stats } => {
            let p = &stats.protocols;
            format!(
                "[SUMMARY] duration={:.2}s seen={} dropped={} malformed={} vectors={} \
                 host_keys={} session_keys={} evictions={} \
                 ipv4={} ipv6={} tcp={} udp={} icmp={} arp={} link_only={}",
                duration_secs, stats.records_seen, dropped, stats.malformed, stats.vectors_out,
                host_keys, session_keys, stats.evictions,
                p.ipv4, p.ipv6, p.tcp, p.udp, p.icmp, p.arp, p.link_only
            )
        }
    }
}
