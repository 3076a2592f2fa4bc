use clap::Parser;
use netfeat::extractor::config::{DEFAULT_LAMBDAS, DEFAULT_MAX_HOSTS, DEFAULT_MAX_SESSIONS};

/// netfeat: per-packet damped-window feature extraction.
///
/// Replays a capture (tshark TSV export or legacy pcap) and writes one
/// fixed-width feature vector per packet as CSV.
#[derive(Parser, Debug, Clone)]
#[command(
    name    = "netfeat",
    version = "0.3.0",
    about   = "Streaming per-packet feature extractor for network traffic",
    long_about = None,
)]
pub struct Cli {
    // ── Input / output ───────────────────────────────────────────────────────

    /// Capture to replay.
    ///
    /// Files ending in `.tsv` are read as a tshark field export with the
    /// columns in `TSHARK_FIELDS`; anything else is read as legacy pcap.
    #[arg(short = 'r', long = "read", value_name = "FILE")]
    pub input: String,

    /// Write feature vectors to this CSV file instead of stdout.
    #[arg(short = 'w', long = "write", value_name = "PATH")]
    pub output: Option<String>,

    /// Stop after this many input records.
    #[arg(long = "limit", value_name = "N")]
    pub limit: Option<usize>,

    // ── Logging ──────────────────────────────────────────────────────────────

    /// Write log output to this file in addition to stderr.
    #[arg(short = 'o', long = "log-file", value_name = "PATH")]
    pub log_file: Option<String>,

    /// Emit log entries as newline-delimited JSON (NDJSON).
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Log a progress line every N input records. 0 disables progress.
    #[arg(long = "progress-every", value_name = "N", default_value_t = 1000)]
    pub progress_every: u64,

    // ── Extraction ───────────────────────────────────────────────────────────

    /// Decay rate; repeat for several windows. Defaults to 5,3,1,0.1,0.01.
    #[arg(long = "lambda", value_name = "RATE", value_delimiter = ',')]
    pub lambdas: Vec<f64>,

    /// Capacity of each host-class registry (MAC, source address).
    #[arg(long = "max-hosts", value_name = "N", default_value_t = DEFAULT_MAX_HOSTS)]
    pub max_hosts: usize,

    /// Capacity of each session-class registry (jitter, socket pairs).
    #[arg(long = "max-sessions", value_name = "N", default_value_t = DEFAULT_MAX_SESSIONS)]
    pub max_sessions: usize,

    /// Key kinds to compute, comma separated.
    #[arg(
        long = "keys",
        value_name = "LIST",
        value_delimiter = ',',
        default_value = "mac,host,jitter,socket-pair,socket-dir"
    )]
    pub keys: Vec<String>,

    /// Which entry a full registry gives up: least-weight or lru.
    #[arg(long = "eviction", value_name = "POLICY", default_value = "least-weight")]
    pub eviction: String,
}

impl Cli {
    /// Lambdas from the command line, or the default set when none were given.
    pub fn lambdas(&self) -> Vec<f64> {
        if self.lambdas.is_empty() {
            DEFAULT_LAMBDAS.to_vec()
        } else {
            self.lambdas.clone()
        }
    }
}
