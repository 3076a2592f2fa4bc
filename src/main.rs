mod cli;

use clap::Parser;
use cli::Cli;
use netfeat::extractor::{
    self, EvictionPolicy, ExtractError, ExtractorConfig, FeatureExtractor, KeyClass, KeyKind,
    PcapSource, RawRow, ShutdownFlag, TsvSource,
};
use netfeat::logger::{Event, Logger, SharedLogger};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

type RowSource = Box<dyn Iterator<Item = extractor::Result<RawRow>>>;

fn main() {
    let cli = Cli::parse();

    let logger: SharedLogger = match Logger::new(cli.json, cli.log_file.as_deref()) {
        Ok(logger) => Arc::new(logger),
        Err(e) => {
            eprintln!("cannot open log file: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = run(&cli, &logger) {
        logger.log(&Event::Info { message: &format!("fatal: {}", e) });
        process::exit(1);
    }
}

fn run(cli: &Cli, logger: &SharedLogger) -> Result<(), ExtractError> {
    // ── Startup ──────────────────────────────────────────────────────────────
    // Everything that can fail before the first record is fatal.
    let config = build_config(cli)?;
    let mut extractor = FeatureExtractor::new(config)?;
    let rows = open_source(&cli.input)?;
    let mut writer = open_output(cli.output.as_deref())?;
    writer.write_record(extractor.header())?;

    log_config(logger, cli, &extractor);

    let shutdown: ShutdownFlag = Arc::new(AtomicBool::new(false));
    register_shutdown_handler(Arc::clone(&shutdown), Arc::clone(logger));

    let rows: RowSource = match cli.limit {
        Some(n) => Box::new(rows.take(n)),
        None => rows,
    };

    // ── Replay ───────────────────────────────────────────────────────────────
    let started = Instant::now();
    let mut next_progress = cli.progress_every;
    let mut write_error = None;

    let mut stream = extractor.stream(rows, Some(shutdown));
    while let Some(item) = stream.next() {
        match item {
            Ok(vector) => {
                let record = vector.iter().map(|v| v.to_string());
                if let Err(e) = writer.write_record(record) {
                    write_error = Some(ExtractError::from(e));
                    break;
                }
            }
            Err(e) if e.is_recoverable() => {
                logger.log(&Event::Malformed {
                    index:  stream.stats().records_seen,
                    reason: &e.to_string(),
                });
            }
            Err(e) => {
                // The stream ends after a fatal source error; keep the
                // vectors written so far and report.
                logger.log(&Event::Info {
                    message: &format!("input stopped: {}", e),
                });
            }
        }

        if cli.progress_every > 0 {
            let stats = stream.stats();
            if stats.records_seen >= next_progress {
                logger.log(&Event::Progress {
                    records: stats.records_seen,
                    vectors: stats.vectors_out,
                });
                next_progress = (stats.records_seen / cli.progress_every + 1) * cli.progress_every;
            }
        }
    }
    drop(stream);

    if let Err(e) = writer.flush() {
        if write_error.is_none() {
            write_error = Some(ExtractError::Io(e));
        }
    }

    print_summary(logger, &extractor, started);

    match write_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Builds the extractor configuration from command-line arguments.
fn build_config(cli: &Cli) -> Result<ExtractorConfig, ExtractError> {
    let mut enabled = Vec::new();
    for name in &cli.keys {
        let kind = KeyKind::from_name(name).ok_or_else(|| {
            ExtractError::CapacityConfig(format!("unknown key kind {:?}", name))
        })?;
        if !enabled.contains(&kind) {
            enabled.push(kind);
        }
    }

    let eviction = EvictionPolicy::from_name(&cli.eviction).ok_or_else(|| {
        ExtractError::CapacityConfig(format!("unknown eviction policy {:?}", cli.eviction))
    })?;

    Ok(ExtractorConfig {
        lambdas: cli.lambdas(),
        max_hosts: cli.max_hosts,
        max_sessions: cli.max_sessions,
        enabled,
        eviction,
        ..ExtractorConfig::default()
    })
}

/// Opens the capture, picking the reader from the file extension.
fn open_source(path: &str) -> Result<RowSource, ExtractError> {
    let path = Path::new(path);
    let is_tsv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("tsv"))
        .unwrap_or(false);

    if is_tsv {
        Ok(Box::new(TsvSource::open(path)?))
    } else {
        Ok(Box::new(PcapSource::open(path)?))
    }
}

fn open_output(path: Option<&str>) -> Result<csv::Writer<Box<dyn Write>>, ExtractError> {
    let sink: Box<dyn Write> = match path {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout()),
    };
    Ok(csv::Writer::from_writer(sink))
}

fn log_config(logger: &SharedLogger, cli: &Cli, extractor: &FeatureExtractor) {
    logger.log(&Event::Config {
        source: &cli.input,
        width:  extractor.width(),
        config: extractor.config(),
    });
}

/// Registers a signal handler for graceful shutdown on Ctrl+C.
///
/// The replay loop checks the flag between records, so the output file is
/// always left with whole rows.
fn register_shutdown_handler(shutdown: ShutdownFlag, logger: SharedLogger) {
    let handler_logger = Arc::clone(&logger);
    let registered = ctrlc::set_handler(move || {
        handler_logger.log(&Event::Info {
            message: "Ctrl+C received, stopping at the next record",
        });
        shutdown.store(true, Ordering::SeqCst);
    });
    if let Err(e) = registered {
        logger.log(&Event::Info {
            message: &format!("Ctrl+C handler unavailable: {}", e),
        });
    }
}

/// Logs the run summary: counters, live registry sizes and protocol mix.
fn print_summary(logger: &SharedLogger, extractor: &FeatureExtractor, started: Instant) {
    let stats = extractor.stats();
    logger.log(&Event::RunSummary {
        duration_secs: started.elapsed().as_secs_f64(),
        dropped:       stats.dropped(),
        host_keys:     extractor.tracked(KeyClass::Host),
        session_keys:  extractor.tracked(KeyClass::Session),
        stats,
    });
}
