//! Per-packet feature extraction engine.
//!
//! [`FeatureExtractor`] owns one bounded [`Registry`] per enabled key kind and
//! turns each record into a fixed-length vector:
//!
//! 1. the row is normalized ([`parsers::normalize`]); rows without signal are
//!    counted and produce no vector,
//! 2. the record's keys are built in fixed kind order ([`flow::build_keys`]),
//! 3. for each key the accumulator is fetched (or created), its snapshot for
//!    every lambda is appended to the vector, and only then is the record
//!    applied to it.
//!
//! Snapshots are therefore taken before the packet's own update: a packet is
//! described by the history strictly before it. Records must be fed in
//! capture order; all state lives in the extractor, and it stays consistent
//! between any two records, so a run can stop at any record boundary.

pub mod config;
pub mod error;
pub mod eviction;
pub mod flow;
pub mod parsers;
pub mod source;
pub mod stats;
pub mod types;

pub use self::config::{EvictionPolicy, ExtractorConfig};
pub use self::error::{ExtractError, Result};
pub use self::eviction::Registry;
pub use self::source::{PcapSource, TsvSource};
pub use self::types::{
    FeatureVector, IpVersion, KeyClass, KeyKind, PacketRecord, ProtocolCounts, RawRow,
    RunStats, ShutdownFlag, StatKey,
};

use crate::extractor::stats::{field_count, Accumulator, PAIRED_FIELDS, SINGLE_FIELDS};
use std::sync::atomic::Ordering;

/// Column names of the vectors produced under `config`.
///
/// Depends on nothing but the configuration, so it can be written before the
/// first packet is read. Names follow `<kind>_L<lambda>_<field>`.
pub fn header(config: &ExtractorConfig) -> Vec<String> {
    let mut names = Vec::new();
    for kind in config.enabled_kinds() {
        let fields: &[&str] = if kind.is_paired() { &PAIRED_FIELDS } else { &SINGLE_FIELDS };
        for lambda in &config.lambdas {
            for field in fields {
                names.push(format!("{}_L{}_{}", kind.prefix(), lambda, field));
            }
        }
    }
    names
}

pub struct FeatureExtractor {
    config:     ExtractorConfig,
    /// Enabled kinds, in vector order; parallel to `registries`.
    kinds:      Vec<KeyKind>,
    registries: Vec<Registry>,
    header:     Vec<String>,
    stats:      RunStats,
}

impl FeatureExtractor {
    /// Validates `config` and prepares empty registries.
    ///
    /// # Errors
    /// [`ExtractError::CapacityConfig`] for an unusable configuration.
    pub fn new(config: ExtractorConfig) -> Result<Self> {
        config.validate()?;

        let kinds = config.enabled_kinds();
        let registries = kinds
            .iter()
            .map(|k| Registry::new(*k, config.capacity(*k), config.eviction))
            .collect();
        let header = header(&config);

        Ok(Self {
            config,
            kinds,
            registries,
            header,
            stats: RunStats::default(),
        })
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Length of every vector this extractor emits.
    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn registry(&self, kind: KeyKind) -> Option<&Registry> {
        self.registries.iter().find(|r| r.kind() == kind)
    }

    /// Live entries across every registry of `class`.
    pub fn tracked(&self, class: KeyClass) -> usize {
        self.registries
            .iter()
            .filter(|r| r.kind().class() == class)
            .map(|r| r.len())
            .sum()
    }

    /// Runs one raw row through the whole pipeline.
    ///
    /// Returns `Ok(None)` for a row without signal; no accumulator is touched
    /// in that case. A malformed row is counted and returned as an error the
    /// caller may log and skip.
    pub fn extract(&mut self, row: &RawRow) -> Result<Option<FeatureVector>> {
        self.stats.records_seen += 1;

        let record = match parsers::normalize(row) {
            Ok(record) => record,
            Err(e) => {
                self.stats.malformed += 1;
                return Err(e);
            }
        };
        parsers::tally(row, &mut self.stats.protocols);

        match record {
            Some(record) => Ok(Some(self.assemble(&record))),
            None => {
                self.stats.no_signal += 1;
                Ok(None)
            }
        }
    }

    /// Reads the pre-update snapshot of every key of `record`, then applies
    /// the record to those keys. Only reachable through [`extract`], which
    /// does the record accounting.
    ///
    /// [`extract`]: FeatureExtractor::extract
    fn assemble(&mut self, record: &PacketRecord) -> FeatureVector {
        let keys = flow::build_keys(record, &self.kinds);
        let lambdas = &self.config.lambdas;
        let unit = self.config.unit_weight;
        let now = record.timestamp;
        let frame_len = record.frame_len as f64;

        let mut out = Vec::with_capacity(self.header.len());
        for (key, registry) in keys.iter().zip(self.registries.iter_mut()) {
            if key.is_empty() {
                out.resize(out.len() + field_count(key.kind) * lambdas.len(), 0.0);
                continue;
            }

            let mut acc = registry.get_or_create(&key.id, || Accumulator::new(key.kind, lambdas));
            acc.snapshot_into(now, &mut out);

            let gap = acc.inter_arrival(now);
            let (a, b) = match key.kind {
                KeyKind::Mac | KeyKind::Host => (frame_len, 0.0),
                KeyKind::Jitter => (gap, 0.0),
                KeyKind::SocketPair | KeyKind::SocketDir => (frame_len, gap),
            };
            acc.update(a, b, now, unit);
        }
        debug_assert_eq!(out.len(), self.header.len());

        self.stats.vectors_out += 1;
        self.stats.evictions = self.registries.iter().map(|r| r.evictions()).sum();
        out
    }

    /// Lazily extracts vectors from `rows`, one record at a time.
    ///
    /// Rows without signal are skipped (and counted). Errors are yielded so
    /// the caller can report them; a malformed row does not end the stream,
    /// any other error does. When `shutdown` is set the stream ends at the
    /// next record boundary.
    pub fn stream<I>(&mut self, rows: I, shutdown: Option<ShutdownFlag>) -> FeatureStream<'_, I::IntoIter>
    where
        I: IntoIterator<Item = Result<RawRow>>,
    {
        FeatureStream {
            extractor: self,
            rows: rows.into_iter(),
            shutdown,
            done: false,
        }
    }
}

/// Iterator returned by [`FeatureExtractor::stream`].
pub struct FeatureStream<'a, I> {
    extractor: &'a mut FeatureExtractor,
    rows:      I,
    shutdown:  Option<ShutdownFlag>,
    done:      bool,
}

impl<I> FeatureStream<'_, I> {
    pub fn stats(&self) -> &RunStats {
        self.extractor.stats()
    }
}

impl<I> Iterator for FeatureStream<'_, I>
where
    I: Iterator<Item = Result<RawRow>>,
{
    type Item = Result<FeatureVector>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            if let Some(flag) = &self.shutdown {
                if flag.load(Ordering::Relaxed) {
                    self.done = true;
                    return None;
                }
            }

            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => {
                    if e.is_recoverable() {
                        // The source could not even produce a row for this record.
                        self.extractor.stats.records_seen += 1;
                        self.extractor.stats.malformed += 1;
                    } else {
                        self.done = true;
                    }
                    return Some(Err(e));
                }
            };

            match self.extractor.extract(&row) {
                Ok(Some(vector)) => return Some(Ok(vector)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}
