//! Time-decayed incremental statistics.
//!
//! Every key owns one [`Accumulator`], which holds an independent estimator
//! per configured decay rate. An estimator keeps a decayed weight, a decayed
//! mean and a decayed sum of squared deviations (and, for paired channels, a
//! decayed co-moment). Before each observation the existing state is scaled
//! by `exp(-lambda * elapsed)`; the observation then enters with the unit
//! weight through a weighted Welford step, which avoids the cancellation
//! error of the sum/sum-of-squares formulation.
//!
//! Snapshots are pure reads. A snapshot taken at time `t` reports the weight
//! decayed to `t`, so an idle key reads as carrying little evidence without
//! anything having to expire it.

use crate::extractor::types::KeyKind;

/// Snapshot fields of a single-scalar channel, in vector order.
pub const SINGLE_FIELDS: [&str; 3] = ["weight", "mean", "std"];

/// Snapshot fields of a paired channel, in vector order.
pub const PAIRED_FIELDS: [&str; 7] = [
    "weight",
    "mean",
    "std",
    "jitter_mean",
    "jitter_std",
    "covariance",
    "correlation",
];

/// Number of values one lambda contributes for `kind`.
pub fn field_count(kind: KeyKind) -> usize {
    if kind.is_paired() { PAIRED_FIELDS.len() } else { SINGLE_FIELDS.len() }
}

/// Multiplier applied to state last touched at `last` when read at `now`.
///
/// Out-of-order timestamps are treated as simultaneous so decay can only
/// shrink state.
fn decay_factor(lambda: f64, last: Option<f64>, now: f64) -> f64 {
    match last {
        Some(last) => (-lambda * (now - last).max(0.0)).exp(),
        None => 1.0,
    }
}

fn advance(last: Option<f64>, now: f64) -> Option<f64> {
    Some(match last {
        Some(last) => last.max(now),
        None => now,
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatSnapshot {
    pub weight: f64,
    pub mean:   f64,
    pub std:    f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedSnapshot {
    pub weight:      f64,
    pub mean:        f64,
    pub std:         f64,
    pub jitter_mean: f64,
    pub jitter_std:  f64,
    pub covariance:  f64,
    /// `|covariance| / (std * jitter_std)`, 0 when either deviation is 0.
    pub correlation: f64,
}

/// `ln(weight) + lambda * last_update`: the log of the weight projected
/// back to `t = 0`. At any common read time `now` the decayed weight is
/// `exp(retention - lambda * now)`, so ordering by this value orders entries
/// by decayed weight without touching `now`, and the value only changes when
/// the estimator is updated.
fn retention(lambda: f64, weight: f64, last_update: Option<f64>) -> f64 {
    match last_update {
        Some(t) if weight > 0.0 => weight.ln() + lambda * t,
        _ => f64::NEG_INFINITY,
    }
}

/// Decayed mean/variance of one scalar at one decay rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecayedStat {
    lambda:      f64,
    weight:      f64,
    mean:        f64,
    m2:          f64,
    last_update: Option<f64>,
}

impl DecayedStat {
    pub fn new(lambda: f64) -> Self {
        Self { lambda, weight: 0.0, mean: 0.0, m2: 0.0, last_update: None }
    }

    pub fn last_update(&self) -> Option<f64> {
        self.last_update
    }

    /// Stored weight decayed to `now`.
    pub fn weight_at(&self, now: f64) -> f64 {
        self.weight * decay_factor(self.lambda, self.last_update, now)
    }

    /// Population variance, clamped at zero.
    pub fn variance(&self) -> f64 {
        if self.weight > 0.0 { (self.m2 / self.weight).max(0.0) } else { 0.0 }
    }

    pub fn update(&mut self, value: f64, now: f64, unit: f64) {
        let d = decay_factor(self.lambda, self.last_update, now);
        self.weight *= d;
        self.m2 *= d;

        let w = self.weight + unit;
        let delta = value - self.mean;
        self.mean += delta * unit / w;
        self.m2 += unit * delta * (value - self.mean);
        self.weight = w;
        self.last_update = advance(self.last_update, now);
    }

    pub fn snapshot(&self, now: f64) -> StatSnapshot {
        if self.weight <= 0.0 {
            return StatSnapshot { weight: 0.0, mean: 0.0, std: 0.0 };
        }
        StatSnapshot {
            weight: self.weight_at(now),
            mean:   self.mean,
            std:    self.variance().sqrt(),
        }
    }
}

/// Decayed statistics of two scalars observed together, plus their
/// co-moment, at one decay rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PairedStat {
    lambda:      f64,
    weight:      f64,
    mean_a:      f64,
    m2_a:        f64,
    mean_b:      f64,
    m2_b:        f64,
    co_moment:   f64,
    last_update: Option<f64>,
}

impl PairedStat {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda,
            weight: 0.0,
            mean_a: 0.0,
            m2_a: 0.0,
            mean_b: 0.0,
            m2_b: 0.0,
            co_moment: 0.0,
            last_update: None,
        }
    }

    pub fn weight_at(&self, now: f64) -> f64 {
        self.weight * decay_factor(self.lambda, self.last_update, now)
    }

    pub fn update(&mut self, a: f64, b: f64, now: f64, unit: f64) {
        let d = decay_factor(self.lambda, self.last_update, now);
        self.weight *= d;
        self.m2_a *= d;
        self.m2_b *= d;
        self.co_moment *= d;

        let w = self.weight + unit;
        let delta_a = a - self.mean_a;
        let delta_b = b - self.mean_b;
        self.mean_a += delta_a * unit / w;
        self.mean_b += delta_b * unit / w;
        self.m2_a += unit * delta_a * (a - self.mean_a);
        self.m2_b += unit * delta_b * (b - self.mean_b);
        self.co_moment += unit * delta_a * (b - self.mean_b);
        self.weight = w;
        self.last_update = advance(self.last_update, now);
    }

    pub fn snapshot(&self, now: f64) -> PairedSnapshot {
        if self.weight <= 0.0 {
            return PairedSnapshot {
                weight: 0.0,
                mean: 0.0,
                std: 0.0,
                jitter_mean: 0.0,
                jitter_std: 0.0,
                covariance: 0.0,
                correlation: 0.0,
            };
        }

        let std_a = (self.m2_a / self.weight).max(0.0).sqrt();
        let std_b = (self.m2_b / self.weight).max(0.0).sqrt();
        let covariance = self.co_moment / self.weight;
        let correlation = if std_a > 0.0 && std_b > 0.0 {
            (covariance.abs() / (std_a * std_b)).min(1.0)
        } else {
            0.0
        };

        PairedSnapshot {
            weight: self.weight_at(now),
            mean: self.mean_a,
            std: std_a,
            jitter_mean: self.mean_b,
            jitter_std: std_b,
            covariance,
            correlation,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Channels {
    Single(Vec<DecayedStat>),
    Paired(Vec<PairedStat>),
}

/// All per-lambda estimators for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    channels:  Channels,
    /// Timestamp of the key's latest packet, for inter-arrival times.
    last_seen: Option<f64>,
}

impl Accumulator {
    /// An empty accumulator shaped for `kind`, one estimator per lambda.
    pub fn new(kind: KeyKind, lambdas: &[f64]) -> Self {
        let channels = if kind.is_paired() {
            Channels::Paired(lambdas.iter().map(|l| PairedStat::new(*l)).collect())
        } else {
            Channels::Single(lambdas.iter().map(|l| DecayedStat::new(*l)).collect())
        };
        Self { channels, last_seen: None }
    }

    /// Latest packet time, `None` before the first observation.
    pub fn last_seen(&self) -> Option<f64> {
        self.last_seen
    }

    /// Seconds since the key's previous packet; 0 for the first packet.
    pub fn inter_arrival(&self, now: f64) -> f64 {
        self.last_seen.map(|last| (now - last).max(0.0)).unwrap_or(0.0)
    }

    /// Time-invariant eviction rank: the retention of the slowest-decaying
    /// estimator, which holds the bulk of the weight of any idle key.
    /// `NEG_INFINITY` before the first observation.
    pub fn retention(&self) -> f64 {
        let slowest = |a: &(f64, f64), b: &(f64, f64)| a.0.total_cmp(&b.0);
        let best = match &self.channels {
            Channels::Single(stats) => stats
                .iter()
                .map(|s| (s.lambda, retention(s.lambda, s.weight, s.last_update)))
                .min_by(slowest),
            Channels::Paired(stats) => stats
                .iter()
                .map(|s| (s.lambda, retention(s.lambda, s.weight, s.last_update)))
                .min_by(slowest),
        };
        best.map(|(_, r)| r).unwrap_or(f64::NEG_INFINITY)
    }

    /// Sum over lambdas of the weight decayed to `now`.
    pub fn total_weight(&self, now: f64) -> f64 {
        match &self.channels {
            Channels::Single(stats) => stats.iter().map(|s| s.weight_at(now)).sum(),
            Channels::Paired(stats) => stats.iter().map(|s| s.weight_at(now)).sum(),
        }
    }

    /// Appends the snapshot of every lambda, in lambda order, without
    /// mutating state.
    pub fn snapshot_into(&self, now: f64, out: &mut Vec<f64>) {
        match &self.channels {
            Channels::Single(stats) => {
                for s in stats {
                    let snap = s.snapshot(now);
                    out.extend_from_slice(&[snap.weight, snap.mean, snap.std]);
                }
            }
            Channels::Paired(stats) => {
                for s in stats {
                    let snap = s.snapshot(now);
                    out.extend_from_slice(&[
                        snap.weight,
                        snap.mean,
                        snap.std,
                        snap.jitter_mean,
                        snap.jitter_std,
                        snap.covariance,
                        snap.correlation,
                    ]);
                }
            }
        }
    }

    /// Feeds one scalar to every lambda. `b` is used only by paired
    /// accumulators.
    pub fn update(&mut self, a: f64, b: f64, now: f64, unit: f64) {
        match &mut self.channels {
            Channels::Single(stats) => {
                for s in stats.iter_mut() {
                    s.update(a, now, unit);
                }
            }
            Channels::Paired(stats) => {
                for s in stats.iter_mut() {
                    s.update(a, b, now, unit);
                }
            }
        }
        self.last_seen = advance(self.last_seen, now);
    }
}
