use crate::extractor::error::{ExtractError, Result};
use crate::extractor::types::{KeyClass, KeyKind};
use serde::Serialize;

/// Decay rates run in parallel for every key.
///
/// The effective window of a rate is `1/lambda` seconds: 5 covers the last
/// ~200 ms of a channel, 0.01 roughly the last 100 seconds. The spread lets
/// one vector describe both short bursts and longer trends.
pub const DEFAULT_LAMBDAS: [f64; 5] = [5.0, 3.0, 1.0, 0.1, 0.01];

/// Default capacity for each host-class registry (MAC, source address).
pub const DEFAULT_MAX_HOSTS: usize = 100_000;

/// Default capacity for each session-class registry (jitter, socket pairs).
pub const DEFAULT_MAX_SESSIONS: usize = 100_000;

/// Weight given to a single observation.
pub const UNIT_WEIGHT: f64 = 1.0;

/// Which entry a full registry gives up to make room for a new key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EvictionPolicy {
    /// Smallest decayed weight on the slowest lambda. Ties go to the oldest
    /// last update, then the smallest key text.
    #[default]
    LeastWeight,
    /// Oldest last update, then the smallest key text.
    Lru,
}

impl EvictionPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "least-weight" => Some(EvictionPolicy::LeastWeight),
            "lru"          => Some(EvictionPolicy::Lru),
            _              => None,
        }
    }

    /// CLI spelling, the inverse of [`EvictionPolicy::from_name`].
    pub fn name(self) -> &'static str {
        match self {
            EvictionPolicy::LeastWeight => "least-weight",
            EvictionPolicy::Lru         => "lru",
        }
    }
}

/// Run configuration. Fixed for the lifetime of a [`FeatureExtractor`];
/// the vector layout is derived from it once.
///
/// [`FeatureExtractor`]: crate::extractor::FeatureExtractor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractorConfig {
    pub lambdas:      Vec<f64>,
    pub max_hosts:    usize,
    pub max_sessions: usize,
    /// Enabled key kinds. Order is normalized to [`KeyKind::ALL`] order.
    pub enabled:      Vec<KeyKind>,
    pub eviction:     EvictionPolicy,
    pub unit_weight:  f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            lambdas:      DEFAULT_LAMBDAS.to_vec(),
            max_hosts:    DEFAULT_MAX_HOSTS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            enabled:      KeyKind::ALL.to_vec(),
            eviction:     EvictionPolicy::LeastWeight,
            unit_weight:  UNIT_WEIGHT,
        }
    }
}

impl ExtractorConfig {
    /// Capacity of the registry backing `kind`.
    pub fn capacity(&self, kind: KeyKind) -> usize {
        match kind.class() {
            KeyClass::Host    => self.max_hosts,
            KeyClass::Session => self.max_sessions,
        }
    }

    pub fn is_enabled(&self, kind: KeyKind) -> bool {
        self.enabled.contains(&kind)
    }

    /// Enabled kinds in vector order, without duplicates.
    pub fn enabled_kinds(&self) -> Vec<KeyKind> {
        KeyKind::ALL
            .iter()
            .copied()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }

    /// Rejects configurations that would break the capacity or vector-length
    /// contracts. Called by the extractor before any packet is processed.
    pub fn validate(&self) -> Result<()> {
        if self.lambdas.is_empty() {
            return Err(ExtractError::CapacityConfig("lambda set is empty".into()));
        }
        for (i, l) in self.lambdas.iter().enumerate() {
            if !l.is_finite() || *l <= 0.0 {
                return Err(ExtractError::CapacityConfig(format!(
                    "lambda {} must be a positive finite number",
                    l
                )));
            }
            if self.lambdas[..i].contains(l) {
                return Err(ExtractError::CapacityConfig(format!(
                    "lambda {} listed twice",
                    l
                )));
            }
        }

        let kinds = self.enabled_kinds();
        if kinds.is_empty() {
            return Err(ExtractError::CapacityConfig("no key kinds enabled".into()));
        }
        for kind in kinds {
            if self.capacity(kind) == 0 {
                return Err(ExtractError::CapacityConfig(format!(
                    "{} keys enabled with zero {:?} capacity",
                    kind,
                    kind.class()
                )));
            }
        }

        if !self.unit_weight.is_finite() || self.unit_weight <= 0.0 {
            return Err(ExtractError::CapacityConfig(format!(
                "unit weight {} must be a positive finite number",
                self.unit_weight
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ExtractorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_lambdas() {
        let cfg = ExtractorConfig { lambdas: vec![], ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ExtractError::CapacityConfig(_))));
    }

    #[test]
    fn test_rejects_bad_lambda_values() {
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = ExtractorConfig { lambdas: vec![1.0, bad], ..Default::default() };
            assert!(cfg.validate().is_err(), "lambda {} accepted", bad);
        }
        let dup = ExtractorConfig { lambdas: vec![1.0, 1.0], ..Default::default() };
        assert!(dup.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_only_matters_when_class_enabled() {
        let cfg = ExtractorConfig { max_sessions: 0, ..Default::default() };
        assert!(cfg.validate().is_err());

        let hosts_only = ExtractorConfig {
            max_sessions: 0,
            enabled: vec![KeyKind::Mac, KeyKind::Host],
            ..Default::default()
        };
        assert!(hosts_only.validate().is_ok());
    }

    #[test]
    fn test_enabled_kinds_follow_vector_order() {
        let cfg = ExtractorConfig {
            enabled: vec![KeyKind::SocketDir, KeyKind::Mac, KeyKind::Mac],
            ..Default::default()
        };
        assert_eq!(cfg.enabled_kinds(), vec![KeyKind::Mac, KeyKind::SocketDir]);
    }

    #[test]
    fn test_capacity_by_class() {
        let cfg = ExtractorConfig { max_hosts: 7, max_sessions: 9, ..Default::default() };
        assert_eq!(cfg.capacity(KeyKind::Mac), 7);
        assert_eq!(cfg.capacity(KeyKind::Host), 7);
        assert_eq!(cfg.capacity(KeyKind::Jitter), 9);
        assert_eq!(cfg.capacity(KeyKind::SocketPair), 9);
        assert_eq!(cfg.capacity(KeyKind::SocketDir), 9);
    }
}
