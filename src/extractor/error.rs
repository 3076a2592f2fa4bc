//! Error types for the extraction pipeline.
//!
//! Only [`ExtractError::MalformedRecord`] is expected on the hot path; the
//! driver logs it, bumps the malformed counter and moves on to the next
//! record. Configuration errors are raised by [`FeatureExtractor::new`]
//! before any packet is read.
//!
//! [`FeatureExtractor::new`]: crate::extractor::FeatureExtractor::new

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    /// A record whose timestamp or frame length is not numeric.
    #[error("malformed record: {field} = {value:?}")]
    MalformedRecord { field: &'static str, value: String },

    /// Invalid capacities, lambdas or key selection at construction.
    #[error("invalid configuration: {0}")]
    CapacityConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The capture file is not a readable legacy pcap stream.
    #[error("pcap error: {0}")]
    Pcap(String),
}

impl ExtractError {
    /// Whether the stream can continue past this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExtractError::MalformedRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
