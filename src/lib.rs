//! netfeat: streaming per-packet network feature extraction.
//!
//! Each packet becomes one fixed-width vector of damped-window statistics
//! keyed by source MAC, source address, source socket and socket pairs. See
//! [`extractor::FeatureExtractor`] for the pipeline entry point.

pub mod extractor;
pub mod logger;
