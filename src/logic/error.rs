//! Error taxonomy
//!
//! Startup errors (`ArtifactError`, `ConfigError`) are fatal. Everything
//! raised on the serving path is recovered at record, batch or connection
//! granularity and only ever surfaces as a log line.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid process configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown mode '{0}' (expected 'collection' or 'realtime')")]
    UnknownMode(String),

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("max connections must be at least 1")]
    ZeroConnections,

    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    #[error("{var} must be a non-negative integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

/// Failure loading or saving a persisted artifact (vocabulary / model)
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed artifact {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("vocabulary for '{0}' does not end with the 'unknown' sentinel")]
    MissingSentinel(String),

    #[error("vocabulary for '{field}' lists '{value}' more than once")]
    DuplicateClass { field: String, value: String },

    #[error("feature layout mismatch: expected v{expected_version} ({expected_hash:08x}), got v{actual_version} ({actual_hash:08x})")]
    LayoutMismatch {
        expected_version: u8,
        expected_hash: u32,
        actual_version: u8,
        actual_hash: u32,
    },

    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("unsupported model: {0}")]
    Unsupported(String),
}

/// Numeric field that failed coercion
#[derive(Debug, Clone, PartialEq, Error)]
#[error("field '{field}' is not a finite number: '{value}'")]
pub struct CoercionError {
    pub field: &'static str,
    pub value: String,
}

/// Scoring oracle failed for a whole batch
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("expected {expected} features per row, got {actual}")]
    FeatureWidth { expected: usize, actual: usize },

    #[error("scorer returned {actual} verdicts for {expected} rows")]
    VerdictCount { expected: usize, actual: usize },

    #[error("scorer failure: {0}")]
    Backend(String),
}

/// Failed append to a persisted store
#[derive(Debug, Error)]
#[error("append to {path} failed: {source}")]
pub struct StoreError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Offline calibration failure
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable rows left after cleaning")]
    EmptyDataset,

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("synthetic fraction must be in [0, 1), got {0}")]
    InvalidSyntheticFraction(f64),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
