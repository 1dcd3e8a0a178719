//! Inference Engine - Scoring Oracle adapter
//!
//! The core only knows the `AnomalyScorer` capability: one verdict per row
//! of an encoded feature matrix, or an error for the whole batch. Which
//! detector sits behind it is decided by the model artifact.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::isolation_forest::{IsolationForestArtifact, IsolationForestScorer};
use crate::logic::error::{ArtifactError, ScoringError};
use crate::logic::features::{RawRecord, FEATURE_COUNT};

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Binary label for one scored row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Normal,
    Anomaly,
}

impl Verdict {
    pub fn is_anomaly(self) -> bool {
        self == Verdict::Anomaly
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Normal => write!(f, "normal"),
            Verdict::Anomaly => write!(f, "anomaly"),
        }
    }
}

/// A record paired with its label; consumed by the result router
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyVerdict {
    pub record: RawRecord,
    pub verdict: Verdict,
}

/// Min-max normalization parameters from training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationParams {
    pub min_vals: Vec<f32>,
    pub max_vals: Vec<f32>,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            min_vals: vec![0.0; FEATURE_COUNT],
            max_vals: vec![1.0; FEATURE_COUNT],
        }
    }
}

impl NormalizationParams {
    /// Normalize one row in place. Values outside the training range are
    /// not clamped: an out-of-range packet is exactly what should stand out.
    pub fn apply(&self, row: &mut [f32]) {
        for (i, value) in row.iter_mut().enumerate() {
            let min_val = self.min_vals.get(i).copied().unwrap_or(0.0);
            let max_val = self.max_vals.get(i).copied().unwrap_or(1.0);
            let range = (max_val - min_val).max(1e-8);
            *value = (*value - min_val) / range;
        }
    }
}

// ============================================================================
// SCORER TRAIT
// ============================================================================

/// Scoring oracle over encoded feature vectors
pub trait AnomalyScorer: Send + Sync {
    /// One verdict per row, or an error for the whole batch
    fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError>;

    /// Scorer name for diagnostics
    fn name(&self) -> &str;
}

/// Reject matrices of the wrong width before they reach a backend
pub fn check_width(features: &ArrayView2<'_, f32>) -> Result<(), ScoringError> {
    if features.ncols() != FEATURE_COUNT {
        return Err(ScoringError::FeatureWidth {
            expected: FEATURE_COUNT,
            actual: features.ncols(),
        });
    }
    Ok(())
}

// ============================================================================
// ARTIFACT LOADING
// ============================================================================

/// Load the scorer named by `path`. `.onnx` files need the `onnx` feature;
/// anything else is read as a JSON model artifact.
pub fn load_scorer(path: &Path) -> Result<Box<dyn AnomalyScorer>, ArtifactError> {
    log::info!("Loading anomaly model from: {}", path.display());

    if !path.exists() {
        return Err(ArtifactError::NotFound(path.to_path_buf()));
    }
    verify_checksum(path)?;

    let is_onnx = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("onnx"));

    if is_onnx {
        return load_onnx(path);
    }

    let artifact = IsolationForestArtifact::load(path)?;
    Ok(Box::new(IsolationForestScorer::new(artifact)))
}

#[cfg(feature = "onnx")]
fn load_onnx(path: &Path) -> Result<Box<dyn AnomalyScorer>, ArtifactError> {
    Ok(Box::new(super::onnx::OnnxScorer::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn load_onnx(path: &Path) -> Result<Box<dyn AnomalyScorer>, ArtifactError> {
    Err(ArtifactError::Unsupported(format!(
        "{} is an ONNX model but this build lacks the 'onnx' feature",
        path.display()
    )))
}

// ============================================================================
// CHECKSUM
// ============================================================================

/// Sidecar path holding the expected SHA-256 of an artifact
pub fn checksum_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".sha256");
    PathBuf::from(name)
}

/// SHA-256 of a file as lowercase hex
pub fn file_sha256(path: &Path) -> Result<String, ArtifactError> {
    let data = fs::read(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(hex::encode(Sha256::digest(&data)))
}

/// Write the checksum sidecar for an artifact
pub fn write_checksum(path: &Path) -> Result<(), ArtifactError> {
    let digest = file_sha256(path)?;
    let sidecar = checksum_path(path);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    fs::write(&sidecar, format!("{}  {}\n", digest, file_name)).map_err(|source| {
        ArtifactError::Io {
            path: sidecar.clone(),
            source,
        }
    })
}

/// Verify the artifact against its sidecar, when one exists
pub fn verify_checksum(path: &Path) -> Result<(), ArtifactError> {
    let sidecar = checksum_path(path);
    if !sidecar.exists() {
        log::debug!("No checksum sidecar for {}", path.display());
        return Ok(());
    }

    let content = fs::read_to_string(&sidecar).map_err(|source| ArtifactError::Io {
        path: sidecar.clone(),
        source,
    })?;
    let expected = content
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let actual = file_sha256(path)?;

    if expected != actual {
        return Err(ArtifactError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }

    log::info!("Model checksum verified ({})", &actual[..12]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_normalization_identity_by_default() {
        let params = NormalizationParams::default();
        let mut row: [f32; 5] = [1200.0, 6.0, 3.0, 1.0, 0.005];
        params.apply(&mut row);
        assert_eq!(row, [1200.0, 6.0, 3.0, 1.0, 0.005]);
    }

    #[test]
    fn test_normalization_does_not_clamp() {
        let params = NormalizationParams {
            min_vals: vec![0.0, 0.0, 0.0, 0.0, 0.0],
            max_vals: vec![1000.0, 1.0, 1.0, 1.0, 1.0],
        };
        let mut row: [f32; 5] = [2000.0, 6.0, 0.0, 0.0, 0.5];
        params.apply(&mut row);
        assert_eq!(row[0], 2.0);
    }

    #[test]
    fn test_check_width() {
        let good = Array2::<f32>::zeros((2, FEATURE_COUNT));
        assert!(check_width(&good.view()).is_ok());

        let bad = Array2::<f32>::zeros((2, 3));
        assert!(matches!(
            check_width(&bad.view()),
            Err(ScoringError::FeatureWidth { expected: FEATURE_COUNT, actual: 3 })
        ));
    }

    #[test]
    fn test_checksum_roundtrip_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        fs::write(&path, b"{}").unwrap();

        // No sidecar: accepted
        assert!(verify_checksum(&path).is_ok());

        write_checksum(&path).unwrap();
        assert!(verify_checksum(&path).is_ok());

        fs::write(&path, b"{ }").unwrap();
        assert!(matches!(
            verify_checksum(&path),
            Err(ArtifactError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_load_scorer_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_scorer(&dir.path().join("missing.json")),
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[cfg(not(feature = "onnx"))]
    #[test]
    fn test_onnx_requires_feature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.onnx");
        fs::write(&path, b"not really onnx").unwrap();
        assert!(matches!(load_scorer(&path), Err(ArtifactError::Unsupported(_))));
    }
}
