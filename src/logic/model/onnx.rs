//! ONNX scorer - externally trained detectors (`onnx` feature)
//!
//! Expects an exported anomaly detector taking a `[n, 5]` float tensor
//! and returning a per-row label first (`-1` anomaly, `1` normal), as
//! sklearn-onnx exports IsolationForest / OneClassSVM.

use std::path::Path;

use ndarray::ArrayView2;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Value;
use parking_lot::Mutex;

use super::inference::{check_width, AnomalyScorer, Verdict};
use crate::logic::error::{ArtifactError, ScoringError};

pub struct OnnxScorer {
    session: Mutex<Session>,
    label_output: String,
}

impl OnnxScorer {
    pub fn load(model_path: &Path) -> Result<Self, ArtifactError> {
        let unsupported = |stage: &str, e: ort::Error| {
            ArtifactError::Unsupported(format!("{} ({}): {}", model_path.display(), stage, e))
        };

        let session = Session::builder()
            .map_err(|e| unsupported("session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| unsupported("optimization", e))?
            .commit_from_file(model_path)
            .map_err(|e| unsupported("load", e))?;

        let label_output = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| ArtifactError::Unsupported("ONNX model defines no outputs".to_string()))?;

        log::info!("ONNX model loaded, label output '{}'", label_output);

        Ok(Self {
            session: Mutex::new(session),
            label_output,
        })
    }
}

impl AnomalyScorer for OnnxScorer {
    fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
        check_width(&features)?;

        let input_tensor = Value::from_array(features.to_owned())
            .map_err(|e| ScoringError::Backend(format!("Tensor error: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| ScoringError::Backend(format!("Inference failed: {}", e)))?;

        let output = outputs
            .get(&self.label_output)
            .ok_or_else(|| ScoringError::Backend("No label output".to_string()))?;

        let (_, labels) = output
            .try_extract_tensor::<i64>()
            .map_err(|e| ScoringError::Backend(format!("Extract error: {}", e)))?;

        Ok(labels
            .iter()
            .map(|&label| if label == -1 { Verdict::Anomaly } else { Verdict::Normal })
            .collect())
    }

    fn name(&self) -> &str {
        "onnx"
    }
}
