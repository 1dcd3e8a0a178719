//! Model Module - batching and scoring
//!
//! Keeps the scorer behind a trait so the detector can be swapped
//! (native isolation forest, ONNX export, test doubles).

pub mod buffer;
pub mod inference;
pub mod isolation_forest;
#[cfg(feature = "onnx")]
pub mod onnx;

// Re-export common types
pub use buffer::BatchAssembler;
pub use inference::{load_scorer, AnomalyScorer, AnomalyVerdict, NormalizationParams};
pub use isolation_forest::{ForestConfig, IsolationForestArtifact};
