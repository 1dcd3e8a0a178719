//! Isolation Forest - default scoring backend
//!
//! Anomalies are easier to isolate and thus have shorter average path
//! lengths across random trees. The artifact bundles the forest with the
//! normalization parameters and the decision threshold picked at
//! calibration time from the expected contamination.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::{ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::inference::{check_width, AnomalyScorer, NormalizationParams, Verdict};
use crate::logic::error::{ArtifactError, ScoringError};
use crate::logic::features::layout::{layout_hash, validate_layout, FEATURE_VERSION};

/// Artifact kind tag
pub const MODEL_KIND: &str = "isolation_forest";

/// Euler–Mascheroni constant for the harmonic number approximation
const EULER_GAMMA: f32 = 0.577_215_7;

/// Forest fitting parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            sample_size: 256,
            seed: 42,
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Effective subsample size each tree was grown from
    sample_size: usize,
}

impl IsolationForest {
    /// Grow a forest over the rows of `data`
    pub fn fit(data: ArrayView2<'_, f32>, config: &ForestConfig) -> Self {
        let n_rows = data.nrows();
        let sample_size = config.sample_size.min(n_rows).max(1);
        let max_depth = (sample_size as f32).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(config.seed);

        let trees = if n_rows == 0 {
            Vec::new()
        } else {
            (0..config.num_trees)
                .map(|_| {
                    let sample = rand::seq::index::sample(&mut rng, n_rows, sample_size).into_vec();
                    IsolationTree::build(&data, sample, max_depth, &mut rng)
                })
                .collect()
        };

        Self { trees, sample_size }
    }

    /// c(n): average path length of an unsuccessful BST search
    pub fn average_path_length(n: usize) -> f32 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f32;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn score_sample(&self, sample: &[f32]) -> f32 {
        let normalizer = Self::average_path_length(self.sample_size);
        if self.trees.is_empty() || normalizer == 0.0 {
            return 0.5;
        }

        let total: f32 = self.trees.iter().map(|tree| tree.path_length(sample)).sum();
        let avg_path = total / self.trees.len() as f32;

        2.0_f32.powf(-avg_path / normalizer)
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

/// A single isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsolationTree {
    root: IsolationNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f32,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationTree {
    fn build<R: Rng>(data: &ArrayView2<'_, f32>, rows: Vec<usize>, max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::build_node(data, rows, 0, max_depth, rng),
        }
    }

    fn build_node<R: Rng>(
        data: &ArrayView2<'_, f32>,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> IsolationNode {
        if depth >= max_depth || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        // Only features that still vary in this node can split it
        let candidates: Vec<(usize, f32, f32)> = (0..data.ncols())
            .filter_map(|feature| {
                let column = rows.iter().map(|&r| data[[r, feature]]);
                let (min_val, max_val) = column.fold((f32::MAX, f32::MIN), |(lo, hi), v| {
                    (lo.min(v), hi.max(v))
                });
                (max_val > min_val).then_some((feature, min_val, max_val))
            })
            .collect();

        if candidates.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let (feature, min_val, max_val) = candidates[rng.gen_range(0..candidates.len())];
        let split = rng.gen_range(min_val..max_val);

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| data[[r, feature]] < split);

        IsolationNode::Internal {
            feature,
            split,
            left: Box::new(Self::build_node(data, left_rows, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(data, right_rows, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &[f32]) -> f32 {
        let mut node = &self.root;
        let mut depth = 0.0f32;

        loop {
            match node {
                IsolationNode::Leaf { size } => {
                    return depth + IsolationForest::average_path_length(*size);
                }
                IsolationNode::Internal { feature, split, left, right } => {
                    let value = sample.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *split { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

// ============================================================================
// ARTIFACT
// ============================================================================

/// Serialized model: forest + normalization + threshold, tied to a layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForestArtifact {
    pub kind: String,
    pub feature_version: u8,
    pub layout_hash: u32,
    pub trained_at: DateTime<Utc>,
    pub training_rows: usize,
    pub contamination: f64,
    /// Rows scoring strictly above this are anomalies
    pub threshold: f32,
    pub normalization: NormalizationParams,
    pub forest: IsolationForest,
}

impl IsolationForestArtifact {
    /// Fit forest and threshold over already normalized rows
    pub fn train(
        normalized: ArrayView2<'_, f32>,
        normalization: NormalizationParams,
        contamination: f64,
        config: &ForestConfig,
    ) -> Self {
        let forest = IsolationForest::fit(normalized, config);

        let scores: Vec<f32> = normalized
            .axis_iter(Axis(0))
            .map(|row| forest.score_sample(&row.to_vec()))
            .collect();
        let threshold = percentile(&scores, 1.0 - contamination);

        Self {
            kind: MODEL_KIND.to_string(),
            feature_version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            trained_at: Utc::now(),
            training_rows: normalized.nrows(),
            contamination,
            threshold,
            normalization,
            forest,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ArtifactError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_vec(self).map_err(|source| ArtifactError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let data = fs::read(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: Self =
            serde_json::from_slice(&data).map_err(|source| ArtifactError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        if artifact.kind != MODEL_KIND {
            return Err(ArtifactError::Unsupported(format!("model kind '{}'", artifact.kind)));
        }
        validate_layout(artifact.feature_version, artifact.layout_hash)?;

        log::info!(
            "Isolation forest loaded: {} trees, threshold {:.4}, trained {} on {} rows",
            artifact.forest.num_trees(),
            artifact.threshold,
            artifact.trained_at.format("%Y-%m-%d %H:%M:%S"),
            artifact.training_rows
        );
        Ok(artifact)
    }
}

/// Linear-interpolated quantile of `values` (`q` in [0, 1])
fn percentile(values: &[f32], q: f64) -> f32 {
    if values.is_empty() {
        return 0.5;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = (pos - lower as f64) as f32;

    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

// ============================================================================
// SCORER
// ============================================================================

pub struct IsolationForestScorer {
    artifact: IsolationForestArtifact,
}

impl IsolationForestScorer {
    pub fn new(artifact: IsolationForestArtifact) -> Self {
        Self { artifact }
    }

    /// Raw anomaly score of one encoded row
    pub fn anomaly_score(&self, row: &[f32]) -> f32 {
        let mut normalized = row.to_vec();
        self.artifact.normalization.apply(&mut normalized);
        self.artifact.forest.score_sample(&normalized)
    }
}

impl AnomalyScorer for IsolationForestScorer {
    fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
        check_width(&features)?;

        Ok(features
            .axis_iter(Axis(0))
            .map(|row| {
                let score = self.anomaly_score(&row.to_vec());
                if score > self.artifact.threshold {
                    Verdict::Anomaly
                } else {
                    Verdict::Normal
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        MODEL_KIND
    }
}
