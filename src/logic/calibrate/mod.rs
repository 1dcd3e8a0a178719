//! Calibration - offline fitting of the serving artifacts
//!
//! Reads a collection store, cleans it, mixes in synthetic anomalies and
//! fits the two encoding vocabularies and the isolation forest the
//! realtime listener loads at startup.

pub mod cleaner;


use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::constants::{DST_IP_VOCAB_FILE, MODEL_FILE, SRC_IP_VOCAB_FILE};
use crate::logic::error::CalibrationError;
use crate::logic::features::layout::FEATURE_LAYOUT;
use crate::logic::features::{EncodingVocabulary, FeatureEncoder, FEATURE_COUNT};
use crate::logic::model::inference::write_checksum;
use crate::logic::model::{ForestConfig, IsolationForestArtifact};

pub use cleaner::{CleaningReport, LabeledRecord};

/// Calibration run parameters
#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Expected anomaly fraction, sets the decision threshold
    pub contamination: f64,
    pub trees: usize,
    pub sample_size: usize,
    pub seed: u64,
    /// Synthetic anomalies added, as a fraction of the cleaned rows
    pub synthetic_fraction: f64,
    /// Where to write the cleaned, labelled training set
    pub cleaned_out: Option<PathBuf>,
}

impl CalibrationOptions {
    pub fn new(input: PathBuf, output_dir: PathBuf) -> Self {
        let forest = ForestConfig::default();
        Self {
            input,
            output_dir,
            contamination: 0.04,
            trees: forest.num_trees,
            sample_size: forest.sample_size,
            seed: forest.seed,
            synthetic_fraction: 0.05,
            cleaned_out: None,
        }
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(CalibrationError::InvalidContamination(self.contamination));
        }
        if !(0.0..1.0).contains(&self.synthetic_fraction) {
            return Err(CalibrationError::InvalidSyntheticFraction(self.synthetic_fraction));
        }
        Ok(())
    }
}

/// What a calibration run produced
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub cleaning: CleaningReport,
    pub synthetic: usize,
    pub training_rows: usize,
    pub src_classes: usize,
    pub dst_classes: usize,
    pub threshold: f32,
    pub model_path: PathBuf,
}

pub fn run(options: &CalibrationOptions) -> Result<CalibrationReport, CalibrationError> {
    options.validate()?;
    log::info!("Calibrating from {}", options.input.display());

    let data = fs::read(&options.input).map_err(|source| CalibrationError::Io {
        path: options.input.clone(),
        source,
    })?;
    let text = String::from_utf8_lossy(&data);

    let (cleaned, cleaning) = cleaner::clean(text.lines());
    if cleaned.is_empty() {
        return Err(CalibrationError::EmptyDataset);
    }

    let normalization = cleaner::fit_normalization(&cleaned);

    let mut rng = StdRng::seed_from_u64(options.seed);
    let synthetic_count = (cleaned.len() as f64 * options.synthetic_fraction) as usize;
    let synthetic = cleaner::synthesize_anomalies(synthetic_count, &mut rng);
    let rows = cleaner::combine(cleaned, synthetic, &mut rng);
    log::info!(
        "Training set: {} rows with {} synthetic anomalies",
        rows.len(),
        synthetic_count
    );

    if let Some(path) = &options.cleaned_out {
        write_labeled(path, &rows)?;
        log::info!("Cleaned dataset saved to {}", path.display());
    }

    let src_ip = EncodingVocabulary::fit("src_ip", rows.iter().map(|r| r.packet.src_ip.as_str()));
    let dst_ip = EncodingVocabulary::fit("dst_ip", rows.iter().map(|r| r.packet.dst_ip.as_str()));
    src_ip.save(&options.output_dir.join(SRC_IP_VOCAB_FILE))?;
    dst_ip.save(&options.output_dir.join(DST_IP_VOCAB_FILE))?;
    let (src_classes, dst_classes) = (src_ip.known_len(), dst_ip.known_len());

    let encoder = FeatureEncoder::new(src_ip, dst_ip);
    let mut features = Array2::<f32>::zeros((rows.len(), FEATURE_COUNT));
    for (i, row) in rows.iter().enumerate() {
        let mut encoded = encoder.encode_packet(&row.packet);
        normalization.apply(&mut encoded);
        for (j, value) in encoded.into_iter().enumerate() {
            features[[i, j]] = value;
        }
    }

    let config = ForestConfig {
        num_trees: options.trees,
        sample_size: options.sample_size,
        seed: options.seed,
    };
    let artifact =
        IsolationForestArtifact::train(features.view(), normalization, options.contamination, &config);

    let model_path = options.output_dir.join(MODEL_FILE);
    artifact.save(&model_path)?;
    write_checksum(&model_path)?;
    log::info!(
        "Model saved to {} (threshold {:.4})",
        model_path.display(),
        artifact.threshold
    );

    Ok(CalibrationReport {
        cleaning,
        synthetic: synthetic_count,
        training_rows: rows.len(),
        src_classes,
        dst_classes,
        threshold: artifact.threshold,
        model_path,
    })
}

/// Header row plus one `label` column (0 normal, 1 synthetic anomaly)
fn write_labeled(path: &Path, rows: &[LabeledRecord]) -> Result<(), CalibrationError> {
    let io_error = |source: std::io::Error| CalibrationError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_error)?;
    }

    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    writeln!(out, "{},label", FEATURE_LAYOUT.join(",")).map_err(io_error)?;
    for row in rows {
        writeln!(out, "{},{}", row.packet.to_raw().to_row(), row.label).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}
