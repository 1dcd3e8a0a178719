//! Pipeline context
//!
//! Everything a connection task needs, built once at startup and shared
//! read-only through an `Arc`: mode, batch policy, the encoder and scorer
//! (realtime only), the router handle and the process counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logic::config::{Mode, ServerConfig};
use crate::logic::dataset::RouterHandle;
use crate::logic::error::{ArtifactError, ScoringError};
use crate::logic::features::{EncodedBatch, EncodingVocabulary, FeatureEncoder, RawRecord};
use crate::logic::model::{load_scorer, AnomalyScorer, AnomalyVerdict};

/// What happens to a flushed batch
pub enum Stage {
    /// Raw records go straight to the collection store
    Collection,
    /// Encode, score, route verdicts
    Realtime {
        encoder: FeatureEncoder,
        scorer: Arc<dyn AnomalyScorer>,
    },
}

impl Stage {
    /// Load vocabularies and model for realtime mode
    pub fn load(config: &ServerConfig) -> Result<Self, ArtifactError> {
        match config.mode {
            Mode::Collection => Ok(Stage::Collection),
            Mode::Realtime => {
                let src_ip = EncodingVocabulary::load(&config.src_vocab_path())?;
                let dst_ip = EncodingVocabulary::load(&config.dst_vocab_path())?;
                let scorer = load_scorer(&config.model_path())?;
                log::info!("Scorer ready: {}", scorer.name());

                Ok(Stage::Realtime {
                    encoder: FeatureEncoder::new(src_ip, dst_ip),
                    scorer: Arc::from(scorer),
                })
            }
        }
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Process-wide counters, reported at shutdown
#[derive(Debug, Default)]
pub struct PipelineStats {
    connections: AtomicU64,
    records: AtomicU64,
    malformed: AtomicU64,
    undecodable: AtomicU64,
    coercion_dropped: AtomicU64,
    batches_flushed: AtomicU64,
    batches_failed: AtomicU64,
    discarded: AtomicU64,
    anomalies: AtomicU64,
    normal: AtomicU64,
}

/// Point-in-time copy of `PipelineStats`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub records: u64,
    pub malformed: u64,
    pub undecodable: u64,
    pub coercion_dropped: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    /// Records lost in partial batches at connection close
    pub discarded: u64,
    pub anomalies: u64,
    pub normal: u64,
}

impl PipelineStats {
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_undecodable(&self) {
        self.undecodable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            records: self.records.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            undecodable: self.undecodable.load(Ordering::Relaxed),
            coercion_dropped: self.coercion_dropped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            normal: self.normal.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    mode: Mode,
    batch_size: usize,
    flush_on_close: bool,
    idle_timeout: Option<Duration>,
    stage: Stage,
    router: RouterHandle,
    stats: PipelineStats,
}

impl Pipeline {
    /// Build the context for `config`, loading artifacts in realtime mode
    pub fn load(config: &ServerConfig, router: RouterHandle) -> Result<Self, ArtifactError> {
        let stage = Stage::load(config)?;
        Ok(Self::new(config, stage, router))
    }

    pub fn new(config: &ServerConfig, stage: Stage, router: RouterHandle) -> Self {
        Self {
            mode: config.mode,
            batch_size: config.batch_size,
            flush_on_close: config.flush_on_close,
            idle_timeout: (config.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(config.idle_timeout_secs)),
            stage,
            router,
            stats: PipelineStats::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_on_close(&self) -> bool {
        self.flush_on_close
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Route one flushed batch according to the mode. Never fails: a
    /// scoring error abandons the batch and is only logged and counted.
    pub async fn process_batch(&self, batch: Vec<RawRecord>) {
        if batch.is_empty() {
            return;
        }
        self.stats.batches_flushed.fetch_add(1, Ordering::Relaxed);

        match &self.stage {
            Stage::Collection => self.router.collect(batch).await,
            Stage::Realtime { encoder, scorer } => {
                let encoded = encoder.encode_batch(batch);
                self.stats
                    .coercion_dropped
                    .fetch_add(encoded.dropped as u64, Ordering::Relaxed);

                if encoded.is_empty() {
                    log::warn!("No scoreable records left in batch");
                    return;
                }

                // Scoring is CPU-bound and may block on a backend lock
                let task_scorer = Arc::clone(scorer);
                let scored = tokio::task::spawn_blocking(move || score_batch(task_scorer.as_ref(), encoded))
                    .await
                    .unwrap_or_else(|e| Err(ScoringError::Backend(format!("scoring task failed: {}", e))));

                match scored {
                    Ok(verdicts) => {
                        let anomalies = verdicts.iter().filter(|v| v.verdict.is_anomaly()).count();
                        self.stats.anomalies.fetch_add(anomalies as u64, Ordering::Relaxed);
                        self.stats
                            .normal
                            .fetch_add((verdicts.len() - anomalies) as u64, Ordering::Relaxed);
                        self.router.route_verdicts(verdicts).await;
                    }
                    Err(e) => {
                        self.stats.batches_failed.fetch_add(1, Ordering::Relaxed);
                        log::error!("Error during batch processing ({}): {}", scorer.name(), e);
                    }
                }
            }
        }
    }
}

/// Score an encoded batch and pair verdicts with their original records
fn score_batch(
    scorer: &dyn AnomalyScorer,
    encoded: EncodedBatch,
) -> Result<Vec<AnomalyVerdict>, ScoringError> {
    let verdicts = scorer.score(encoded.features.view())?;
    if verdicts.len() != encoded.len() {
        return Err(ScoringError::VerdictCount {
            expected: encoded.len(),
            actual: verdicts.len(),
        });
    }

    Ok(encoded
        .records
        .into_iter()
        .zip(verdicts)
        .map(|(record, verdict)| AnomalyVerdict { record, verdict })
        .collect())
}

/// Scorer doubles shared by the pipeline and server tests
#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use ndarray::ArrayView2;

    use super::Stage;
    use crate::logic::error::ScoringError;
    use crate::logic::features::{EncodingVocabulary, FeatureEncoder, FEATURE_COUNT};
    use crate::logic::model::inference::Verdict;
    use crate::logic::model::AnomalyScorer;

    /// Flags rows whose source IP was not in the vocabulary
    pub struct UnknownSourceScorer {
        pub unknown_index: f32,
    }

    impl AnomalyScorer for UnknownSourceScorer {
        fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
            Ok(features
                .rows()
                .into_iter()
                .map(|row| {
                    if row[2] == self.unknown_index {
                        Verdict::Anomaly
                    } else {
                        Verdict::Normal
                    }
                })
                .collect())
        }

        fn name(&self) -> &str {
            "unknown-source"
        }
    }

    /// Fails every batch, counting calls
    #[derive(Default)]
    pub struct FailingScorer {
        pub calls: AtomicUsize,
    }

    impl AnomalyScorer for FailingScorer {
        fn score(&self, _features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ScoringError::Backend("model exploded".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    /// Panics on every batch
    pub struct PanickingScorer;

    impl AnomalyScorer for PanickingScorer {
        fn score(&self, _features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
            panic!("scorer bug");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    /// Returns one verdict too few
    pub struct ShortScorer;

    impl AnomalyScorer for ShortScorer {
        fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
            assert_eq!(features.ncols(), FEATURE_COUNT);
            Ok(vec![Verdict::Anomaly; features.nrows().saturating_sub(1)])
        }

        fn name(&self) -> &str {
            "short"
        }
    }

    pub fn encoder() -> FeatureEncoder {
        FeatureEncoder::new(
            EncodingVocabulary::fit("src_ip", ["192.168.0.1", "192.168.0.2"]),
            EncodingVocabulary::fit("dst_ip", ["10.0.0.1"]),
        )
    }

    /// Realtime stage flagging unseen source IPs
    pub fn unknown_source_stage() -> Stage {
        let encoder = encoder();
        let unknown_index = encoder.src_vocabulary().unknown_index() as f32;
        Stage::Realtime {
            encoder,
            scorer: Arc::new(UnknownSourceScorer { unknown_index }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use ndarray::ArrayView2;
    use tempfile::tempdir;

    use super::testing::{self, FailingScorer, PanickingScorer, ShortScorer};
    use super::*;
    use crate::constants::{ANOMALY_FILE, COLLECTION_FILE};
    use crate::logic::dataset::{self, Stores};
    use crate::logic::model::inference::Verdict;

    fn config(mode: Mode) -> ServerConfig {
        ServerConfig::new(mode, PathBuf::from("."))
    }

    fn batch(lines: &[&str]) -> Vec<RawRecord> {
        lines.iter().filter_map(|l| RawRecord::parse_line(l)).collect()
    }

    #[tokio::test]
    async fn test_collection_batch_persisted_verbatim() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let pipeline = Pipeline::new(&config(Mode::Collection), Stage::Collection, router);

        pipeline
            .process_batch(batch(&["1200,tcp,a,b,0.1", "60,17,c,d,0.2"]))
            .await;
        drop(pipeline);
        task.finish().await;

        // No coercion in collection mode
        let content = fs::read_to_string(dir.path().join(COLLECTION_FILE)).unwrap();
        assert_eq!(content, "1200,tcp,a,b,0.1\n60,17,c,d,0.2\n");
    }

    #[tokio::test]
    async fn test_unknown_source_routed_with_original_fields() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let pipeline = Pipeline::new(&config(Mode::Realtime), testing::unknown_source_stage(), router);

        pipeline
            .process_batch(batch(&[
                "1200,6,192.168.0.1,10.0.0.1,0.005",
                "1200,6,203.0.113.5,10.0.0.1,0.005",
                "1200,x,203.0.113.9,10.0.0.1,0.005",
            ]))
            .await;

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.anomalies, 1);
        assert_eq!(stats.normal, 1);
        assert_eq!(stats.coercion_dropped, 1);

        drop(pipeline);
        task.finish().await;
        let content = fs::read_to_string(dir.path().join(ANOMALY_FILE)).unwrap();
        assert_eq!(content, "1200,6,203.0.113.5,10.0.0.1,0.005\n");
    }

    #[tokio::test]
    async fn test_scoring_failure_writes_nothing() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), true));
        let scorer = Arc::new(FailingScorer::default());
        let stage = Stage::Realtime {
            encoder: testing::encoder(),
            scorer: scorer.clone(),
        };
        let pipeline = Pipeline::new(&config(Mode::Realtime), stage, router);

        pipeline
            .process_batch(batch(&["1200,6,192.168.0.1,10.0.0.1,0.005"]))
            .await;
        pipeline
            .process_batch(batch(&["1300,6,192.168.0.1,10.0.0.1,0.005"]))
            .await;

        // Second batch still attempted
        assert_eq!(scorer.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(pipeline.stats().snapshot().batches_failed, 2);

        drop(pipeline);
        let summary = task.finish().await;
        assert_eq!(summary.written, 0);
        assert!(!dir.path().join(ANOMALY_FILE).exists());
    }

    #[tokio::test]
    async fn test_verdict_count_mismatch_abandons_batch() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let stage = Stage::Realtime {
            encoder: testing::encoder(),
            scorer: Arc::new(ShortScorer),
        };
        let pipeline = Pipeline::new(&config(Mode::Realtime), stage, router);

        pipeline
            .process_batch(batch(&[
                "1200,6,192.168.0.1,10.0.0.1,0.005",
                "1300,6,192.168.0.1,10.0.0.1,0.005",
            ]))
            .await;

        assert_eq!(pipeline.stats().snapshot().batches_failed, 1);
        drop(pipeline);
        assert_eq!(task.finish().await.anomalies, 0);
        assert!(!dir.path().join(ANOMALY_FILE).exists());
    }

    #[tokio::test]
    async fn test_scorer_panic_abandons_batch_only() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), true));
        let stage = Stage::Realtime {
            encoder: testing::encoder(),
            scorer: Arc::new(PanickingScorer),
        };
        let pipeline = Pipeline::new(&config(Mode::Realtime), stage, router);

        for _ in 0..2 {
            pipeline
                .process_batch(batch(&["1200,6,192.168.0.1,10.0.0.1,0.005"]))
                .await;
        }

        let stats = pipeline.stats().snapshot();
        assert_eq!(stats.batches_flushed, 2);
        assert_eq!(stats.batches_failed, 2);
        drop(pipeline);
        assert_eq!(task.finish().await.written, 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_scoring_leaves_runtime_responsive() {
        struct SlowScorer;

        impl AnomalyScorer for SlowScorer {
            fn score(&self, features: ArrayView2<'_, f32>) -> Result<Vec<Verdict>, ScoringError> {
                std::thread::sleep(Duration::from_millis(300));
                Ok(vec![Verdict::Normal; features.nrows()])
            }

            fn name(&self) -> &str {
                "slow"
            }
        }

        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let stage = Stage::Realtime {
            encoder: testing::encoder(),
            scorer: Arc::new(SlowScorer),
        };
        let pipeline = Arc::new(Pipeline::new(&config(Mode::Realtime), stage, router));

        let scoring = tokio::spawn({
            let pipeline = pipeline.clone();
            async move {
                pipeline
                    .process_batch(batch(&["1200,6,192.168.0.1,10.0.0.1,0.005"]))
                    .await
            }
        });

        // The single runtime thread comes back while the scorer is busy
        tokio::task::yield_now().await;
        assert!(!scoring.is_finished());

        scoring.await.unwrap();
        assert_eq!(pipeline.stats().snapshot().normal, 1);
        drop(pipeline);
        task.finish().await;
    }

    #[tokio::test]
    async fn test_fully_dropped_batch_is_not_scored() {
        let dir = tempdir().unwrap();
        let (router, task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let scorer = Arc::new(FailingScorer::default());
        let stage = Stage::Realtime {
            encoder: testing::encoder(),
            scorer: scorer.clone(),
        };
        let pipeline = Pipeline::new(&config(Mode::Realtime), stage, router);

        pipeline.process_batch(batch(&["big,6,a,b,0.1"])).await;

        assert_eq!(scorer.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(pipeline.stats().snapshot().batches_failed, 0);
        drop(pipeline);
        task.finish().await;
    }

    #[tokio::test]
    async fn test_idle_timeout_zero_disables() {
        let dir = tempdir().unwrap();
        let mut cfg = config(Mode::Collection);
        cfg.idle_timeout_secs = 0;
        let (router, _task) = dataset::spawn(Stores::in_dir(dir.path(), false));
        let pipeline = Pipeline::new(&cfg, Stage::Collection, router);
        assert_eq!(pipeline.idle_timeout(), None);
        assert_eq!(pipeline.batch_size(), 10);
    }

    #[test]
    fn test_missing_artifacts_fail_realtime_load() {
        let dir = tempdir().unwrap();
        let cfg = ServerConfig::new(Mode::Realtime, dir.path().to_path_buf());
        assert!(matches!(Stage::load(&cfg), Err(ArtifactError::NotFound(_))));

        let cfg = ServerConfig::new(Mode::Collection, dir.path().to_path_buf());
        assert!(matches!(Stage::load(&cfg), Ok(Stage::Collection)));
    }
}
