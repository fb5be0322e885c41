//! Batch pipeline
//!
//! # Architecture
//! - **Producer**: a blocking task visits the [`StructureSource`] and feeds a
//!   bounded channel with staged entries
//! - **Workers**: at most `workers` per-model tasks run concurrently; DSSP
//!   runs on the blocking pool, PAE fetches are async
//! - **Aggregator**: the only owner of the result map; workers send
//!   `(model_id, result)` messages to it
//! - **Barrier**: grouping starts once every worker has reported
//! - **Fusion**: fragmented accessions are fused in parallel (rayon)
//!
//! # Error Handling
//! - Entry, model and accession failures are isolated and recorded in the
//!   [`BatchSummary`]; the batch continues
//! - Cancellation aborts the batch; nothing is cached
//! - A batch with entry or model failures is not cached, so the next run
//!   retries those models

use crate::config::IngestConfig;
use crate::fusion::{partition_results, FragmentFuser, FusionParams};
use crate::models::{BatchSummary, FailureRecord, FailureStage, ModelResult};
use crate::services::{
    AlphaFoldPaeClient, BatchOutput, CacheError, CacheKey, ConfidenceError, ConfidenceResolver, ConfidenceService,
    DsspError, ExclusionMaskBuilder, FileResultCache, MaskError, MkdsspOracle, ResolveError, ResultCache,
    SecondaryStructureClassifier, SourceError, StructureEntry, StructureSource, TarArchiveSource,
};
use crate::utils::RetryError;
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure of one model; the model is excluded from output
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Dssp(#[from] RetryError<DsspError>),

    #[error(transparent)]
    Confidence(#[from] ResolveError),

    #[error(transparent)]
    Mask(#[from] MaskError),

    #[error("Worker task failed: {0}")]
    Task(String),
}

/// Batch-level failure
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Batch cancelled")]
    Cancelled,

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Client(#[from] ConfidenceError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Pipeline task failed: {0}")]
    Task(String),
}

/// Final mapping plus run summary
#[derive(Debug)]
pub struct BatchReport {
    pub output: BatchOutput,
    pub summary: BatchSummary,
}

/// Pipeline knobs that do not belong to a single component
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub progress_interval: usize,
    /// False keys output by model id and skips grouping
    pub fuse: bool,
    pub fusion: FusionParams,
    pub parameter_digest: String,
}

impl PipelineOptions {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            progress_interval: config.progress_interval.max(1),
            fuse: config.fuse,
            fusion: config.fusion,
            parameter_digest: config.parameter_digest(),
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            progress_interval: 100,
            fuse: true,
            fusion: FusionParams::default(),
            parameter_digest: String::new(),
        }
    }
}

/// Per-model work: DSSP, confidence gate, mask
#[derive(Clone)]
pub struct ModelProcessor {
    classifier: SecondaryStructureClassifier,
    resolver: ConfidenceResolver,
    mask_builder: Arc<ExclusionMaskBuilder>,
}

impl ModelProcessor {
    pub fn new(
        classifier: SecondaryStructureClassifier,
        resolver: ConfidenceResolver,
        mask_builder: ExclusionMaskBuilder,
    ) -> Self {
        Self {
            classifier,
            resolver,
            mask_builder: Arc::new(mask_builder),
        }
    }

    /// Process one staged structure
    ///
    /// The staged file is removed when `entry` is dropped on return.
    pub async fn process(&self, entry: StructureEntry) -> Result<ModelResult, ModelError> {
        let identifier = entry.identifier.clone();

        let classifier = self.classifier.clone();
        let (entry, codes) = tokio::task::spawn_blocking(move || {
            let codes = classifier.classify(entry.path(), &entry.identifier);
            (entry, codes)
        })
        .await
        .map_err(|e| ModelError::Task(e.to_string()))?;
        let codes = codes?;

        let confidence = self
            .resolver
            .resolve(&identifier, entry.confidence.as_deref(), codes.len())
            .await?;

        let track = self.mask_builder.build(&identifier, &codes, &confidence.mask)?;

        debug!(
            identifier = %identifier,
            residues = track.len(),
            excluded = track.excluded_count(),
            confidence = ?confidence.origin,
            "Model processed"
        );

        Ok(ModelResult::new(identifier, track))
    }
}

/// Messages from producer and workers to the aggregator
enum WorkerMessage {
    Model {
        model_id: String,
        result: Result<ModelResult, ModelError>,
    },
    Source(SourceError),
}

/// What the aggregator collected
#[derive(Default)]
struct Aggregate {
    results: HashMap<String, ModelResult>,
    failures: Vec<FailureRecord>,
    processed: usize,
}

struct BatchCache {
    store: Arc<dyn ResultCache>,
    key: CacheKey,
}

/// Drives one batch from archives to the final accession mapping
pub struct BatchPipeline {
    source: Arc<dyn StructureSource>,
    processor: ModelProcessor,
    fuser: FragmentFuser,
    options: PipelineOptions,
    cache: Option<BatchCache>,
}

impl BatchPipeline {
    pub fn new(source: Arc<dyn StructureSource>, processor: ModelProcessor, options: PipelineOptions) -> Self {
        Self {
            source,
            processor,
            fuser: FragmentFuser::new(options.fusion),
            options,
            cache: None,
        }
    }

    /// Reuse and store results under `key`
    pub fn with_cache(mut self, store: Arc<dyn ResultCache>, key: CacheKey) -> Self {
        self.cache = Some(BatchCache { store, key });
        self
    }

    /// Production wiring: tar archives, `mkdssp`, AlphaFold DB PAE, file cache
    pub fn from_config(config: &IngestConfig, inputs: &[PathBuf]) -> Result<Self, PipelineError> {
        let source = TarArchiveSource::new(inputs)?;

        let oracle = MkdsspOracle::new(config.dssp_executable.clone(), config.dssp_cli);
        let classifier = SecondaryStructureClassifier::new(Arc::new(oracle), config.dssp_retry);

        let client: Arc<dyn ConfidenceService> =
            Arc::new(AlphaFoldPaeClient::new(config.pae_base_url.clone(), config.request_timeout)?);
        let resolver = ConfidenceResolver::new(Some(client), config.thresholds, config.confidence_retry)
            .with_force_remote(config.force_remote_confidence);

        let mask_builder = ExclusionMaskBuilder::new(config.forbidden.clone(), config.mask_policy);

        let cache = match &config.cache_dir {
            Some(dir) => Some((
                Arc::new(FileResultCache::new(dir.clone())) as Arc<dyn ResultCache>,
                CacheKey::compute(&config.parameter_fingerprint(), source.archives())?,
            )),
            None => None,
        };

        let pipeline = Self::new(
            Arc::new(source),
            ModelProcessor::new(classifier, resolver, mask_builder),
            PipelineOptions::from_config(config),
        );

        Ok(match cache {
            Some((store, key)) => pipeline.with_cache(store, key),
            None => pipeline,
        })
    }

    /// Run the batch to completion or cancellation
    pub async fn run(&self, cancel: CancellationToken) -> Result<BatchReport, PipelineError> {
        let mut summary = BatchSummary::new(self.options.parameter_digest.clone());

        if let Some(output) = self.load_cached() {
            summary.from_cache = true;
            summary.longest_sequence = output.values().map(|t| t.len()).max().unwrap_or(0);
            summary.finish();
            info!(
                run_id = %summary.run_id,
                entries = output.len(),
                "Loaded batch results from cache"
            );
            return Ok(BatchReport { output, summary });
        }

        let total = match self.source.count() {
            Ok(total) => Some(total),
            Err(e) => {
                warn!(error = %e, "Could not count structures, progress totals unavailable");
                None
            }
        };
        info!(
            run_id = %summary.run_id,
            total = ?total,
            workers = self.options.workers,
            "Starting batch"
        );

        let aggregate = self.process_models(total, &cancel).await?;
        if cancel.is_cancelled() {
            info!(processed = aggregate.processed, "Batch cancelled");
            return Err(PipelineError::Cancelled);
        }

        summary.models_processed = aggregate.processed;
        for failure in aggregate.failures {
            summary.record_failure(failure);
        }

        let output = self.assemble(aggregate.results, &mut summary).await?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let incomplete = summary.count_by_stage(FailureStage::Model) + summary.count_by_stage(FailureStage::Source);
        if incomplete == 0 {
            self.store_cached(&output);
        } else if self.cache.is_some() {
            info!(failures = incomplete, "Batch has model failures, results not cached");
        }
        summary.finish();

        info!(
            run_id = %summary.run_id,
            models = summary.models_processed,
            unfragmented = summary.accessions_unfragmented,
            fused = summary.accessions_fused,
            failures = summary.failures.len(),
            "Batch complete"
        );

        Ok(BatchReport { output, summary })
    }

    fn load_cached(&self) -> Option<BatchOutput> {
        let cache = self.cache.as_ref()?;
        match cache.store.load(&cache.key) {
            Ok(hit) => hit,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    fn store_cached(&self, output: &BatchOutput) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store.store(&cache.key, output) {
                warn!(error = %e, "Failed to store batch results in cache");
            }
        }
    }

    /// Producer → bounded worker pool → aggregator; returns after the barrier
    async fn process_models(&self, total: Option<usize>, cancel: &CancellationToken) -> Result<Aggregate, PipelineError> {
        let capacity = self.options.workers * 2;
        let (entry_tx, mut entry_rx) = mpsc::channel::<Result<StructureEntry, SourceError>>(capacity);
        let (result_tx, result_rx) = mpsc::channel::<WorkerMessage>(capacity);

        let source = Arc::clone(&self.source);
        let producer_cancel = cancel.clone();
        let producer = tokio::task::spawn_blocking(move || {
            source.visit(&mut |item| {
                if producer_cancel.is_cancelled() || entry_tx.blocking_send(item).is_err() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
        });

        let aggregator = tokio::spawn(aggregate(result_rx, total, self.options.progress_interval));

        let semaphore = Arc::new(Semaphore::new(self.options.workers));
        let mut tasks = JoinSet::new();
        let mut task_models: HashMap<tokio::task::Id, String> = HashMap::new();

        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = entry_rx.recv() => item,
            };
            let Some(item) = item else { break };

            let entry = match item {
                Ok(entry) => entry,
                Err(e) => {
                    let _ = result_tx.send(WorkerMessage::Source(e)).await;
                    continue;
                }
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    permit.map_err(|e| PipelineError::Task(e.to_string()))?
                }
            };

            let processor = self.processor.clone();
            let tx = result_tx.clone();
            let model_id = entry.identifier.clone();
            let handle = tasks.spawn(async move {
                let _permit = permit;
                let model_id = entry.identifier.clone();
                let result = processor.process(entry).await;
                let _ = tx.send(WorkerMessage::Model { model_id, result }).await;
            });
            task_models.insert(handle.id(), model_id);
        }

        // Unblock the producer if the loop ended early
        drop(entry_rx);

        if cancel.is_cancelled() {
            tasks.abort_all();
        }
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, ())) => {
                    task_models.remove(&id);
                }
                Err(e) if e.is_cancelled() => {}
                Err(e) => {
                    let Some(model_id) = task_models.remove(&e.id()) else {
                        error!(error = %e, "Worker task panicked");
                        continue;
                    };
                    error!(identifier = %model_id, error = %e, "Worker task panicked");
                    let result = Err(ModelError::Task("worker panicked".to_string()));
                    let _ = result_tx.send(WorkerMessage::Model { model_id, result }).await;
                }
            }
        }
        drop(result_tx);

        producer.await.map_err(|e| PipelineError::Task(e.to_string()))?;
        aggregator.await.map_err(|e| PipelineError::Task(e.to_string()))
    }

    /// Grouping barrier and fusion
    async fn assemble(
        &self,
        results: HashMap<String, ModelResult>,
        summary: &mut BatchSummary,
    ) -> Result<BatchOutput, PipelineError> {
        if !self.options.fuse {
            let output: BatchOutput = results.into_iter().map(|(id, model)| (id, model.track)).collect();
            summary.longest_sequence = output.values().map(|t| t.len()).max().unwrap_or(0);
            return Ok(output);
        }

        let partitioned = partition_results(results);
        for (model_id, e) in partitioned.invalid {
            summary.record_failure(FailureRecord::model(model_id, e));
        }

        let mut output = BatchOutput::new();
        summary.accessions_unfragmented = partitioned.unfragmented.len();
        for result in partitioned.unfragmented {
            output.insert(result.accession, result.track);
        }

        let longest_unfragmented = output.values().map(|t| t.len()).max().unwrap_or(0);

        let fuser = self.fuser;
        let groups = partitioned.groups;
        let fused = tokio::task::spawn_blocking(move || fuser.fuse_all(&groups))
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?;

        for (accession, result) in fused {
            match result {
                Ok(fused) => {
                    summary.accessions_fused += 1;
                    output.insert(accession, fused.track);
                }
                Err(e) => summary.record_failure(FailureRecord::accession(accession, e)),
            }
        }

        summary.longest_sequence = output.values().map(|t| t.len()).max().unwrap_or(0);
        if summary.accessions_fused == 0 {
            info!("Models were not fragmented; longest model was {}", longest_unfragmented);
        } else {
            info!(
                fused = summary.accessions_fused,
                longest = summary.longest_sequence,
                "Fragments fused"
            );
        }

        Ok(output)
    }
}

/// Single owner of the per-model results
async fn aggregate(mut rx: mpsc::Receiver<WorkerMessage>, total: Option<usize>, progress_interval: usize) -> Aggregate {
    let mut aggregate = Aggregate::default();

    while let Some(message) = rx.recv().await {
        match message {
            WorkerMessage::Source(e) => {
                warn!(identifier = %e.identifier(), error = %e, "Structure entry skipped");
                aggregate.failures.push(FailureRecord::source(e.identifier(), &e));
                continue;
            }
            WorkerMessage::Model { model_id, result } => {
                aggregate.processed += 1;
                match result {
                    Ok(model) => {
                        if aggregate.results.contains_key(&model_id) {
                            warn!(identifier = %model_id, "Duplicate model id, keeping first result");
                            aggregate
                                .failures
                                .push(FailureRecord::model(model_id, "duplicate model id in batch"));
                        } else {
                            aggregate.results.insert(model_id, model);
                        }
                    }
                    Err(e) => {
                        warn!(identifier = %model_id, error = %e, "Model failed");
                        aggregate.failures.push(FailureRecord::model(model_id, &e));
                    }
                }
            }
        }

        if aggregate.processed % progress_interval == 0 {
            info!(
                processed = aggregate.processed,
                total = ?total,
                failed = aggregate.failures.len(),
                "Progress"
            );
        }
    }

    aggregate
}
