//! End-to-end batch runs over generated archives with in-memory DSSP and PAE

mod helpers;

use adssp_ingest::fusion::FusionParams;
use adssp_ingest::models::FailureStage;
use adssp_ingest::services::{
    CacheKey, ConfidenceResolver, ConfidenceThresholds, ExclusionMaskBuilder, FileResultCache, ForbiddenSet,
    MaskPolicy, ResultCache, SecondaryStructureClassifier, TarArchiveSource,
};
use adssp_ingest::utils::RetryPolicy;
use adssp_ingest::workflow::{write_report, BatchPipeline, ModelProcessor, PipelineOptions};
use adssp_ingest::services::ConfidenceService;
use helpers::{ArchiveBuilder, CodesFromFileOracle, NoPaeService, UnavailablePaeService};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn processor() -> ModelProcessor {
    processor_with(Arc::new(NoPaeService))
}

fn processor_with(service: Arc<dyn ConfidenceService>) -> ModelProcessor {
    ModelProcessor::new(
        SecondaryStructureClassifier::new(Arc::new(CodesFromFileOracle), RetryPolicy::none()),
        ConfidenceResolver::new(Some(service), ConfidenceThresholds::default(), RetryPolicy::none()),
        ExclusionMaskBuilder::new(ForbiddenSet::default(), MaskPolicy::Strict),
    )
}

fn options() -> PipelineOptions {
    PipelineOptions {
        workers: 3,
        progress_interval: 2,
        fuse: true,
        fusion: FusionParams::new(200, 0.5).unwrap(),
        parameter_digest: "e2e".to_string(),
    }
}

fn pipeline(shard: &Path) -> BatchPipeline {
    let source = TarArchiveSource::new(&[shard.to_path_buf()]).unwrap();
    BatchPipeline::new(Arc::new(source), processor(), options())
}

/// Three fragments of Q1 (400, 400 and 220 residues, stride 200) plus
/// single-model P1 and a model that fails on a residue count mismatch
fn write_shard(dir: &Path) -> PathBuf {
    let shard = dir.join("proteome-0_v4.tar");
    let mut builder = ArchiveBuilder::new();
    builder
        .add_model("AF-Q1-F1-model_v4", &"H".repeat(400), Some(&[90.0; 400]))
        .add_model("AF-Q1-F2-model_v4", &"E".repeat(400), Some(&[90.0; 400]))
        .add_model("AF-Q1-F3-model_v4", &"T".repeat(220), Some(&[90.0; 220]))
        .add_model("AF-P1-F1-model_v4", "HHS-E", Some(&[95.0, 40.0, 95.0, 95.0, 95.0]))
        .add_model("AF-P2-F1-model_v4", "HHH", Some(&[95.0, 95.0]));
    builder.write_tar(&shard);
    shard
}

#[tokio::test]
async fn test_three_fragment_accession_fused_to_620() {
    // Given: a shard with a three-fragment accession
    let dir = TempDir::new().unwrap();
    let shard = write_shard(dir.path());

    // When: the batch runs
    let report = pipeline(&shard).run(CancellationToken::new()).await.unwrap();

    // Then: F1 keeps [0,300), F2 [300,500), F3 [500,620)
    let q1 = &report.output["Q1"];
    assert_eq!(q1.len(), 620);
    let expected = format!("{}{}{}", "H".repeat(300), "E".repeat(200), "T".repeat(120));
    assert_eq!(q1.structure_codes(), expected);
    assert!(q1.exclusion_mask().iter().all(|&excluded| excluded));
    assert_eq!(report.summary.longest_sequence, 620);
}

#[tokio::test]
async fn test_unfragmented_and_failed_models() {
    let dir = TempDir::new().unwrap();
    let shard = write_shard(dir.path());

    let report = pipeline(&shard).run(CancellationToken::new()).await.unwrap();

    let p1 = &report.output["P1"];
    assert_eq!(p1.structure_codes(), "HHS-E");
    assert_eq!(p1.exclusion_mask(), &[true, false, false, false, true]);

    assert!(!report.output.contains_key("P2"));
    assert_eq!(report.summary.models_processed, 5);
    assert_eq!(report.summary.accessions_unfragmented, 1);
    assert_eq!(report.summary.accessions_fused, 1);
    assert_eq!(report.summary.count_by_stage(FailureStage::Model), 1);
    assert_eq!(report.summary.failures[0].identifier, "AF-P2-F1-model_v4");
}

#[tokio::test]
async fn test_invalid_fragment_excludes_accession_only() {
    let dir = TempDir::new().unwrap();
    let shard = dir.path().join("shard.tar");
    let mut builder = ArchiveBuilder::new();
    builder
        .add_model("AF-R1-F1-model_v4", &"H".repeat(150), None)
        .add_model("AF-R1-F2-model_v4", &"H".repeat(150), None)
        .add_model("AF-R2-F1-model_v4", "EE", None);
    builder.write_tar(&shard);

    let report = pipeline(&shard).run(CancellationToken::new()).await.unwrap();

    // trim 100 on a 150-residue fragment cannot keep both edges
    assert!(!report.output.contains_key("R1"));
    assert!(report.output.contains_key("R2"));
    assert_eq!(report.summary.count_by_stage(FailureStage::Accession), 1);
}

/// Shard where every model succeeds
fn write_clean_shard(dir: &Path) -> PathBuf {
    let shard = dir.join("clean.tar");
    let mut builder = ArchiveBuilder::new();
    builder
        .add_model("AF-P1-F1-model_v4", "HHS-E", Some(&[95.0, 40.0, 95.0, 95.0, 95.0]))
        .add_model("AF-Q1-F1-model_v4", "EEE", Some(&[90.0; 3]));
    builder.write_tar(&shard);
    shard
}

#[tokio::test]
async fn test_second_run_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let shard = write_clean_shard(dir.path());
    let cache: Arc<dyn ResultCache> = Arc::new(FileResultCache::new(dir.path().join("cache")));
    let key = CacheKey::compute("e2e", &[shard.clone()]).unwrap();

    let first = pipeline(&shard)
        .with_cache(Arc::clone(&cache), key.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(!first.summary.from_cache);

    let second = pipeline(&shard)
        .with_cache(cache, key)
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert!(second.summary.from_cache);
    assert_eq!(second.output, first.output);
}

#[tokio::test]
async fn test_cancelled_batch_writes_nothing_to_cache() {
    let dir = TempDir::new().unwrap();
    let shard = write_shard(dir.path());
    let cache = Arc::new(FileResultCache::new(dir.path().join("cache")));
    let key = CacheKey::compute("e2e", &[shard.clone()]).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = pipeline(&shard)
        .with_cache(cache.clone(), key.clone())
        .run(cancel)
        .await;

    assert!(result.is_err());
    assert!(cache.load(&key).unwrap().is_none());
}

#[tokio::test]
async fn test_report_written_as_json() {
    let dir = TempDir::new().unwrap();
    let shard = write_shard(dir.path());
    let report = pipeline(&shard).run(CancellationToken::new()).await.unwrap();

    let output_path = dir.path().join("out").join("masks.json");
    let summary_path = write_report(&report, &output_path).unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output_path).unwrap()).unwrap();
    assert_eq!(written["P1"]["structure_codes"], "HHS-E");
    assert_eq!(written["Q1"]["exclusion_mask"].as_array().unwrap().len(), 620);

    let summary: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(summary["parameter_digest"], "e2e");
    assert_eq!(summary["failures"][0]["stage"], "MODEL");
}

#[tokio::test]
async fn test_model_failures_leave_batch_uncached() {
    // Given: P1 carries pLDDT scores, Q1 depends on the PAE service
    let dir = TempDir::new().unwrap();
    let shard = dir.path().join("partial.tar");
    let mut builder = ArchiveBuilder::new();
    builder
        .add_model("AF-P1-F1-model_v4", "HHS-E", Some(&[95.0, 40.0, 95.0, 95.0, 95.0]))
        .add_model("AF-Q1-F1-model_v4", "EEE", None);
    builder.write_tar(&shard);
    let cache: Arc<dyn ResultCache> = Arc::new(FileResultCache::new(dir.path().join("cache")));
    let key = CacheKey::compute("e2e", &[shard.clone()]).unwrap();
    let source = || Arc::new(TarArchiveSource::new(&[shard.clone()]).unwrap());

    // When: the first run hits an unavailable PAE service
    let first = BatchPipeline::new(source(), processor_with(Arc::new(UnavailablePaeService)), options())
        .with_cache(Arc::clone(&cache), key.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: Q1 fails and nothing is cached
    assert!(!first.output.contains_key("Q1"));
    assert_eq!(first.summary.count_by_stage(FailureStage::Model), 1);
    assert!(cache.load(&key).unwrap().is_none());

    // When: the service recovers
    let second = BatchPipeline::new(source(), processor(), options())
        .with_cache(Arc::clone(&cache), key.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    // Then: Q1 is computed and the complete batch is cached
    assert!(!second.summary.from_cache);
    assert!(second.output.contains_key("P1"));
    assert!(second.output.contains_key("Q1"));
    assert!(second.summary.failures.is_empty());
    assert_eq!(cache.load(&key).unwrap(), Some(second.output));
}

#[tokio::test]
async fn test_accession_failure_still_cached() {
    // R1 fails fusion on every run with these parameters
    let dir = TempDir::new().unwrap();
    let shard = dir.path().join("shard.tar");
    let mut builder = ArchiveBuilder::new();
    builder
        .add_model("AF-R1-F1-model_v4", &"H".repeat(150), None)
        .add_model("AF-R1-F2-model_v4", &"H".repeat(150), None)
        .add_model("AF-R2-F1-model_v4", "EE", None);
    builder.write_tar(&shard);
    let cache: Arc<dyn ResultCache> = Arc::new(FileResultCache::new(dir.path().join("cache")));
    let key = CacheKey::compute("e2e", &[shard.clone()]).unwrap();

    let report = pipeline(&shard)
        .with_cache(Arc::clone(&cache), key.clone())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.summary.count_by_stage(FailureStage::Accession), 1);
    assert_eq!(cache.load(&key).unwrap(), Some(report.output));
}
