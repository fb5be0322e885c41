//! Batch run summary and per-item failure records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stage at which an item failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FailureStage {
    /// Archive or archive entry could not be read; the entry is skipped
    Source,
    /// Model processing failed; the model is excluded
    Model,
    /// Fragment fusion failed; the accession is excluded
    Accession,
}

/// One failed item with enough context to locate the input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Archive path, model id or accession
    pub identifier: String,
    pub stage: FailureStage,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn source(identifier: impl Into<String>, message: impl ToString) -> Self {
        Self::new(identifier, FailureStage::Source, message)
    }

    pub fn model(identifier: impl Into<String>, message: impl ToString) -> Self {
        Self::new(identifier, FailureStage::Model, message)
    }

    pub fn accession(identifier: impl Into<String>, message: impl ToString) -> Self {
        Self::new(identifier, FailureStage::Accession, message)
    }

    fn new(identifier: impl Into<String>, stage: FailureStage, message: impl ToString) -> Self {
        Self {
            identifier: identifier.into(),
            stage,
            message: message.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Completion summary for one batch run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Digest of the parameters the batch ran with
    pub parameter_digest: String,
    /// True when results came from the cache
    pub from_cache: bool,
    pub models_processed: usize,
    pub accessions_unfragmented: usize,
    pub accessions_fused: usize,
    /// Longest output sequence in residues
    pub longest_sequence: usize,
    pub failures: Vec<FailureRecord>,
}

impl BatchSummary {
    pub fn new(parameter_digest: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            parameter_digest: parameter_digest.into(),
            from_cache: false,
            models_processed: 0,
            accessions_unfragmented: 0,
            accessions_fused: 0,
            longest_sequence: 0,
            failures: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failures.push(failure);
    }

    /// Count failures at a stage
    pub fn count_by_stage(&self, stage: FailureStage) -> usize {
        self.failures.iter().filter(|f| f.stage == stage).count()
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_by_stage() {
        let mut summary = BatchSummary::new("abc");
        summary.record_failure(FailureRecord::model("AF-P1-F1-model_v4", "dssp failed"));
        summary.record_failure(FailureRecord::model("AF-P2-F1-model_v4", "pae failed"));
        summary.record_failure(FailureRecord::accession("P3", "bad offsets"));

        assert_eq!(summary.count_by_stage(FailureStage::Model), 2);
        assert_eq!(summary.count_by_stage(FailureStage::Accession), 1);
        assert_eq!(summary.count_by_stage(FailureStage::Source), 0);
    }

    #[test]
    fn test_stage_serializes_uppercase() {
        let json = serde_json::to_string(&FailureStage::Accession).unwrap();
        assert_eq!(json, "\"ACCESSION\"");
    }
}
