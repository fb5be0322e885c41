//! Data models for adssp-ingest
//!
//! - Model id convention and parsing
//! - Per-model and per-accession residue results
//! - Batch summary and failure records

pub mod batch_summary;
pub mod model_id;
pub mod results;

pub use batch_summary::{BatchSummary, FailureRecord, FailureStage};
pub use model_id::{accession_of, fragment_index_of, version_of, ModelIdError};
pub use results::{AccessionResult, FragmentGroup, ModelResult, ResidueTrack, TrackError, SENTINEL_CODE};
