//! Batch workflow
//!
//! archives → per-model processing → grouping barrier → fusion → output

pub mod output;
pub mod pipeline;

pub use output::{summary_path, write_report, OutputError};
pub use pipeline::{BatchPipeline, BatchReport, ModelError, ModelProcessor, PipelineError, PipelineOptions};
