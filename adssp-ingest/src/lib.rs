//! adssp-ingest library interface
//!
//! Turns AlphaFold structure archives into per-residue exclusion masks:
//! residues with a forbidden DSSP class that are also predicted with high
//! confidence. Fragmented proteins are fused back into one sequence per
//! accession.

pub mod config;
pub mod fusion;
pub mod models;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::config::{ConfigOverrides, IngestConfig};
pub use crate::workflow::{BatchPipeline, BatchReport, PipelineError};
