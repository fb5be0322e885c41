//! Shared fixtures: generated AlphaFold-style archives and in-memory collaborators
#![allow(dead_code)]

use adssp_ingest::services::{
    ConfidenceError, ConfidenceService, DsspError, DsspResidue, PaeFetch, SecondaryStructureOracle,
};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::Path;

/// Gzip a byte slice
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes).unwrap();
    encoder.finish().unwrap()
}

/// Builds a tar archive laid out like an AlphaFold DB shard
///
/// Structure "files" hold the structure codes as plain text so that
/// [`CodesFromFileOracle`] can stand in for DSSP.
pub struct ArchiveBuilder {
    builder: tar::Builder<Vec<u8>>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self {
            builder: tar::Builder::new(Vec::new()),
        }
    }

    pub fn add_raw(&mut self, name: &str, bytes: &[u8]) -> &mut Self {
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        self.builder.append_data(&mut header, name, bytes).unwrap();
        self
    }

    /// `<model_id>.cif.gz` plus, when scores are given, the matching confidence file
    pub fn add_model(&mut self, model_id: &str, codes: &str, plddt: Option<&[f64]>) -> &mut Self {
        self.add_raw(&format!("{}.cif.gz", model_id), &gzip(codes.as_bytes()));

        if let Some(scores) = plddt {
            let confidence_id = model_id.replace("-model_", "-confidence_");
            let body = serde_json::json!({
                "residueNumber": (1..=scores.len()).collect::<Vec<_>>(),
                "confidenceScore": scores,
                "confidenceCategory": vec!["H"; scores.len()],
            });
            self.add_raw(
                &format!("{}.json.gz", confidence_id),
                &gzip(body.to_string().as_bytes()),
            );
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.builder.into_inner().unwrap()
    }

    pub fn write_tar(self, path: &Path) {
        std::fs::write(path, self.into_bytes()).unwrap();
    }

    pub fn write_tgz(self, path: &Path) {
        std::fs::write(path, gzip(&self.into_bytes())).unwrap();
    }
}

/// Reads structure codes from the staged file instead of running DSSP
pub struct CodesFromFileOracle;

impl SecondaryStructureOracle for CodesFromFileOracle {
    fn assign(&self, path: &Path, identifier: &str) -> Result<Vec<DsspResidue>, DsspError> {
        let text = std::fs::read_to_string(path).map_err(|e| DsspError::Output {
            identifier: identifier.to_string(),
            message: e.to_string(),
        })?;
        Ok(text
            .trim()
            .bytes()
            .enumerate()
            .map(|(i, class_code)| DsspResidue {
                position: i as i64 + 1,
                residue: 'A',
                class_code,
            })
            .collect())
    }
}

/// Confidence service with no PAE for any model
pub struct NoPaeService;

#[async_trait]
impl ConfidenceService for NoPaeService {
    async fn fetch_error_row(&self, _identifier: &str) -> Result<PaeFetch, ConfidenceError> {
        Ok(PaeFetch::NotFound)
    }
}

/// Confidence service that is always unavailable (HTTP 503)
pub struct UnavailablePaeService;

#[async_trait]
impl ConfidenceService for UnavailablePaeService {
    async fn fetch_error_row(&self, identifier: &str) -> Result<PaeFetch, ConfidenceError> {
        Err(ConfidenceError::Status {
            url: format!("http://pae.invalid/{identifier}"),
            status: 503,
        })
    }
}
