//! Confidence gating
//!
//! A residue passes the confidence gate when either
//! - its local per-residue pLDDT is at or above the pLDDT threshold, or
//! - its predicted aligned error (row 0 of the PAE matrix fetched from the
//!   AlphaFold DB) is at or below the PAE threshold.
//!
//! Local scores are used when the archive supplies them. Otherwise the PAE is
//! fetched with a fixed-delay retry; a definitive 404 disables gating for that
//! model (all residues pass).

use crate::models::version_of;
use crate::utils::{retry_async, RetryError, RetryPolicy};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// AlphaFold DB file server
pub const DEFAULT_PAE_BASE_URL: &str = "https://alphafold.ebi.ac.uk/files";

/// Default pLDDT threshold (0-100 scale)
pub const DEFAULT_PLDDT_THRESHOLD: f64 = 70.0;

/// Default PAE threshold in angstroms
pub const DEFAULT_PAE_THRESHOLD: f64 = 5.0;

const USER_AGENT: &str = concat!("adssp-ingest/", env!("CARGO_PKG_VERSION"));

/// Confidence service errors (single attempt)
#[derive(Debug, Error)]
pub enum ConfidenceError {
    /// Identifier does not carry a `_v<version>` suffix
    #[error("Cannot derive PAE file name from identifier {0}")]
    InvalidIdentifier(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Request did not complete
    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    /// Non-success status other than 404
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    /// Success status, unusable body
    #[error("Malformed PAE data from {url}: {message}")]
    Malformed { url: String, message: String },
}

impl ConfidenceError {
    /// Network failures, 429 and 5xx are retried; anything else is final
    pub fn is_transient(&self) -> bool {
        match self {
            ConfidenceError::Network { .. } => true,
            ConfidenceError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Outcome of one PAE lookup
#[derive(Debug, Clone, PartialEq)]
pub enum PaeFetch {
    /// Row 0 of the predicted aligned error matrix
    Found(Vec<f64>),
    /// Service has no PAE for this model
    NotFound,
}

/// Remote source of per-residue-pair error metrics
#[async_trait]
pub trait ConfidenceService: Send + Sync {
    async fn fetch_error_row(&self, identifier: &str) -> Result<PaeFetch, ConfidenceError>;
}

#[derive(Deserialize)]
struct PaeEntry {
    predicted_aligned_error: Vec<Vec<f64>>,
}

/// AlphaFold DB predicted aligned error client
pub struct AlphaFoldPaeClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl AlphaFoldPaeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ConfidenceError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfidenceError::Client(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// PAE URL for a model id
    ///
    /// `AF-P12345-F1-model_v4` → `{base}/AF-P12345-F1-predicted_aligned_error_v4.json`
    pub fn pae_url(&self, identifier: &str) -> Result<String, ConfidenceError> {
        let invalid = || ConfidenceError::InvalidIdentifier(identifier.to_string());
        let version = version_of(identifier).ok_or_else(invalid)?;
        let v_idx = identifier.rfind("_v").ok_or_else(invalid)?;

        let prediction = &identifier[..v_idx];
        let prediction = prediction.split("-model").next().unwrap_or(prediction);

        Ok(format!(
            "{}/{}-predicted_aligned_error_v{}.json",
            self.base_url, prediction, version
        ))
    }
}

#[async_trait]
impl ConfidenceService for AlphaFoldPaeClient {
    async fn fetch_error_row(&self, identifier: &str) -> Result<PaeFetch, ConfidenceError> {
        let url = self.pae_url(identifier)?;
        debug!(identifier, url = %url, "Requesting PAE");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConfidenceError::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(PaeFetch::NotFound);
        }
        if !status.is_success() {
            return Err(ConfidenceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let entries: Vec<PaeEntry> = response.json().await.map_err(|e| ConfidenceError::Malformed {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let row = entries
            .into_iter()
            .next()
            .and_then(|entry| entry.predicted_aligned_error.into_iter().next())
            .ok_or_else(|| ConfidenceError::Malformed {
                url: url.clone(),
                message: "empty predicted_aligned_error matrix".to_string(),
            })?;

        Ok(PaeFetch::Found(row))
    }
}

/// Thresholds for both gating modes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceThresholds {
    /// Minimum pLDDT
    pub plddt: f64,
    /// Maximum PAE (angstroms)
    pub pae: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            plddt: DEFAULT_PLDDT_THRESHOLD,
            pae: DEFAULT_PAE_THRESHOLD,
        }
    }
}

/// Where a confidence mask came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceOrigin {
    Plddt,
    Pae,
    /// PAE not found, gating skipped
    FailOpen,
}

/// Per-residue confidence gate result
#[derive(Debug, Clone, PartialEq)]
pub struct ConfidenceMask {
    pub mask: Vec<bool>,
    pub origin: ConfidenceOrigin,
}

/// Confidence resolution errors (fatal for the model)
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No local confidence scores and no confidence service for {0}")]
    NoSource(String),

    #[error(transparent)]
    Fetch(#[from] RetryError<ConfidenceError>),
}

/// `mask[i] = score[i] >= threshold`
pub fn plddt_mask(scores: &[f64], threshold: f64) -> Vec<bool> {
    scores.iter().map(|&score| score >= threshold).collect()
}

/// `mask[i] = error[i] <= threshold`
pub fn pae_mask(errors: &[f64], threshold: f64) -> Vec<bool> {
    errors.iter().map(|&error| error <= threshold).collect()
}

/// Chooses local or remote gating and applies the thresholds
#[derive(Clone)]
pub struct ConfidenceResolver {
    service: Option<Arc<dyn ConfidenceService>>,
    thresholds: ConfidenceThresholds,
    retry: RetryPolicy,
    force_remote: bool,
}

impl ConfidenceResolver {
    pub fn new(
        service: Option<Arc<dyn ConfidenceService>>,
        thresholds: ConfidenceThresholds,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            service,
            thresholds,
            retry,
            force_remote: false,
        }
    }

    /// Use the remote PAE even when local scores exist
    pub fn with_force_remote(mut self, force_remote: bool) -> Self {
        self.force_remote = force_remote;
        self
    }

    /// Confidence mask for one model
    ///
    /// `residue_count` sizes the all-true mask when gating fails open.
    pub async fn resolve(
        &self,
        identifier: &str,
        local_scores: Option<&[f64]>,
        residue_count: usize,
    ) -> Result<ConfidenceMask, ResolveError> {
        if let Some(scores) = local_scores.filter(|_| !self.force_remote) {
            return Ok(ConfidenceMask {
                mask: plddt_mask(scores, self.thresholds.plddt),
                origin: ConfidenceOrigin::Plddt,
            });
        }

        let service = self
            .service
            .as_ref()
            .ok_or_else(|| ResolveError::NoSource(identifier.to_string()))?;

        let fetched = retry_async("pae fetch", self.retry, ConfidenceError::is_transient, |_| {
            service.fetch_error_row(identifier)
        })
        .await?;

        match fetched {
            PaeFetch::Found(row) => Ok(ConfidenceMask {
                mask: pae_mask(&row, self.thresholds.pae),
                origin: ConfidenceOrigin::Pae,
            }),
            PaeFetch::NotFound => {
                warn!(identifier, "PAE not found, confidence gating skipped");
                Ok(ConfidenceMask {
                    mask: vec![true; residue_count],
                    origin: ConfidenceOrigin::FailOpen,
                })
            }
        }
    }
}
