//! Fragment fusion
//!
//! Large proteins are predicted as overlapping fragment windows, fragment `n`
//! starting `stride * (n - 1)` residues into the sequence. Each fragment's
//! shared edges are trimmed by `round(stride * trim_factor)` residues before
//! the fragments are written into one full-length track:
//!
//! - the fragment starting at residue 0 loses only its tail
//! - the fragment ending at the sequence end loses only its head
//! - every other fragment loses both
//!
//! Residues no trimmed fragment covers keep the defaults (excluded, `-`).
//! Where trimmed ranges still overlap, masks combine by AND and the higher
//! fragment index supplies the structure code.

use crate::models::{
    fragment_index_of, AccessionResult, FragmentGroup, ModelIdError, ModelResult, ResidueTrack,
    TrackError, SENTINEL_CODE,
};
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

/// Default residue offset between fragment starts
pub const DEFAULT_STRIDE: usize = 200;

/// Default fraction of the stride trimmed per shared edge
pub const DEFAULT_TRIM_FACTOR: f64 = 0.5;

/// Fusion errors; the accession is omitted from output
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    #[error("Invalid fusion parameters: {0}")]
    InvalidParams(String),

    #[error("Accession {0} has no fragments")]
    EmptyGroup(String),

    #[error("Accession {accession}: {source}")]
    ModelId {
        accession: String,
        source: ModelIdError,
    },

    #[error("Accession {accession}: fragment {model_id} has index {fragment_index}, giving a negative start")]
    NegativeStart {
        accession: String,
        model_id: String,
        fragment_index: i64,
    },

    #[error("Accession {accession}: trim of {trim} per edge exceeds half of fragment {model_id} ({length} residues)")]
    TrimExceedsFragment {
        accession: String,
        model_id: String,
        trim: usize,
        length: usize,
    },

    #[error("Accession {accession}: fragment index {fragment_index} appears more than once")]
    DuplicateFragment {
        accession: String,
        fragment_index: i64,
    },

    #[error("Accession {accession}: fragment offset overflows for {model_id}")]
    OffsetOverflow { accession: String, model_id: String },

    #[error("Accession {accession}: {source}")]
    Track {
        accession: String,
        source: TrackError,
    },
}

/// Fusion parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    stride: usize,
    trim_factor: f64,
}

impl FusionParams {
    pub fn new(stride: usize, trim_factor: f64) -> Result<Self, FusionError> {
        if stride == 0 {
            return Err(FusionError::InvalidParams("stride must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&trim_factor) {
            return Err(FusionError::InvalidParams(format!(
                "trim factor {} outside [0, 1]",
                trim_factor
            )));
        }
        Ok(Self { stride, trim_factor })
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn trim_factor(&self) -> f64 {
        self.trim_factor
    }

    /// Residues trimmed from each shared fragment edge
    pub fn trim_amount(&self) -> usize {
        (self.stride as f64 * self.trim_factor).round() as usize
    }
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            trim_factor: DEFAULT_TRIM_FACTOR,
        }
    }
}

/// Fragment with its global placement
struct PlacedFragment<'a> {
    fragment_index: i64,
    start: usize,
    end: usize,
    model: &'a ModelResult,
}

/// Merges fragment tracks into one track per accession
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentFuser {
    params: FusionParams,
}

impl FragmentFuser {
    pub fn new(params: FusionParams) -> Self {
        Self { params }
    }

    /// Fuse one accession's fragments
    pub fn fuse(&self, group: &FragmentGroup) -> Result<AccessionResult, FusionError> {
        let accession = group.accession.as_str();
        if group.fragments.is_empty() {
            return Err(FusionError::EmptyGroup(accession.to_string()));
        }

        let trim = self.params.trim_amount();
        let mut placed = self.place_fragments(accession, &group.fragments, trim)?;

        // Ascending index: on overlap the higher fragment's code wins
        placed.sort_by_key(|p| p.fragment_index);
        if let Some(pair) = placed.windows(2).find(|w| w[0].fragment_index == w[1].fragment_index) {
            return Err(FusionError::DuplicateFragment {
                accession: accession.to_string(),
                fragment_index: pair[0].fragment_index,
            });
        }

        let total_length = placed.iter().map(|p| p.end).max().unwrap_or(0);
        let mut mask = vec![true; total_length];
        let mut codes = vec![SENTINEL_CODE; total_length];

        for p in &placed {
            let length = p.end - p.start;
            let (keep_from, keep_to) = if p.start == 0 {
                (0, length - trim)
            } else if p.end == total_length {
                (trim, length)
            } else {
                (trim, length - trim)
            };

            let global_from = p.start + keep_from;
            let fragment_mask = &p.model.track.exclusion_mask()[keep_from..keep_to];
            let fragment_codes = &p.model.track.code_bytes()[keep_from..keep_to];

            for (offset, (&excluded, &code)) in fragment_mask.iter().zip(fragment_codes).enumerate() {
                let pos = global_from + offset;
                mask[pos] &= excluded;
                codes[pos] = code;
            }

            debug!(
                accession,
                model_id = %p.model.model_id,
                global_from,
                global_to = p.start + keep_to,
                "Placed trimmed fragment"
            );
        }

        let track = ResidueTrack::from_code_bytes(mask, codes).map_err(|source| FusionError::Track {
            accession: accession.to_string(),
            source,
        })?;

        debug!(
            accession,
            fragments = placed.len(),
            length = track.len(),
            "Fused accession"
        );

        Ok(AccessionResult {
            accession: accession.to_string(),
            track,
        })
    }

    /// Fuse many accessions in parallel
    ///
    /// Output order follows input order.
    pub fn fuse_all(&self, groups: &[FragmentGroup]) -> Vec<(String, Result<AccessionResult, FusionError>)> {
        groups
            .par_iter()
            .map(|group| {
                let result = self.fuse(group);
                if let Err(e) = &result {
                    warn!(accession = %group.accession, error = %e, "Fragment fusion failed");
                }
                (group.accession.clone(), result)
            })
            .collect()
    }

    fn place_fragments<'a>(
        &self,
        accession: &str,
        fragments: &'a [ModelResult],
        trim: usize,
    ) -> Result<Vec<PlacedFragment<'a>>, FusionError> {
        fragments
            .iter()
            .map(|model| {
                let fragment_index =
                    fragment_index_of(&model.model_id).map_err(|source| FusionError::ModelId {
                        accession: accession.to_string(),
                        source,
                    })?;

                if fragment_index < 1 {
                    return Err(FusionError::NegativeStart {
                        accession: accession.to_string(),
                        model_id: model.model_id.clone(),
                        fragment_index,
                    });
                }

                let length = model.track.len();
                if trim.saturating_mul(2) > length {
                    return Err(FusionError::TrimExceedsFragment {
                        accession: accession.to_string(),
                        model_id: model.model_id.clone(),
                        trim,
                        length,
                    });
                }

                let overflow = || FusionError::OffsetOverflow {
                    accession: accession.to_string(),
                    model_id: model.model_id.clone(),
                };
                let start = usize::try_from(fragment_index - 1)
                    .ok()
                    .and_then(|steps| steps.checked_mul(self.params.stride))
                    .ok_or_else(overflow)?;
                let end = start.checked_add(length).ok_or_else(overflow)?;

                Ok(PlacedFragment {
                    fragment_index,
                    start,
                    end,
                    model,
                })
            })
            .collect()
    }
}
