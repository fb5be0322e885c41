//! Exclusion mask construction
//!
//! `exclusion_mask[i] = structure_codes[i] ∈ forbidden AND confident[i]`

use crate::models::{ResidueTrack, TrackError};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Default forbidden DSSP classes: helices, strands, bridges and turns
pub const DEFAULT_FORBIDDEN_CODES: &str = "HBEGIT";

/// Mask construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskError {
    #[error("{identifier}: {codes} structure codes but {confidence} confidence values")]
    LengthMismatch {
        identifier: String,
        codes: usize,
        confidence: usize,
    },

    #[error("{identifier}: {source}")]
    Track {
        identifier: String,
        #[source]
        source: TrackError,
    },

    #[error("Invalid forbidden code set: {0}")]
    InvalidForbiddenSet(String),
}

/// Set of structure codes that mark a residue for exclusion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbiddenSet(BTreeSet<u8>);

impl ForbiddenSet {
    pub fn contains(&self, code: u8) -> bool {
        self.0.contains(&code)
    }
}

impl Default for ForbiddenSet {
    fn default() -> Self {
        Self(DEFAULT_FORBIDDEN_CODES.bytes().collect())
    }
}

impl FromStr for ForbiddenSet {
    type Err = MaskError;

    /// Codes as a string; commas and whitespace are ignored (`"H,E G"`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut codes = BTreeSet::new();
        for c in s.chars().filter(|c| *c != ',' && !c.is_whitespace()) {
            if !c.is_ascii_graphic() {
                return Err(MaskError::InvalidForbiddenSet(format!("'{}' is not a DSSP code", c)));
            }
            codes.insert(c as u8);
        }
        if codes.is_empty() {
            return Err(MaskError::InvalidForbiddenSet("no codes given".to_string()));
        }
        Ok(Self(codes))
    }
}

impl fmt::Display for ForbiddenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &code in &self.0 {
            write!(f, "{}", code as char)?;
        }
        Ok(())
    }
}

/// What to do when codes and confidence disagree on residue count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskPolicy {
    /// Report the mismatch; the model is excluded
    #[default]
    Strict,
    /// Use the shorter length and warn
    TruncateToShorter,
}

/// Combines structure codes with a confidence mask
#[derive(Debug, Clone, Default)]
pub struct ExclusionMaskBuilder {
    forbidden: ForbiddenSet,
    policy: MaskPolicy,
}

impl ExclusionMaskBuilder {
    pub fn new(forbidden: ForbiddenSet, policy: MaskPolicy) -> Self {
        Self { forbidden, policy }
    }

    pub fn build(&self, identifier: &str, codes: &str, confident: &[bool]) -> Result<ResidueTrack, MaskError> {
        let code_bytes = codes.as_bytes();

        let len = if code_bytes.len() == confident.len() {
            code_bytes.len()
        } else {
            match self.policy {
                MaskPolicy::Strict => {
                    return Err(MaskError::LengthMismatch {
                        identifier: identifier.to_string(),
                        codes: code_bytes.len(),
                        confidence: confident.len(),
                    });
                }
                MaskPolicy::TruncateToShorter => {
                    let len = code_bytes.len().min(confident.len());
                    warn!(
                        identifier,
                        codes = code_bytes.len(),
                        confidence = confident.len(),
                        truncated_to = len,
                        "Residue count mismatch, truncating"
                    );
                    len
                }
            }
        };

        let mask = code_bytes[..len]
            .iter()
            .zip(&confident[..len])
            .map(|(&code, &ok)| ok && self.forbidden.contains(code))
            .collect();

        ResidueTrack::from_code_bytes(mask, code_bytes[..len].to_vec()).map_err(|source| MaskError::Track {
            identifier: identifier.to_string(),
            source,
        })
    }
}
