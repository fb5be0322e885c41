//! Per-model and per-accession residue results

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel structure code for residues no fragment covers
pub const SENTINEL_CODE: u8 = b'-';

/// Residue track construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackError {
    /// Mask and code sequences have different lengths
    #[error("Exclusion mask has {mask} residues but structure codes have {codes}")]
    LengthMismatch { mask: usize, codes: usize },

    /// Structure codes must be single-byte characters
    #[error("Structure codes contain a non-ASCII character")]
    NonAsciiCode,
}

/// Positionally aligned exclusion mask and structure codes
///
/// Index `i` of both sequences refers to the same residue. Codes are ASCII,
/// so byte offsets and residue offsets coincide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTrack")]
pub struct ResidueTrack {
    exclusion_mask: Vec<bool>,
    structure_codes: String,
}

#[derive(Deserialize)]
struct RawTrack {
    exclusion_mask: Vec<bool>,
    structure_codes: String,
}

impl TryFrom<RawTrack> for ResidueTrack {
    type Error = TrackError;

    fn try_from(raw: RawTrack) -> Result<Self, Self::Error> {
        ResidueTrack::new(raw.exclusion_mask, raw.structure_codes)
    }
}

impl ResidueTrack {
    pub fn new(exclusion_mask: Vec<bool>, structure_codes: String) -> Result<Self, TrackError> {
        if !structure_codes.is_ascii() {
            return Err(TrackError::NonAsciiCode);
        }
        if exclusion_mask.len() != structure_codes.len() {
            return Err(TrackError::LengthMismatch {
                mask: exclusion_mask.len(),
                codes: structure_codes.len(),
            });
        }
        Ok(Self {
            exclusion_mask,
            structure_codes,
        })
    }

    /// Build from code bytes (must be ASCII)
    pub fn from_code_bytes(exclusion_mask: Vec<bool>, codes: Vec<u8>) -> Result<Self, TrackError> {
        let structure_codes = String::from_utf8(codes).map_err(|_| TrackError::NonAsciiCode)?;
        Self::new(exclusion_mask, structure_codes)
    }

    /// Residue count
    pub fn len(&self) -> usize {
        self.exclusion_mask.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exclusion_mask.is_empty()
    }

    pub fn exclusion_mask(&self) -> &[bool] {
        &self.exclusion_mask
    }

    pub fn structure_codes(&self) -> &str {
        &self.structure_codes
    }

    pub fn code_bytes(&self) -> &[u8] {
        self.structure_codes.as_bytes()
    }

    /// Number of residues flagged for exclusion
    pub fn excluded_count(&self) -> usize {
        self.exclusion_mask.iter().filter(|&&excluded| excluded).count()
    }
}

/// Result for one processed structural model (whole protein or one fragment)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResult {
    /// AlphaFold model id, e.g. `AF-P12345-F2-model_v4`
    pub model_id: String,
    #[serde(flatten)]
    pub track: ResidueTrack,
}

impl ModelResult {
    pub fn new(model_id: impl Into<String>, track: ResidueTrack) -> Self {
        Self {
            model_id: model_id.into(),
            track,
        }
    }
}

/// Final full-length result for one accession
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessionResult {
    pub accession: String,
    #[serde(flatten)]
    pub track: ResidueTrack,
}

impl AccessionResult {
    /// Unfragmented accession: the model's track unchanged, keyed by accession
    pub fn from_single_model(accession: impl Into<String>, model: ModelResult) -> Self {
        Self {
            accession: accession.into(),
            track: model.track,
        }
    }
}

/// Fragments of one accession awaiting fusion
#[derive(Debug, Clone)]
pub struct FragmentGroup {
    pub accession: String,
    pub fragments: Vec<ModelResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_rejects_length_mismatch() {
        let err = ResidueTrack::new(vec![true, false], "H".to_string()).unwrap_err();
        assert_eq!(err, TrackError::LengthMismatch { mask: 2, codes: 1 });
    }

    #[test]
    fn test_track_rejects_non_ascii() {
        assert_eq!(
            ResidueTrack::new(vec![true], "α".to_string()).unwrap_err(),
            TrackError::NonAsciiCode
        );
    }

    #[test]
    fn test_excluded_count() {
        let track = ResidueTrack::new(vec![true, false, true], "HE-".to_string()).unwrap();
        assert_eq!(track.len(), 3);
        assert_eq!(track.excluded_count(), 2);
    }

    #[test]
    fn test_single_model_becomes_accession_verbatim() {
        let track = ResidueTrack::new(vec![false, true, true], "-HH".to_string()).unwrap();
        let model = ModelResult::new("AF-P1-F1-model_v4", track.clone());

        let result = AccessionResult::from_single_model("P1", model);
        assert_eq!(result.accession, "P1");
        assert_eq!(result.track, track);
    }

    #[test]
    fn test_track_json_shape() {
        let track = ResidueTrack::new(vec![true, false], "HT".to_string()).unwrap();
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "exclusion_mask": [true, false], "structure_codes": "HT" })
        );
    }

    #[test]
    fn test_track_deserialize_validates() {
        let bad = r#"{ "exclusion_mask": [true], "structure_codes": "HH" }"#;
        assert!(serde_json::from_str::<ResidueTrack>(bad).is_err());
    }
}
