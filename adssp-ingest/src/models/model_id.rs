//! AlphaFold model identifier parsing
//!
//! Identifiers follow the AlphaFold DB convention `AF-<accession>-F<n>-model_v<version>`:
//! `-` delimited, accession in the second token, 1-based fragment index in the
//! third token, optional version after `_v`.

use thiserror::Error;

/// Identifier parse errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelIdError {
    /// No second `-` token
    #[error("Model id has no accession token: {0}")]
    MissingAccession(String),

    /// No third `-` token
    #[error("Model id has no fragment token: {0}")]
    MissingFragment(String),

    /// Third token is not `F<integer>`
    #[error("Model id {0} has invalid fragment token '{1}'")]
    InvalidFragment(String, String),
}

/// Accession of a model id (second `-` delimited token)
pub fn accession_of(model_id: &str) -> Result<&str, ModelIdError> {
    match model_id.split('-').nth(1) {
        Some(token) if !token.is_empty() => Ok(token),
        _ => Err(ModelIdError::MissingAccession(model_id.to_string())),
    }
}

/// 1-based fragment index of a model id
///
/// Returned signed: an index of zero parses here and is rejected by fusion,
/// which owns the offset rules.
pub fn fragment_index_of(model_id: &str) -> Result<i64, ModelIdError> {
    let token = model_id
        .split('-')
        .nth(2)
        .ok_or_else(|| ModelIdError::MissingFragment(model_id.to_string()))?;

    token
        .strip_prefix('F')
        .and_then(|digits| digits.parse::<i64>().ok())
        .ok_or_else(|| ModelIdError::InvalidFragment(model_id.to_string(), token.to_string()))
}

/// Model version (`_v4` → 4), if present
pub fn version_of(model_id: &str) -> Option<u32> {
    let idx = model_id.rfind("_v")?;
    let digits: String = model_id[idx + 2..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accession_is_second_token() {
        assert_eq!(accession_of("AF-P12345-F1-model_v4").unwrap(), "P12345");
        assert_eq!(accession_of("AF-Q8WZ42-F17-model_v4").unwrap(), "Q8WZ42");
    }

    #[test]
    fn test_missing_accession() {
        assert_eq!(
            accession_of("P12345"),
            Err(ModelIdError::MissingAccession("P12345".to_string()))
        );
        assert!(accession_of("AF-").is_err());
    }

    #[test]
    fn test_fragment_index() {
        assert_eq!(fragment_index_of("AF-P12345-F1-model_v4").unwrap(), 1);
        assert_eq!(fragment_index_of("AF-Q8WZ42-F24-model_v4").unwrap(), 24);
        assert_eq!(fragment_index_of("AF-P12345-F0-model_v4").unwrap(), 0);
    }

    #[test]
    fn test_fragment_token_errors() {
        assert!(matches!(
            fragment_index_of("AF-P12345"),
            Err(ModelIdError::MissingFragment(_))
        ));
        assert!(matches!(
            fragment_index_of("AF-P12345-model_v4"),
            Err(ModelIdError::InvalidFragment(_, _))
        ));
        assert!(matches!(
            fragment_index_of("AF-P12345-Fx-model_v4"),
            Err(ModelIdError::InvalidFragment(_, _))
        ));
    }

    #[test]
    fn test_version() {
        assert_eq!(version_of("AF-P12345-F1-model_v4"), Some(4));
        assert_eq!(version_of("AF-P12345-F1-model_v12"), Some(12));
        assert_eq!(version_of("AF-P12345-F1-model"), None);
    }
}
