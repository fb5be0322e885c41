//! Per-model services and their external collaborators
//!
//! - Structure source (tar archives of gzip-compressed structures)
//! - DSSP secondary-structure assignment
//! - Confidence gating (local pLDDT or remote PAE)
//! - Exclusion mask construction
//! - Batch result cache

pub mod confidence;
pub mod dssp;
pub mod exclusion_mask;
pub mod result_cache;
pub mod structure_source;

pub use confidence::{
    AlphaFoldPaeClient, ConfidenceError, ConfidenceMask, ConfidenceOrigin, ConfidenceResolver, ConfidenceService,
    ConfidenceThresholds, PaeFetch, ResolveError,
};
pub use dssp::{DsspCli, DsspError, DsspResidue, MkdsspOracle, SecondaryStructureClassifier, SecondaryStructureOracle};
pub use exclusion_mask::{ExclusionMaskBuilder, ForbiddenSet, MaskError, MaskPolicy};
pub use result_cache::{digest_hex, BatchOutput, CacheError, CacheKey, FileResultCache, ResultCache};
pub use structure_source::{SourceError, StructureEntry, StructureFormat, StructureSource, TarArchiveSource};
