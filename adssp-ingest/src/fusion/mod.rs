// Fusion Module - Accession grouping and fragment fusion
//
// Per-model results → key classification → (unfragmented: pass through,
// fragmented: FragmentFuser) → one AccessionResult per accession

pub mod fragment_fuser;
pub mod key_classifier;

pub use fragment_fuser::{FragmentFuser, FusionError, FusionParams, DEFAULT_STRIDE, DEFAULT_TRIM_FACTOR};
pub use key_classifier::{classify_keys, partition_results, ClassifiedKeys, PartitionedResults};
