//! Accession grouping of per-model results
//!
//! An accession with exactly one model is unfragmented and passes through
//! verbatim. Two or more models form a [`FragmentGroup`] for the fuser.
//! Nothing about fragment order is inferred here.

use crate::models::{accession_of, AccessionResult, FragmentGroup, ModelIdError, ModelResult};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Model id keys partitioned by accession
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedKeys {
    /// accession → its only model id
    pub unfragmented: BTreeMap<String, String>,
    /// accession → model ids of all its fragments
    pub fragmented: BTreeMap<String, Vec<String>>,
    /// Keys with no accession token
    pub invalid: Vec<(String, ModelIdError)>,
}

/// Results partitioned for output and fusion
#[derive(Debug, Default)]
pub struct PartitionedResults {
    /// Unfragmented accessions, already final
    pub unfragmented: Vec<AccessionResult>,
    /// Fragmented accessions awaiting fusion, sorted by accession
    pub groups: Vec<FragmentGroup>,
    /// Models whose id has no accession
    pub invalid: Vec<(String, ModelIdError)>,
}

/// Partition model id keys by accession
pub fn classify_keys<'a, I>(keys: I) -> ClassifiedKeys
where
    I: IntoIterator<Item = &'a str>,
{
    let mut by_accession: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut invalid = Vec::new();

    for key in keys {
        match accession_of(key) {
            Ok(accession) => by_accession
                .entry(accession.to_string())
                .or_default()
                .push(key.to_string()),
            Err(e) => invalid.push((key.to_string(), e)),
        }
    }

    let mut classified = ClassifiedKeys {
        invalid,
        ..ClassifiedKeys::default()
    };

    for (accession, mut keys) in by_accession {
        if keys.len() == 1 {
            if let Some(key) = keys.pop() {
                classified.unfragmented.insert(accession, key);
            }
        } else {
            keys.sort();
            classified.fragmented.insert(accession, keys);
        }
    }

    classified
}

/// Consume per-model results and route them by accession
pub fn partition_results(mut results: HashMap<String, ModelResult>) -> PartitionedResults {
    let classified = classify_keys(results.keys().map(String::as_str));

    for (key, e) in &classified.invalid {
        warn!(model_id = %key, error = %e, "Excluding model without accession");
    }

    let mut partitioned = PartitionedResults {
        invalid: classified.invalid,
        ..PartitionedResults::default()
    };

    for (accession, key) in classified.unfragmented {
        if let Some(model) = results.remove(&key) {
            partitioned
                .unfragmented
                .push(AccessionResult::from_single_model(accession, model));
        }
    }

    for (accession, keys) in classified.fragmented {
        let fragments: Vec<ModelResult> = keys.iter().filter_map(|key| results.remove(key)).collect();
        partitioned.groups.push(FragmentGroup { accession, fragments });
    }

    debug!(
        unfragmented = partitioned.unfragmented.len(),
        fragmented = partitioned.groups.len(),
        invalid = partitioned.invalid.len(),
        "Classified model results by accession"
    );

    partitioned
}
