//! Batch result cache
//!
//! A finished batch is stored under a [`CacheKey`]: the SHA-256 of the run
//! parameters and the identity (path, size, modification time) of every
//! input archive. Changing any parameter or touching any archive misses.

use crate::models::ResidueTrack;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::debug;

/// Final mapping of accession (or model id) to its residue track
pub type BatchOutput = BTreeMap<String, ResidueTrack>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache entry {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// SHA-256 hex digest of the given parts, each length-prefixed
pub fn digest_hex<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        let bytes = part.as_ref();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// Cache key for one batch
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key from the parameter fingerprint and the input archives
    pub fn compute(parameter_fingerprint: &str, archives: &[PathBuf]) -> Result<Self, CacheError> {
        let mut parts = vec![parameter_fingerprint.to_string()];

        for archive in archives {
            let metadata = fs::metadata(archive).map_err(|e| CacheError::io(archive, e))?;
            let modified = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or_default();
            let path = fs::canonicalize(archive).unwrap_or_else(|_| archive.clone());

            parts.push(format!("{}|{}|{}", path.display(), metadata.len(), modified));
        }

        Ok(Self(digest_hex(parts)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Store for finished batch outputs
pub trait ResultCache: Send + Sync {
    /// `Ok(None)` on a miss
    fn load(&self, key: &CacheKey) -> Result<Option<BatchOutput>, CacheError>;

    fn store(&self, key: &CacheKey, output: &BatchOutput) -> Result<(), CacheError>;
}

/// One JSON file per key in a cache directory
#[derive(Debug, Clone)]
pub struct FileResultCache {
    directory: PathBuf,
}

impl FileResultCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(format!("{}.json", key.as_str()))
    }
}

impl ResultCache for FileResultCache {
    fn load(&self, key: &CacheKey) -> Result<Option<BatchOutput>, CacheError> {
        let path = self.entry_path(key);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let output = serde_json::from_reader(BufReader::new(file)).map_err(|e| CacheError::Corrupt {
            path: path.clone(),
            message: e.to_string(),
        })?;

        debug!(path = %path.display(), "Cache hit");
        Ok(Some(output))
    }

    fn store(&self, key: &CacheKey, output: &BatchOutput) -> Result<(), CacheError> {
        fs::create_dir_all(&self.directory).map_err(|e| CacheError::io(&self.directory, e))?;
        let path = self.entry_path(key);

        // Write to a temp file in the same directory, then rename over the entry
        let mut temp = tempfile::NamedTempFile::new_in(&self.directory).map_err(|e| CacheError::io(&path, e))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            serde_json::to_writer(&mut writer, output).map_err(|e| CacheError::Corrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;
            writer.flush().map_err(|e| CacheError::io(&path, e))?;
        }
        temp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;

        debug!(path = %path.display(), entries = output.len(), "Cache entry stored");
        Ok(())
    }
}
