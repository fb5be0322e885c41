//! Structure source: AlphaFold archive traversal
//!
//! AlphaFold DB shards are tar archives holding, per model, a gzip-compressed
//! structure file (`AF-P12345-F1-model_v4.cif.gz` or `.pdb.gz`) and a
//! gzip-compressed confidence file (`AF-P12345-F1-confidence_v4.json.gz`).
//!
//! Pairing is done by construction: a first pass indexes confidence files by
//! [`ModelKey`], a second pass streams structure files, stages each one to a
//! temporary file and attaches the scores stored under the same key.

use flate2::read::GzDecoder;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Structure source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// Input path does not exist
    #[error("Archive path not found: {0}")]
    PathNotFound(PathBuf),

    /// Archive could not be opened or iterated; its remaining entries are skipped
    #[error("Archive read error {0}: {1}")]
    ArchiveRead(PathBuf, String),

    /// One entry could not be read; the batch continues
    #[error("Entry {entry} in {archive}: {message}")]
    EntryRead {
        archive: PathBuf,
        entry: String,
        message: String,
    },
}

impl SourceError {
    /// Identifier used in failure records
    pub fn identifier(&self) -> String {
        match self {
            SourceError::PathNotFound(path) | SourceError::ArchiveRead(path, _) => {
                path.display().to_string()
            }
            SourceError::EntryRead { archive, entry, .. } => {
                format!("{}:{}", archive.display(), entry)
            }
        }
    }
}

/// Structure file encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureFormat {
    MmCif,
    Pdb,
}

impl StructureFormat {
    fn staged_suffix(&self) -> &'static str {
        match self {
            StructureFormat::MmCif => ".cif",
            StructureFormat::Pdb => ".pdb",
        }
    }
}

/// One staged structure with its identifier and optional confidence scores
///
/// The staged file is deleted when the entry is dropped.
#[derive(Debug)]
pub struct StructureEntry {
    /// Model id, e.g. `AF-P12345-F1-model_v4`
    pub identifier: String,
    pub format: StructureFormat,
    /// Per-residue pLDDT; `None` routes confidence to the remote service
    pub confidence: Option<Vec<f64>>,
    staged: NamedTempFile,
}

impl StructureEntry {
    pub fn new(
        identifier: impl Into<String>,
        format: StructureFormat,
        confidence: Option<Vec<f64>>,
        staged: NamedTempFile,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            format,
            confidence,
            staged,
        }
    }

    /// Path of the staged, decompressed structure file
    pub fn path(&self) -> &Path {
        self.staged.path()
    }
}

/// Source of structure entries
///
/// Entries are pushed to the visitor one at a time; returning
/// `ControlFlow::Break` stops the traversal. Entry- and archive-level
/// failures are delivered as `Err` items and never end the traversal.
pub trait StructureSource: Send + Sync {
    /// Number of structure entries, for progress reporting
    fn count(&self) -> Result<usize, SourceError>;

    fn visit(&self, visitor: &mut dyn FnMut(Result<StructureEntry, SourceError>) -> ControlFlow<()>);
}

/// Shared key of a structure file and its confidence file
///
/// `AF-P1-F1-model_v4.cif.gz` and `AF-P1-F1-confidence_v4.json.gz` both map to
/// `AF-P1-F1` + `_v4`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    stem: String,
    version: String,
}

/// What an archive entry holds
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryKind {
    Structure(StructureFormat),
    Confidence,
}

/// Classify an archive entry by file name; `None` for unrelated files
fn classify_entry(file_name: &str) -> Option<(String, ModelKey, EntryKind)> {
    let (base, kind) = if let Some(base) = file_name.strip_suffix(".cif.gz") {
        (base, EntryKind::Structure(StructureFormat::MmCif))
    } else if let Some(base) = file_name.strip_suffix(".pdb.gz") {
        (base, EntryKind::Structure(StructureFormat::Pdb))
    } else if let Some(base) = file_name.strip_suffix(".json.gz") {
        (base, EntryKind::Confidence)
    } else {
        return None;
    };

    let (stem, last) = base.rsplit_once('-')?;
    let (label, version) = match last.find("_v") {
        Some(idx) => (&last[..idx], &last[idx..]),
        None => (last, ""),
    };

    let expected_label = match kind {
        EntryKind::Structure(_) => "model",
        EntryKind::Confidence => "confidence",
    };
    if label != expected_label {
        return None;
    }

    let key = ModelKey {
        stem: stem.to_string(),
        version: version.to_string(),
    };
    Some((base.to_string(), key, kind))
}

#[derive(Deserialize)]
struct ConfidenceFile {
    #[serde(rename = "confidenceScore")]
    confidence_score: Vec<f64>,
}

/// Tar archive structure source
pub struct TarArchiveSource {
    archives: Vec<PathBuf>,
    staging_dir: Option<PathBuf>,
}

impl TarArchiveSource {
    /// Build from archive paths and/or directories containing archives
    ///
    /// Directories are searched recursively; archives are visited in path order.
    pub fn new(inputs: &[PathBuf]) -> Result<Self, SourceError> {
        let mut archives = Vec::new();

        for input in inputs {
            if !input.exists() {
                return Err(SourceError::PathNotFound(input.clone()));
            }

            if input.is_dir() {
                let mut found: Vec<PathBuf> = WalkDir::new(input)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(e) => {
                            warn!("Error accessing entry: {}", e);
                            None
                        }
                    })
                    .filter(|entry| entry.file_type().is_file() && is_archive(entry.path()))
                    .map(|entry| entry.into_path())
                    .collect();
                found.sort();
                debug!("Found {} archives under {}", found.len(), input.display());
                archives.extend(found);
            } else {
                archives.push(input.clone());
            }
        }

        Ok(Self {
            archives,
            staging_dir: None,
        })
    }

    /// Stage decompressed structures in this directory instead of the system temp dir
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn archives(&self) -> &[PathBuf] {
        &self.archives
    }

    fn open_archive(path: &Path) -> io::Result<tar::Archive<Box<dyn Read>>> {
        let file = BufReader::new(File::open(path)?);
        let name = path.to_string_lossy();
        let reader: Box<dyn Read> = if name.ends_with(".gz") || name.ends_with(".tgz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(tar::Archive::new(reader))
    }

    fn count_archive(path: &Path) -> io::Result<usize> {
        let mut archive = Self::open_archive(path)?;
        let mut count = 0;
        for entry in archive.entries()? {
            let entry = entry?;
            let name = entry_file_name(&entry)?;
            if matches!(classify_entry(&name), Some((_, _, EntryKind::Structure(_)))) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// First pass: confidence scores keyed by model key
    fn index_confidence(&self, path: &Path) -> Result<HashMap<ModelKey, Vec<f64>>, SourceError> {
        let archive_err = |e: io::Error| SourceError::ArchiveRead(path.to_path_buf(), e.to_string());
        let mut archive = Self::open_archive(path).map_err(archive_err)?;
        let mut index = HashMap::new();

        for entry in archive.entries().map_err(archive_err)? {
            let entry = entry.map_err(archive_err)?;
            let name = entry_file_name(&entry).map_err(archive_err)?;
            let Some((base, key, EntryKind::Confidence)) = classify_entry(&name) else {
                continue;
            };

            match serde_json::from_reader::<_, ConfidenceFile>(GzDecoder::new(entry)) {
                Ok(file) => {
                    index.insert(key, file.confidence_score);
                }
                Err(e) => {
                    // The structure is still processed, with remote confidence
                    warn!(entry = %base, archive = %path.display(), "Unreadable confidence file: {}", e);
                }
            }
        }

        Ok(index)
    }

    fn stage(&self, reader: impl Read, format: StructureFormat) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("adssp-").suffix(format.staged_suffix());
        let mut staged = match &self.staging_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        io::copy(&mut GzDecoder::new(reader), staged.as_file_mut())?;
        Ok(staged)
    }

    /// Second pass: stream structures. Returns `Break` if the visitor stopped.
    fn visit_archive(
        &self,
        path: &Path,
        visitor: &mut dyn FnMut(Result<StructureEntry, SourceError>) -> ControlFlow<()>,
    ) -> Result<ControlFlow<()>, SourceError> {
        let mut confidence = self.index_confidence(path)?;
        debug!(
            archive = %path.display(),
            confidence_files = confidence.len(),
            "Indexed confidence files"
        );

        let archive_err = |e: io::Error| SourceError::ArchiveRead(path.to_path_buf(), e.to_string());
        let mut archive = Self::open_archive(path).map_err(archive_err)?;

        for entry in archive.entries().map_err(archive_err)? {
            let entry = entry.map_err(archive_err)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry_file_name(&entry).map_err(archive_err)?;
            let Some((identifier, key, EntryKind::Structure(format))) = classify_entry(&name) else {
                continue;
            };

            let item = match self.stage(entry, format) {
                Ok(staged) => Ok(StructureEntry::new(
                    identifier,
                    format,
                    confidence.remove(&key),
                    staged,
                )),
                Err(e) => Err(SourceError::EntryRead {
                    archive: path.to_path_buf(),
                    entry: name,
                    message: e.to_string(),
                }),
            };

            if visitor(item).is_break() {
                return Ok(ControlFlow::Break(()));
            }
        }

        Ok(ControlFlow::Continue(()))
    }
}

impl StructureSource for TarArchiveSource {
    fn count(&self) -> Result<usize, SourceError> {
        self.archives.iter().try_fold(0, |total, path| {
            Self::count_archive(path)
                .map(|n| total + n)
                .map_err(|e| SourceError::ArchiveRead(path.clone(), e.to_string()))
        })
    }

    fn visit(&self, visitor: &mut dyn FnMut(Result<StructureEntry, SourceError>) -> ControlFlow<()>) {
        for path in &self.archives {
            match self.visit_archive(path, visitor) {
                Ok(ControlFlow::Break(())) => return,
                Ok(ControlFlow::Continue(())) => {}
                Err(e) => {
                    warn!(archive = %path.display(), "Skipping rest of archive: {}", e);
                    if visitor(Err(e)).is_break() {
                        return;
                    }
                }
            }
        }
    }
}

/// True for `.tar`, `.tar.gz` and `.tgz` files
pub fn is_archive(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".tar") || name.ends_with(".tar.gz") || name.ends_with(".tgz")
}

fn entry_file_name<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<String> {
    let path = entry.path()?;
    Ok(path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default())
}
