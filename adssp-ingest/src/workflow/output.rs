//! Result persistence
//!
//! The mapping is written as one JSON object keyed by accession (or model id
//! when fusion is disabled). The run summary goes to `<output>.summary.json`.
//! Both files are written to a temporary sibling and renamed into place.

use super::pipeline::BatchReport;
use crate::models::BatchSummary;
use crate::services::BatchOutput;
use serde::Serialize;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize {path}: {message}")]
    Serialize { path: PathBuf, message: String },
}

/// `<output>.summary.json` next to the output file
pub fn summary_path(output: &Path) -> PathBuf {
    let mut name = output.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".summary.json");
    output.with_file_name(name)
}

/// Write any serializable value as pretty JSON, atomically
fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> Result<(), OutputError> {
    let io_err = |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(io_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        serde_json::to_writer_pretty(&mut writer, value).map_err(|e| OutputError::Serialize {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;
    }
    temp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

pub fn write_output(output: &BatchOutput, path: &Path) -> Result<(), OutputError> {
    write_json_atomic(output, path)
}

pub fn write_summary(summary: &BatchSummary, path: &Path) -> Result<(), OutputError> {
    write_json_atomic(summary, path)
}

/// Write the mapping and its summary; returns the summary path
pub fn write_report(report: &BatchReport, output_path: &Path) -> Result<PathBuf, OutputError> {
    write_output(&report.output, output_path)?;
    let summary_file = summary_path(output_path);
    write_summary(&report.summary, &summary_file)?;

    info!(
        output = %output_path.display(),
        summary = %summary_file.display(),
        entries = report.output.len(),
        "Results written"
    );
    Ok(summary_file)
}
