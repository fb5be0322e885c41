//! Secondary-structure assignment via an external DSSP executable
//!
//! The oracle runs `mkdssp` on a staged structure file and parses the classic
//! DSSP output. Only the per-residue structure code is consumed downstream,
//! in residue order; blank codes (coil) become `-`.

use crate::utils::{retry_blocking, RetryError, RetryPolicy};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Header line preceding residue records in classic DSSP output
const RESIDUE_HEADER: &str = "  #  RESIDUE";

/// Column of the amino acid letter (`!` marks a chain break)
const AA_COLUMN: usize = 13;

/// Column of the secondary-structure code
const SS_COLUMN: usize = 16;

/// Code used for residues DSSP leaves blank
pub const COIL_CODE: u8 = b'-';

/// DSSP errors
#[derive(Debug, Error)]
pub enum DsspError {
    /// Executable could not be started
    #[error("Failed to launch DSSP executable {0}: {1}")]
    Launch(PathBuf, String),

    /// Executable ran and failed
    #[error("DSSP exited with {status} for {identifier}: {stderr}")]
    Failed {
        identifier: String,
        status: String,
        stderr: String,
    },

    /// Output file missing or unreadable
    #[error("DSSP output for {identifier} unreadable: {message}")]
    Output { identifier: String, message: String },

    /// Output did not follow the classic format
    #[error("Unparseable DSSP output for {identifier}: {message}")]
    Parse { identifier: String, message: String },

    /// No residue records
    #[error("DSSP assigned no residues for {0}")]
    Empty(String),
}

impl DsspError {
    /// Failures worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, DsspError::Failed { .. } | DsspError::Output { .. })
    }
}

/// One residue record: position, amino acid, structure code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsspResidue {
    pub position: i64,
    pub residue: char,
    pub class_code: u8,
}

/// Source of per-residue secondary-structure assignments
pub trait SecondaryStructureOracle: Send + Sync {
    fn assign(&self, structure_path: &Path, identifier: &str) -> Result<Vec<DsspResidue>, DsspError>;
}

/// Command-line convention of the DSSP executable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DsspCli {
    /// mkdssp 4.x: `mkdssp --output-format dssp <in> <out>`
    #[default]
    Modern,
    /// dssp 2.x/3.x: `mkdssp -i <in> -o <out>`
    Legacy,
}

/// Runs an external `mkdssp`/`dssp` executable
#[derive(Debug, Clone)]
pub struct MkdsspOracle {
    executable: PathBuf,
    cli: DsspCli,
}

impl MkdsspOracle {
    pub fn new(executable: impl Into<PathBuf>, cli: DsspCli) -> Self {
        Self {
            executable: executable.into(),
            cli,
        }
    }
}

impl SecondaryStructureOracle for MkdsspOracle {
    fn assign(&self, structure_path: &Path, identifier: &str) -> Result<Vec<DsspResidue>, DsspError> {
        let output_file = tempfile::Builder::new()
            .prefix("adssp-")
            .suffix(".dss")
            .tempfile()
            .map_err(|e| DsspError::Output {
                identifier: identifier.to_string(),
                message: e.to_string(),
            })?;

        let mut command = Command::new(&self.executable);
        match self.cli {
            DsspCli::Modern => command
                .arg("--output-format")
                .arg("dssp")
                .arg(structure_path)
                .arg(output_file.path()),
            DsspCli::Legacy => command
                .arg("-i")
                .arg(structure_path)
                .arg("-o")
                .arg(output_file.path()),
        };

        debug!(identifier, executable = %self.executable.display(), "Running DSSP");

        let output = command
            .output()
            .map_err(|e| DsspError::Launch(self.executable.clone(), e.to_string()))?;

        if !output.status.success() {
            return Err(DsspError::Failed {
                identifier: identifier.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = std::fs::read_to_string(output_file.path()).map_err(|e| DsspError::Output {
            identifier: identifier.to_string(),
            message: e.to_string(),
        })?;

        parse_dssp_output(&text, identifier)
    }
}

/// Parse classic DSSP output into residue records
///
/// Chain-break records (`!`) are skipped.
pub fn parse_dssp_output(text: &str, identifier: &str) -> Result<Vec<DsspResidue>, DsspError> {
    let parse_err = |message: String| DsspError::Parse {
        identifier: identifier.to_string(),
        message,
    };

    let mut lines = text.lines();
    if !lines.by_ref().any(|line| line.starts_with(RESIDUE_HEADER)) {
        return Err(parse_err("residue header not found".to_string()));
    }

    let mut residues = Vec::new();
    for (offset, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bytes = line.as_bytes();
        if bytes.len() <= SS_COLUMN {
            return Err(parse_err(format!("record {} too short", offset + 1)));
        }

        let residue = bytes[AA_COLUMN] as char;
        if residue == '!' {
            continue;
        }

        let position = line
            .get(5..10)
            .and_then(|field| field.trim().parse::<i64>().ok())
            .ok_or_else(|| parse_err(format!("record {} has no residue number", offset + 1)))?;

        let class_code = match bytes[SS_COLUMN] {
            b' ' => COIL_CODE,
            code => code,
        };

        residues.push(DsspResidue {
            position,
            residue,
            class_code,
        });
    }

    if residues.is_empty() {
        return Err(DsspError::Empty(identifier.to_string()));
    }

    Ok(residues)
}

/// Per-residue structure codes for a staged structure
///
/// Wraps the oracle with a fixed-delay retry on transient failures.
#[derive(Clone)]
pub struct SecondaryStructureClassifier {
    oracle: Arc<dyn SecondaryStructureOracle>,
    retry: RetryPolicy,
}

impl SecondaryStructureClassifier {
    pub fn new(oracle: Arc<dyn SecondaryStructureOracle>, retry: RetryPolicy) -> Self {
        Self { oracle, retry }
    }

    /// Ordered structure codes, one ASCII character per residue
    ///
    /// Blocking: runs the oracle (a subprocess for `MkdsspOracle`).
    pub fn classify(&self, structure_path: &Path, identifier: &str) -> Result<String, RetryError<DsspError>> {
        let residues = retry_blocking("dssp", self.retry, DsspError::is_transient, |_| {
            self.oracle.assign(structure_path, identifier)
        })?;

        let codes: String = residues
            .iter()
            .map(|r| {
                if r.class_code.is_ascii_graphic() {
                    r.class_code as char
                } else {
                    COIL_CODE as char
                }
            })
            .collect();

        debug!(identifier, residues = codes.len(), "Assigned secondary structure");
        Ok(codes)
    }
}
