//! Configuration file model, discovery and atomic writes
//!
//! Every setting is optional in the TOML file. Resolution order for a single
//! setting is: command-line argument, environment variable, TOML file,
//! compiled default. This module covers the TOML and environment tiers; the
//! command-line tier lives with each binary.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "ADSSP_CONFIG";

/// Directory name used under the platform config directory
const CONFIG_DIR_NAME: &str = "adssp";

/// Config file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset ("info", "adssp_ingest=debug", ...)
    pub level: String,
    /// Optional log file; stderr when absent
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// `[dssp]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DsspSection {
    /// Path or name of the DSSP executable
    pub executable: Option<PathBuf>,
    /// Secondary-structure codes treated as forbidden
    pub forbidden_codes: Option<String>,
    /// Attempts per structure before the model is failed
    pub max_attempts: Option<u32>,
    /// Fixed delay between attempts in milliseconds
    pub retry_delay_ms: Option<u64>,
    /// Use the dssp 2.x/3.x `-i <in> -o <out>` command line
    pub legacy_cli: Option<bool>,
}

/// `[confidence]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceSection {
    /// Minimum per-residue pLDDT for a residue to count as confident
    pub plddt_threshold: Option<f64>,
    /// Maximum predicted aligned error (angstroms) for a residue to count as confident
    pub pae_threshold: Option<f64>,
    /// Base URL of the predicted aligned error service
    pub pae_base_url: Option<String>,
    /// Attempts per PAE request
    pub max_attempts: Option<u32>,
    /// Fixed delay between PAE attempts in milliseconds
    pub retry_delay_ms: Option<u64>,
    /// HTTP timeout per request in seconds
    pub request_timeout_secs: Option<u64>,
}

/// `[fusion]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    /// Residue offset between consecutive fragment starts
    pub stride: Option<usize>,
    /// Fraction of the stride trimmed from each shared fragment edge
    pub trim_factor: Option<f64>,
}

/// `[pipeline]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Concurrent per-model workers
    pub workers: Option<usize>,
    /// Log progress every N processed models
    pub progress_interval: Option<usize>,
    /// Truncate to the shorter length when codes and confidence disagree
    pub truncate_mismatched: Option<bool>,
}

/// `[cache]` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Directory holding cached batch results
    pub directory: Option<PathBuf>,
    /// Whether cached results are reused
    pub enabled: Option<bool>,
}

/// Complete TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub dssp: DsspSection,
    pub confidence: ConfidenceSection,
    pub fusion: FusionSection,
    pub pipeline: PipelineSection,
    pub cache: CacheSection,
}

/// Default cache directory: `<cache_dir>/adssp`
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join(CONFIG_DIR_NAME))
}

/// Locate the config file to load
///
/// Priority: explicit path, then `ADSSP_CONFIG`, then the user config
/// directory, then `/etc/adssp/config.toml` on Linux. Only the explicit path
/// and the environment variable are returned without an existence check.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Load configuration with graceful degradation
///
/// A missing file yields defaults with a warning. A file that exists but does
/// not parse is an error.
pub fn load_or_default(explicit: Option<&Path>) -> Result<TomlConfig> {
    let Some(path) = locate_config_file(explicit) else {
        debug!("No config file found, using defaults");
        return Ok(TomlConfig::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    #[cfg(unix)]
    if check_toml_permissions_loose(&path).unwrap_or(false) {
        warn!(
            "Config file {} is readable by other users (expected mode 0600)",
            path.display()
        );
    }

    let config = load_toml_config(&path)?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write config atomically (temp file + rename)
///
/// On Unix the file is created with mode 0600.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&temp_path, target) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// True when group or other permission bits are set on the file
#[cfg(unix)]
pub fn check_toml_permissions_loose(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o077 != 0)
}

/// Read and parse an environment variable override
///
/// Unset or blank variables yield `None`; values that fail to parse are a
/// configuration error naming the variable.
pub fn env_override<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e))),
        _ => Ok(None),
    }
}
