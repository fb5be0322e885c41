//! Configuration resolution for adssp-ingest
//!
//! Each setting resolves with priority CLI → ENV (`ADSSP_*`) → TOML → default,
//! then the whole set is validated into an [`IngestConfig`].

use crate::fusion::{FusionParams, DEFAULT_STRIDE, DEFAULT_TRIM_FACTOR};
use crate::services::confidence::{DEFAULT_PAE_BASE_URL, DEFAULT_PAE_THRESHOLD, DEFAULT_PLDDT_THRESHOLD};
use crate::services::{digest_hex, ConfidenceThresholds, DsspCli, ForbiddenSet, MaskPolicy};
use crate::utils::RetryPolicy;
use adssp_common::config::{
    default_cache_dir, env_override, CacheSection, ConfidenceSection, DsspSection, FusionSection, LoggingConfig,
    PipelineSection, TomlConfig,
};
use adssp_common::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Default DSSP executable name (looked up on PATH)
pub const DEFAULT_DSSP_EXECUTABLE: &str = "mkdssp";

/// Default attempts for DSSP runs and PAE requests
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5_000;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_PROGRESS_INTERVAL: usize = 100;

/// Command-line tier; `None` falls through to ENV/TOML/default
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dssp_executable: Option<PathBuf>,
    pub legacy_dssp: bool,
    pub forbidden_codes: Option<String>,
    pub plddt_threshold: Option<f64>,
    pub pae_threshold: Option<f64>,
    pub pae_base_url: Option<String>,
    pub stride: Option<usize>,
    pub trim_factor: Option<f64>,
    pub workers: Option<usize>,
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub no_cache: bool,
    pub no_fuse: bool,
    pub remote_confidence: bool,
    pub truncate_mismatched: bool,
}

/// Fully resolved and validated settings for one batch
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub dssp_executable: PathBuf,
    pub dssp_cli: DsspCli,
    pub forbidden: ForbiddenSet,
    pub mask_policy: MaskPolicy,
    pub thresholds: ConfidenceThresholds,
    pub pae_base_url: String,
    pub request_timeout: Duration,
    pub dssp_retry: RetryPolicy,
    pub confidence_retry: RetryPolicy,
    pub fusion: FusionParams,
    /// False writes per-model results keyed by model id
    pub fuse: bool,
    /// Use the PAE service even when archives carry pLDDT
    pub force_remote_confidence: bool,
    pub workers: usize,
    pub progress_interval: usize,
    /// `None` disables the result cache
    pub cache_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let retry = RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(DEFAULT_RETRY_DELAY_MS));
        Self {
            dssp_executable: PathBuf::from(DEFAULT_DSSP_EXECUTABLE),
            dssp_cli: DsspCli::default(),
            forbidden: ForbiddenSet::default(),
            mask_policy: MaskPolicy::default(),
            thresholds: ConfidenceThresholds::default(),
            pae_base_url: DEFAULT_PAE_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            dssp_retry: retry,
            confidence_retry: retry,
            fusion: FusionParams::default(),
            fuse: true,
            force_remote_confidence: false,
            workers: default_workers(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            cache_dir: default_cache_dir(),
        }
    }
}

/// Available parallelism minus one, at least one
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// First of CLI, ENV, TOML that is set
fn resolve<T>(setting: &str, cli: Option<T>, env_var: &str, toml: Option<T>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if cli.is_some() {
        debug!(setting, source = "cli", "Setting resolved");
        return Ok(cli);
    }
    if let Some(value) = env_override::<T>(env_var)? {
        debug!(setting, source = "environment", "Setting resolved");
        return Ok(Some(value));
    }
    if toml.is_some() {
        debug!(setting, source = "toml", "Setting resolved");
    }
    Ok(toml)
}

/// Boolean switch: a set CLI flag wins, then ENV, then TOML
fn resolve_flag(setting: &str, cli: bool, env_var: &str, toml: Option<bool>) -> Result<bool> {
    Ok(resolve(setting, cli.then_some(true), env_var, toml)?.unwrap_or(false))
}

impl IngestConfig {
    /// Resolve all settings and validate them
    pub fn resolve(cli: &ConfigOverrides, toml: &TomlConfig) -> Result<Self> {
        let defaults = Self::default();

        let dssp_executable = resolve(
            "dssp.executable",
            cli.dssp_executable.clone(),
            "ADSSP_DSSP_EXECUTABLE",
            toml.dssp.executable.clone(),
        )?
        .unwrap_or(defaults.dssp_executable);

        let dssp_cli = if resolve_flag("dssp.legacy_cli", cli.legacy_dssp, "ADSSP_DSSP_LEGACY_CLI", toml.dssp.legacy_cli)? {
            DsspCli::Legacy
        } else {
            DsspCli::Modern
        };

        let forbidden = match resolve(
            "dssp.forbidden_codes",
            cli.forbidden_codes.clone(),
            "ADSSP_FORBIDDEN_CODES",
            toml.dssp.forbidden_codes.clone(),
        )? {
            Some(codes) => codes.parse::<ForbiddenSet>().map_err(|e| Error::Config(e.to_string()))?,
            None => defaults.forbidden,
        };

        let mask_policy = if resolve_flag(
            "pipeline.truncate_mismatched",
            cli.truncate_mismatched,
            "ADSSP_TRUNCATE_MISMATCHED",
            toml.pipeline.truncate_mismatched,
        )? {
            MaskPolicy::TruncateToShorter
        } else {
            MaskPolicy::Strict
        };

        let thresholds = ConfidenceThresholds {
            plddt: resolve(
                "confidence.plddt_threshold",
                cli.plddt_threshold,
                "ADSSP_PLDDT_THRESHOLD",
                toml.confidence.plddt_threshold,
            )?
            .unwrap_or(DEFAULT_PLDDT_THRESHOLD),
            pae: resolve(
                "confidence.pae_threshold",
                cli.pae_threshold,
                "ADSSP_PAE_THRESHOLD",
                toml.confidence.pae_threshold,
            )?
            .unwrap_or(DEFAULT_PAE_THRESHOLD),
        };

        let pae_base_url = resolve(
            "confidence.pae_base_url",
            cli.pae_base_url.clone(),
            "ADSSP_PAE_BASE_URL",
            toml.confidence.pae_base_url.clone(),
        )?
        .unwrap_or(defaults.pae_base_url);

        let request_timeout = resolve(
            "confidence.request_timeout_secs",
            None,
            "ADSSP_REQUEST_TIMEOUT_SECS",
            toml.confidence.request_timeout_secs,
        )?
        .map(Duration::from_secs)
        .unwrap_or(defaults.request_timeout);

        // One CLI/ENV pair drives both retry loops; TOML can set them apart
        let dssp_retry = Self::resolve_retry(
            cli,
            "dssp",
            toml.dssp.max_attempts,
            toml.dssp.retry_delay_ms,
        )?;
        let confidence_retry = Self::resolve_retry(
            cli,
            "confidence",
            toml.confidence.max_attempts,
            toml.confidence.retry_delay_ms,
        )?;

        let stride = resolve("fusion.stride", cli.stride, "ADSSP_STRIDE", toml.fusion.stride)?
            .unwrap_or(DEFAULT_STRIDE);
        let trim_factor = resolve(
            "fusion.trim_factor",
            cli.trim_factor,
            "ADSSP_TRIM_FACTOR",
            toml.fusion.trim_factor,
        )?
        .unwrap_or(DEFAULT_TRIM_FACTOR);
        let fusion = FusionParams::new(stride, trim_factor).map_err(|e| Error::Config(e.to_string()))?;

        let workers = resolve("pipeline.workers", cli.workers, "ADSSP_WORKERS", toml.pipeline.workers)?
            .unwrap_or(defaults.workers);
        let progress_interval = resolve(
            "pipeline.progress_interval",
            None,
            "ADSSP_PROGRESS_INTERVAL",
            toml.pipeline.progress_interval,
        )?
        .unwrap_or(DEFAULT_PROGRESS_INTERVAL);

        let cache_enabled = !cli.no_cache
            && resolve("cache.enabled", None, "ADSSP_CACHE_ENABLED", toml.cache.enabled)?.unwrap_or(true);
        let cache_dir = if cache_enabled {
            resolve(
                "cache.directory",
                cli.cache_dir.clone(),
                "ADSSP_CACHE_DIR",
                toml.cache.directory.clone(),
            )?
            .or(defaults.cache_dir)
        } else {
            None
        };

        let config = Self {
            dssp_executable,
            dssp_cli,
            forbidden,
            mask_policy,
            thresholds,
            pae_base_url,
            request_timeout,
            dssp_retry,
            confidence_retry,
            fusion,
            fuse: !cli.no_fuse,
            force_remote_confidence: cli.remote_confidence,
            workers,
            progress_interval,
            cache_dir,
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve_retry(
        cli: &ConfigOverrides,
        section: &str,
        toml_attempts: Option<u32>,
        toml_delay_ms: Option<u64>,
    ) -> Result<RetryPolicy> {
        let attempts = resolve(
            &format!("{}.max_attempts", section),
            cli.max_attempts,
            "ADSSP_MAX_ATTEMPTS",
            toml_attempts,
        )?
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
        let delay_ms = resolve(
            &format!("{}.retry_delay_ms", section),
            cli.retry_delay_ms,
            "ADSSP_RETRY_DELAY_MS",
            toml_delay_ms,
        )?
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);

        if attempts == 0 {
            return Err(Error::Config(format!("{}.max_attempts must be at least 1", section)));
        }
        Ok(RetryPolicy::new(attempts, Duration::from_millis(delay_ms)))
    }

    /// Range checks not covered by the component constructors
    pub fn validate(&self) -> Result<()> {
        let plddt = self.thresholds.plddt;
        if !plddt.is_finite() || !(0.0..=100.0).contains(&plddt) {
            return Err(Error::Config(format!("pLDDT threshold {} outside [0, 100]", plddt)));
        }
        let pae = self.thresholds.pae;
        if !pae.is_finite() || pae < 0.0 {
            return Err(Error::Config(format!("PAE threshold {} must be non-negative", pae)));
        }
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(Error::Config("progress_interval must be at least 1".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request_timeout_secs must be at least 1".to_string()));
        }
        if self.pae_base_url.trim().is_empty() {
            return Err(Error::Config("pae_base_url is empty".to_string()));
        }
        Ok(())
    }

    /// Canonical text of every setting that affects batch output
    ///
    /// Worker count, retry budgets and cache location are excluded.
    pub fn parameter_fingerprint(&self) -> String {
        format!(
            "dssp={};cli={:?};forbidden={};policy={:?};plddt={};pae={};pae_url={};remote={};stride={};trim={};fuse={}",
            self.dssp_executable.display(),
            self.dssp_cli,
            self.forbidden,
            self.mask_policy,
            self.thresholds.plddt,
            self.thresholds.pae,
            self.pae_base_url,
            self.force_remote_confidence,
            self.fusion.stride(),
            self.fusion.trim_factor(),
            self.fuse,
        )
    }

    /// SHA-256 of [`Self::parameter_fingerprint`]
    pub fn parameter_digest(&self) -> String {
        digest_hex([self.parameter_fingerprint()])
    }

    /// Settings as a config file that resolves back to this configuration
    ///
    /// Run-only switches (`--no-fuse`, `--remote-confidence`) have no TOML
    /// field and are not saved.
    pub fn to_toml(&self, logging: LoggingConfig) -> TomlConfig {
        TomlConfig {
            logging,
            dssp: DsspSection {
                executable: Some(self.dssp_executable.clone()),
                forbidden_codes: Some(self.forbidden.to_string()),
                max_attempts: Some(self.dssp_retry.max_attempts),
                retry_delay_ms: Some(self.dssp_retry.delay.as_millis() as u64),
                legacy_cli: Some(self.dssp_cli == DsspCli::Legacy),
            },
            confidence: ConfidenceSection {
                plddt_threshold: Some(self.thresholds.plddt),
                pae_threshold: Some(self.thresholds.pae),
                pae_base_url: Some(self.pae_base_url.clone()),
                max_attempts: Some(self.confidence_retry.max_attempts),
                retry_delay_ms: Some(self.confidence_retry.delay.as_millis() as u64),
                request_timeout_secs: Some(self.request_timeout.as_secs()),
            },
            fusion: FusionSection {
                stride: Some(self.fusion.stride()),
                trim_factor: Some(self.fusion.trim_factor()),
            },
            pipeline: PipelineSection {
                workers: Some(self.workers),
                progress_interval: Some(self.progress_interval),
                truncate_mismatched: Some(self.mask_policy == MaskPolicy::TruncateToShorter),
            },
            cache: CacheSection {
                directory: self.cache_dir.clone(),
                enabled: Some(self.cache_dir.is_some()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "ADSSP_STRIDE",
            "ADSSP_TRIM_FACTOR",
            "ADSSP_WORKERS",
            "ADSSP_PLDDT_THRESHOLD",
            "ADSSP_FORBIDDEN_CODES",
            "ADSSP_MAX_ATTEMPTS",
            "ADSSP_CACHE_DIR",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = IngestConfig::resolve(&ConfigOverrides::default(), &TomlConfig::default()).unwrap();

        assert_eq!(config.fusion.stride(), DEFAULT_STRIDE);
        assert_eq!(config.fusion.trim_amount(), 100);
        assert_eq!(config.thresholds, ConfidenceThresholds::default());
        assert_eq!(config.dssp_retry.max_attempts, 3);
        assert_eq!(config.dssp_retry.delay, Duration::from_secs(5));
        assert_eq!(config.mask_policy, MaskPolicy::Strict);
        assert!(config.fuse);
        assert!(config.workers >= 1);
    }

    #[test]
    #[serial]
    fn test_cli_beats_env_beats_toml() {
        clear_env();
        let mut toml = TomlConfig::default();
        toml.fusion.stride = Some(150);
        toml.pipeline.workers = Some(2);
        toml.confidence.plddt_threshold = Some(60.0);

        std::env::set_var("ADSSP_STRIDE", "120");
        std::env::set_var("ADSSP_WORKERS", "3");

        let cli = ConfigOverrides {
            stride: Some(100),
            ..Default::default()
        };
        let config = IngestConfig::resolve(&cli, &toml).unwrap();
        clear_env();

        assert_eq!(config.fusion.stride(), 100);
        assert_eq!(config.workers, 3);
        assert_eq!(config.thresholds.plddt, 60.0);
    }

    #[test]
    #[serial]
    fn test_toml_retry_sections_apart() {
        clear_env();
        let mut toml = TomlConfig::default();
        toml.dssp.max_attempts = Some(1);
        toml.confidence.max_attempts = Some(5);
        toml.confidence.retry_delay_ms = Some(10);

        let config = IngestConfig::resolve(&ConfigOverrides::default(), &toml).unwrap();
        assert_eq!(config.dssp_retry.max_attempts, 1);
        assert_eq!(config.confidence_retry.max_attempts, 5);
        assert_eq!(config.confidence_retry.delay, Duration::from_millis(10));
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        let invalid = [
            ConfigOverrides {
                stride: Some(0),
                ..Default::default()
            },
            ConfigOverrides {
                trim_factor: Some(1.5),
                ..Default::default()
            },
            ConfigOverrides {
                plddt_threshold: Some(120.0),
                ..Default::default()
            },
            ConfigOverrides {
                workers: Some(0),
                ..Default::default()
            },
            ConfigOverrides {
                forbidden_codes: Some(" ".to_string()),
                ..Default::default()
            },
            ConfigOverrides {
                max_attempts: Some(0),
                ..Default::default()
            },
        ];

        for cli in invalid {
            let result = IngestConfig::resolve(&cli, &TomlConfig::default());
            assert!(matches!(result, Err(Error::Config(_))), "accepted {:?}", cli);
        }
    }

    #[test]
    #[serial]
    fn test_malformed_env_is_error() {
        clear_env();
        std::env::set_var("ADSSP_TRIM_FACTOR", "half");
        let result = IngestConfig::resolve(&ConfigOverrides::default(), &TomlConfig::default());
        clear_env();

        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_no_cache_disables_cache_dir() {
        clear_env();
        let cli = ConfigOverrides {
            cache_dir: Some(PathBuf::from("/tmp/adssp-cache")),
            no_cache: true,
            ..Default::default()
        };
        let config = IngestConfig::resolve(&cli, &TomlConfig::default()).unwrap();
        assert!(config.cache_dir.is_none());
    }

    #[test]
    #[serial]
    fn test_digest_tracks_output_parameters_only() {
        clear_env();
        let base = IngestConfig::resolve(&ConfigOverrides::default(), &TomlConfig::default()).unwrap();

        let more_workers = IngestConfig {
            workers: base.workers + 4,
            ..base.clone()
        };
        assert_eq!(base.parameter_digest(), more_workers.parameter_digest());

        let other_trim = IngestConfig {
            fusion: FusionParams::new(200, 0.25).unwrap(),
            ..base.clone()
        };
        assert_ne!(base.parameter_digest(), other_trim.parameter_digest());

        let no_fuse = IngestConfig { fuse: false, ..base.clone() };
        assert_ne!(base.parameter_digest(), no_fuse.parameter_digest());

        let legacy = IngestConfig {
            dssp_cli: DsspCli::Legacy,
            ..base.clone()
        };
        assert_ne!(base.parameter_digest(), legacy.parameter_digest());
    }

    #[test]
    #[serial]
    fn test_saved_config_resolves_to_same_settings() {
        clear_env();
        let cli = ConfigOverrides {
            legacy_dssp: true,
            forbidden_codes: Some("HGI".to_string()),
            stride: Some(150),
            trim_factor: Some(0.25),
            workers: Some(2),
            max_attempts: Some(4),
            cache_dir: Some(PathBuf::from("/tmp/adssp-cache")),
            truncate_mismatched: true,
            ..Default::default()
        };
        let config = IngestConfig::resolve(&cli, &TomlConfig::default()).unwrap();

        let saved = config.to_toml(LoggingConfig::default());
        let reloaded = IngestConfig::resolve(&ConfigOverrides::default(), &saved).unwrap();

        assert_eq!(reloaded.parameter_digest(), config.parameter_digest());
        assert_eq!(reloaded.dssp_cli, DsspCli::Legacy);
        assert_eq!(reloaded.workers, 2);
        assert_eq!(reloaded.confidence_retry.max_attempts, 4);
        assert_eq!(reloaded.cache_dir, config.cache_dir);
    }
}
