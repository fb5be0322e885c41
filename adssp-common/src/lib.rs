//! # adssp Common Library
//!
//! Shared code for the adssp crates:
//! - Error type used for configuration and I/O failures
//! - TOML configuration model, discovery and atomic writes
//! - Environment variable overrides

pub mod config;
pub mod error;

pub use error::{Error, Result};
