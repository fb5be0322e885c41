//! Utility modules for adssp-ingest

pub mod retry;

pub use retry::{retry_async, retry_blocking, RetryError, RetryPolicy};
