//! Fetch collaborators that supply scan data.
//!
//! Defines the `ScanFetcher` trait the scan loop calls once per cycle, plus
//! the bundled implementations:
//! - [`SampleFetcher`]: simulated instrument universe
//! - [`HttpFetcher`]: JSON record list served over HTTP

mod http;
mod sample;

pub use http::HttpFetcher;
pub use sample::SampleFetcher;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::data::Snapshot;
use screener_common::config::{ScannerConfig, SourceKind};

// ============================================================================
// Fetch Error
// ============================================================================

/// Errors returned by a fetch collaborator.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection failed or timed out
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered with a non-success status
    #[error("Upstream returned HTTP {status}")]
    Http { status: u16 },

    /// Payload could not be turned into records
    #[error("Parse error: {0}")]
    Parse(String),

    /// Upstream is temporarily unavailable
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// The fetcher panicked; the payload message is kept when it is a string
    #[error("Fetcher panicked: {0}")]
    Panicked(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

// ============================================================================
// Fetcher Trait
// ============================================================================

/// A source of scan snapshots.
///
/// Implementations perform their own I/O and must be safe to call repeatedly.
/// Each call returns a freshly built snapshot; nothing from earlier calls is
/// retained or mutated.
#[async_trait]
pub trait ScanFetcher: Send + Sync {
    /// Short name for logs and state reporting.
    fn name(&self) -> &'static str;

    /// Fetch one complete snapshot.
    async fn fetch(&self) -> Result<Snapshot, FetchError>;
}

/// Build the fetcher selected by `config.source`.
pub fn from_config(config: &ScannerConfig) -> anyhow::Result<Arc<dyn ScanFetcher>> {
    match config.source {
        SourceKind::Sample => Ok(Arc::new(SampleFetcher::new())),
        SourceKind::Http => {
            let url = config
                .source_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("scanner.source_url is not configured"))?;
            Ok(Arc::new(HttpFetcher::new(url, config.request_timeout())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        assert_eq!(
            FetchError::Http { status: 503 }.to_string(),
            "Upstream returned HTTP 503"
        );
        assert_eq!(
            FetchError::Network("connection refused".into()).to_string(),
            "Network error: connection refused"
        );
    }

    #[test]
    fn test_from_config_sample() {
        let fetcher = from_config(&ScannerConfig::default()).unwrap();
        assert_eq!(fetcher.name(), "sample");
    }

    #[test]
    fn test_from_config_http_requires_url() {
        let config = ScannerConfig {
            source: SourceKind::Http,
            ..Default::default()
        };
        assert!(from_config(&config).is_err());

        let config = ScannerConfig {
            source: SourceKind::Http,
            source_url: Some("http://127.0.0.1:9/instruments".into()),
            ..Default::default()
        };
        assert_eq!(from_config(&config).unwrap().name(), "http");
    }
}
