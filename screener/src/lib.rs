//! Screener Library
//!
//! Background market scanner: a scheduler periodically pulls a snapshot of
//! instrument data from a fetch collaborator and commits it into a
//! thread-safe store that keeps the latest snapshot plus a bounded history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       screener (Rust Service)                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌───────────────┐   fetch   ┌───────────────┐  commit          │
//! │  │  ScanFetcher  │ ◀──────── │ ScanScheduler │ ─────────┐       │
//! │  └───────────────┘           └───────────────┘          ▼       │
//! │                                               ┌───────────────┐ │
//! │                     readers ────────────────▶ │   DataStore   │ │
//! │                                               └───────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Market-Cap Tiers
//!
//! Market cap is expressed in crore INR. With the default thresholds:
//! - **Large Cap**: ≥ 20,000
//! - **Mid Cap**: 5,000 to 20,000
//! - **Small Cap**: < 5,000

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod fetch;
pub mod scheduler;

pub use data::{DataStore, Record, RecordFilter, Snapshot, SourceStatus};
pub use fetch::{FetchError, ScanFetcher};
pub use scheduler::{ScanError, ScanScheduler, ScanState, ScanStatus, TriggerOutcome};

use anyhow::{Context, Result};
use std::sync::Arc;
use screener_common::config::Config;

use crate::data::TierThresholds;

/// Main screener service
pub struct ScreenerService {
    config: Config,
    store: Arc<DataStore>,
    scheduler: Arc<ScanScheduler>,
}

impl ScreenerService {
    /// Create a new screener service
    pub fn new(config: Config) -> Self {
        let thresholds = TierThresholds::new(config.scanner.large_cap_min, config.scanner.mid_cap_min);
        let store = Arc::new(DataStore::with_thresholds(
            config.scanner.history_capacity,
            thresholds,
        ));
        let scheduler = Arc::new(ScanScheduler::new(Arc::clone(&store)));

        Self {
            config,
            store,
            scheduler,
        }
    }

    /// Shared snapshot store for readers
    pub fn store(&self) -> Arc<DataStore> {
        Arc::clone(&self.store)
    }

    /// Scheduler handle for control operations
    pub fn scheduler(&self) -> Arc<ScanScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Start scanning and block until Ctrl-C, then stop cooperatively.
    pub async fn run(self) -> Result<()> {
        let scanner = &self.config.scanner;
        let fetcher = fetch::from_config(scanner).context("Failed to build scan fetcher")?;

        let state = self.scheduler.start(fetcher, scanner.interval());
        tracing::info!(
            source = state.source.as_deref().unwrap_or("unknown"),
            interval_secs = scanner.interval_secs,
            history_capacity = self.store.capacity(),
            "Screener running, press Ctrl-C to stop"
        );

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;

        tracing::info!("Shutdown signal received");
        let stopped = self.scheduler.stop(scanner.stop_timeout()).await;

        let state = self.scheduler.get_state();
        if stopped {
            tracing::info!(
                total_scans = state.total_scans,
                failed_scans = state.failed_scans,
                "Screener stopped"
            );
        } else {
            tracing::warn!(
                timeout_secs = scanner.stop_timeout_secs,
                "Scan loop still finishing a cycle at exit"
            );
        }

        Ok(())
    }
}
